use std::sync::Arc;

use billing_core::{
    domain::{
        entities::{payments::PaymentEntity, subscriptions::InsertSubscriptionEntity},
        repositories::{
            notifications::UserNotifier, payments::PaymentRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::{
            billing::{CONTEXT_RECURRING, CONTEXT_SUBSCRIPTION},
            enums::{
                payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
                subscription_statuses::SubscriptionStatus,
            },
            gateway::OrderStatus,
            notifications::UserNotification,
        },
    },
    payments::{callback_signature, errors::GatewayError, gateway::PaymentGateway},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct GatewayNotification {
    pub order: NotifiedOrder,
    /// Reference the gateway wants used for future recurring charges, when it differs
    /// from the order id.
    #[serde(default)]
    pub instrument_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifiedOrder {
    #[serde(alias = "orderId")]
    pub order_id: String,
    #[serde(default, alias = "extOrderId")]
    pub ext_order_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback signature is missing or invalid")]
    InvalidSignature,
    #[error("invalid callback payload: {0}")]
    InvalidPayload(String),
    #[error("no payment recorded for order {0}")]
    UnknownOrder(String),
    #[error("order status could not be confirmed: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CallbackError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CallbackError::InvalidSignature => StatusCode::UNAUTHORIZED,
            CallbackError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            CallbackError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            CallbackError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CallbackError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Payment already terminal, or settled concurrently by a replay.
    AlreadySettled,
    /// The gateway has not reached a final status yet.
    StillPending,
    Settled {
        order_id: String,
        status: PaymentStatus,
        activated_subscription_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    First,
    Replay,
}

/// Sole writer of terminal payment status and of confirmed instrument references.
pub struct GatewayCallbackUseCase {
    subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
    payments: Arc<dyn PaymentRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn UserNotifier + Send + Sync>,
    callback_secret: String,
}

impl GatewayCallbackUseCase {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
        payments: Arc<dyn PaymentRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn UserNotifier + Send + Sync>,
        callback_secret: String,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            gateway,
            notifier,
            callback_secret,
        }
    }

    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, CallbackError> {
        let signature = signature.ok_or(CallbackError::InvalidSignature)?;
        if !callback_signature::verify_signature(&self.callback_secret, raw_body, signature) {
            warn!("gateway_callback: signature mismatch");
            return Err(CallbackError::InvalidSignature);
        }

        let notification: GatewayNotification = serde_json::from_slice(raw_body)
            .map_err(|err| CallbackError::InvalidPayload(err.to_string()))?;
        let order_id = notification.order.order_id.trim().to_string();
        if order_id.is_empty() {
            return Err(CallbackError::InvalidPayload("order_id is empty".to_string()));
        }

        info!(
            %order_id,
            ext_order_id = ?notification.order.ext_order_id,
            notified_status = %notification.order.status,
            "gateway_callback: notification received"
        );

        let payment = self
            .payments
            .find_by_order_id(&order_id)
            .await?
            .ok_or_else(|| CallbackError::UnknownOrder(order_id.clone()))?;

        let instrument_ref = notification
            .instrument_ref
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        match payment.status() {
            Some(PaymentStatus::Completed) => {
                // A previous delivery may have settled the payment and then failed before
                // activation or the reference update. Those writes are idempotent, so
                // the gateway's retry finishes them.
                info!(%order_id, "gateway_callback: payment already completed; re-running follow-up");
                self.complete(&payment, instrument_ref, now, Delivery::Replay)
                    .await?;
                return Ok(CallbackOutcome::AlreadySettled);
            }
            Some(status) if status.is_terminal() => {
                info!(%order_id, %status, "gateway_callback: payment already settled");
                return Ok(CallbackOutcome::AlreadySettled);
            }
            _ => {}
        }

        // The notification body is only a hint; the gateway is asked for the real status.
        let report = self.gateway.get_order_status(&order_id).await?;
        let Some(settled_status) = settlement_status(report.status) else {
            info!(%order_id, gateway_status = ?report.status, "gateway_callback: order not final yet");
            return Ok(CallbackOutcome::StillPending);
        };

        let updated = self
            .payments
            .settle_payment(&order_id, settled_status, now)
            .await?;
        if !updated {
            info!(%order_id, "gateway_callback: payment settled concurrently; ignoring replay");
            return Ok(CallbackOutcome::AlreadySettled);
        }

        info!(%order_id, status = %settled_status, "gateway_callback: payment settled");

        let activated_subscription_id = match settled_status {
            PaymentStatus::Completed => {
                self.complete(&payment, instrument_ref, now, Delivery::First)
                    .await?
            }
            _ => {
                self.on_failed(&payment, settled_status, report.detail.as_deref())
                    .await?;
                None
            }
        };

        Ok(CallbackOutcome::Settled {
            order_id,
            status: settled_status,
            activated_subscription_id,
        })
    }

    /// Follow-up of a completed payment. Every write here tolerates being repeated.
    async fn complete(
        &self,
        payment: &PaymentEntity,
        instrument_ref: Option<String>,
        now: DateTime<Utc>,
        delivery: Delivery,
    ) -> Result<Option<Uuid>, CallbackError> {
        if let Some(token) = instrument_ref.as_deref() {
            self.payments
                .attach_instrument_token(&payment.order_id, token)
                .await?;
        }

        match payment.context.as_str() {
            CONTEXT_SUBSCRIPTION => self.activate(payment, instrument_ref, now).await,
            CONTEXT_RECURRING => {
                let Some(subscription_id) = payment.recurring_payment_id else {
                    warn!(order_id = %payment.order_id, "gateway_callback: recurring payment without subscription");
                    return Ok(None);
                };

                let subscription = self.subscriptions.find_by_id(subscription_id).await?;

                if let Some(reference) = instrument_ref.as_deref() {
                    // On replay the reference is only written while the subscription still
                    // charges the instrument this payment used; a later recovery wins.
                    let still_current = delivery == Delivery::First
                        || subscription.as_ref().is_some_and(|current| {
                            let charged = current.chargeable_ref();
                            charged == Some(reference)
                                || charged == payment.parent_order_id.as_deref()
                        });
                    if still_current {
                        self.subscriptions
                            .replace_instrument_ref(subscription_id, reference)
                            .await?;
                        info!(%subscription_id, instrument_ref = %reference, "gateway_callback: confirmed instrument reference stored");
                    }
                }

                if delivery == Delivery::Replay {
                    return Ok(None);
                }

                if let Some(subscription) = subscription {
                    if let Some(next_billing_date) = subscription.next_billing_date {
                        self.notify(
                            payment.user_id,
                            UserNotification::SubscriptionRenewed {
                                subscription_id,
                                plan_name: subscription.plan_name,
                                amount_minor: payment.amount_minor,
                                currency: payment.currency.clone(),
                                next_billing_date,
                            },
                        )
                        .await;
                    }
                }
                Ok(None)
            }
            other => {
                warn!(order_id = %payment.order_id, context = other, "gateway_callback: unknown payment context");
                Ok(None)
            }
        }
    }

    async fn activate(
        &self,
        payment: &PaymentEntity,
        instrument_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, CallbackError> {
        if let Some(existing) = self
            .subscriptions
            .find_by_instrument_save_order_id(&payment.order_id)
            .await?
        {
            info!(subscription_id = %existing.id, order_id = %payment.order_id, "gateway_callback: subscription already activated");
            return Ok(Some(existing.id));
        }

        let plan = payment.plan().ok_or_else(|| {
            anyhow::anyhow!("checkout payment {} has no plan snapshot", payment.order_id)
        })?;
        let next_billing_date = plan.period.advance(now).ok_or_else(|| {
            anyhow::anyhow!("cannot compute next billing date for period {}", plan.period)
        })?;

        let subscription = self
            .subscriptions
            .create_subscription(InsertSubscriptionEntity {
                user_id: payment.user_id,
                plan_id: plan.plan_id,
                plan_name: plan.plan_name.clone(),
                plan_price_minor: plan.price_minor,
                currency: plan.currency,
                period: plan.period.to_string(),
                status: SubscriptionStatus::Active.to_string(),
                start_date: now,
                end_date: None,
                next_billing_date: Some(next_billing_date),
                instrument_save_order_id: Some(payment.order_id.clone()),
                chargeable_instrument_ref: Some(
                    instrument_ref.unwrap_or_else(|| payment.order_id.clone()),
                ),
                payment_method: PaymentMethod::CardToken.to_string(),
                total_paid_minor: payment.amount_minor,
                billing_cycles: 1,
            })
            .await?;

        info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            %next_billing_date,
            "gateway_callback: subscription activated"
        );

        self.notify(
            payment.user_id,
            UserNotification::SubscriptionActivated {
                subscription_id: subscription.id,
                plan_name: plan.plan_name,
                next_billing_date,
            },
        )
        .await;

        Ok(Some(subscription.id))
    }

    async fn on_failed(
        &self,
        payment: &PaymentEntity,
        status: PaymentStatus,
        detail: Option<&str>,
    ) -> Result<(), CallbackError> {
        if payment.context != CONTEXT_RECURRING {
            info!(order_id = %payment.order_id, %status, "gateway_callback: checkout payment did not settle");
            return Ok(());
        }
        let Some(subscription_id) = payment.recurring_payment_id else {
            return Ok(());
        };

        self.subscriptions.mark_pending(subscription_id).await?;
        error!(
            %subscription_id,
            user_id = %payment.user_id,
            order_id = %payment.order_id,
            %status,
            detail = ?detail,
            "gateway_callback: recurring charge did not settle; subscription demoted to pending"
        );

        if let Some(subscription) = self.subscriptions.find_by_id(subscription_id).await? {
            self.notify(
                payment.user_id,
                UserNotification::SubscriptionSuspended {
                    subscription_id,
                    plan_name: subscription.plan_name,
                },
            )
            .await;
        }
        Ok(())
    }

    async fn notify(&self, user_id: Uuid, notification: UserNotification) {
        if let Err(err) = self.notifier.notify(user_id, notification).await {
            warn!(%user_id, error = %err, "gateway_callback: user notification failed");
        }
    }
}

fn settlement_status(status: OrderStatus) -> Option<PaymentStatus> {
    match status {
        OrderStatus::Completed => Some(PaymentStatus::Completed),
        OrderStatus::Canceled | OrderStatus::Failed => Some(PaymentStatus::Failed),
        OrderStatus::Rejected => Some(PaymentStatus::Rejected),
        OrderStatus::New | OrderStatus::Pending | OrderStatus::WaitingForConfirmation => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_core::{
        domain::{
            entities::subscriptions::SubscriptionEntity,
            repositories::{
                notifications::MockUserNotifier, payments::MockPaymentRepository,
                subscriptions::MockSubscriptionRepository,
            },
            value_objects::{
                enums::billing_periods::BillingPeriod, gateway::OrderStatusReport,
                plans::PlanSnapshot,
            },
        },
        payments::{callback_signature::sign_payload, gateway::MockPaymentGateway},
    };
    use chrono::TimeZone;
    use serde_json::json;

    const SECRET: &str = "callback-secret";
    const ORDER: &str = "7d1b3f0e-2a4c-4e5f-9b8a-1c2d3e4f5a6b";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn body(status: &str, instrument_ref: Option<&str>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "order": {"order_id": ORDER, "status": status},
            "instrument_ref": instrument_ref,
        }))
        .unwrap()
    }

    fn checkout_payment(status: &str) -> PaymentEntity {
        let plan = PlanSnapshot {
            plan_id: "pro".into(),
            plan_name: "Pro".into(),
            price_minor: 4_900,
            currency: "PLN".into(),
            period: BillingPeriod::Monthly,
        };
        PaymentEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_id: ORDER.into(),
            amount_minor: 4_900,
            currency: "PLN".into(),
            payment_method: "card".into(),
            context: CONTEXT_SUBSCRIPTION.into(),
            is_recurring: false,
            parent_order_id: None,
            external_order_id: Some("user-abc".into()),
            recurring_payment_id: None,
            payment_token: None,
            plan_snapshot: Some(serde_json::to_value(plan).unwrap()),
            status: status.into(),
            settled_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn created(row: InsertSubscriptionEntity) -> SubscriptionEntity {
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            plan_price_minor: row.plan_price_minor,
            currency: row.currency,
            period: row.period,
            status: row.status,
            start_date: row.start_date,
            end_date: row.end_date,
            next_billing_date: row.next_billing_date,
            instrument_save_order_id: row.instrument_save_order_id,
            chargeable_instrument_ref: row.chargeable_instrument_ref,
            payment_method: row.payment_method,
            total_paid_minor: row.total_paid_minor,
            billing_cycles: row.billing_cycles,
            billing_claimed_by: None,
            billing_claimed_until: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn gateway_reporting(status: OrderStatus) -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_order_status().returning(move |order_id| {
            Ok(OrderStatusReport {
                order_id: order_id.to_string(),
                status,
                detail: None,
            })
        });
        gateway
    }

    fn usecase(
        subscriptions: MockSubscriptionRepository,
        payments: MockPaymentRepository,
        gateway: MockPaymentGateway,
        notifier: MockUserNotifier,
    ) -> GatewayCallbackUseCase {
        GatewayCallbackUseCase::new(
            Arc::new(subscriptions),
            Arc::new(payments),
            Arc::new(gateway),
            Arc::new(notifier),
            SECRET.into(),
        )
    }

    #[tokio::test]
    async fn rejects_bad_signature_before_touching_storage() {
        let mut payments = MockPaymentRepository::new();
        payments.expect_find_by_order_id().never();

        let usecase = usecase(
            MockSubscriptionRepository::new(),
            payments,
            MockPaymentGateway::new(),
            MockUserNotifier::new(),
        );
        let raw = body("COMPLETED", None);

        let err = usecase.handle(&raw, Some("sha256=00"), now()).await.unwrap_err();
        assert!(matches!(err, CallbackError::InvalidSignature));
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);

        let err = usecase.handle(&raw, None, now()).await.unwrap_err();
        assert!(matches!(err, CallbackError::InvalidSignature));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let mut payments = MockPaymentRepository::new();
        payments.expect_find_by_order_id().returning(|_| Ok(None));

        let raw = body("COMPLETED", None);
        let err = usecase(
            MockSubscriptionRepository::new(),
            payments,
            MockPaymentGateway::new(),
            MockUserNotifier::new(),
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn completed_checkout_activates_subscription() {
        let payment = checkout_payment("pending");
        let user_id = payment.user_id;

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(payment.clone())));
        payments
            .expect_settle_payment()
            .withf(|order_id, status, _| order_id == ORDER && *status == PaymentStatus::Completed)
            .times(1)
            .returning(|_, _, _| Ok(true));
        payments.expect_attach_instrument_token().never();

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_find_by_instrument_save_order_id()
            .returning(|_| Ok(None));
        subscriptions
            .expect_create_subscription()
            .withf(move |row| {
                row.user_id == user_id
                    && row.status == "active"
                    && row.billing_cycles == 1
                    && row.total_paid_minor == 4_900
                    && row.next_billing_date == Some(Utc.with_ymd_and_hms(2024, 2, 15, 12, 0, 0).unwrap())
                    && row.instrument_save_order_id.as_deref() == Some(ORDER)
                    && row.chargeable_instrument_ref.as_deref() == Some(ORDER)
            })
            .times(1)
            .returning(|row| Ok(created(row)));

        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, n| matches!(n, UserNotification::SubscriptionActivated { .. }))
            .times(1)
            .returning(|_, _| Ok(()));

        let raw = body("COMPLETED", None);
        let outcome = usecase(
            subscriptions,
            payments,
            gateway_reporting(OrderStatus::Completed),
            notifier,
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            CallbackOutcome::Settled {
                status: PaymentStatus::Completed,
                activated_subscription_id: Some(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn replay_of_activated_checkout_changes_nothing() {
        let payment = checkout_payment("completed");
        let existing = {
            let mut row = created(InsertSubscriptionEntity {
                user_id: payment.user_id,
                plan_id: "pro".into(),
                plan_name: "Pro".into(),
                plan_price_minor: 4_900,
                currency: "PLN".into(),
                period: "monthly".into(),
                status: "active".into(),
                start_date: now(),
                end_date: None,
                next_billing_date: Some(now()),
                instrument_save_order_id: Some(ORDER.into()),
                chargeable_instrument_ref: Some(ORDER.into()),
                payment_method: "card_token".into(),
                total_paid_minor: 4_900,
                billing_cycles: 1,
            });
            row.billing_cycles = 3;
            row
        };

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(payment.clone())));
        payments.expect_settle_payment().never();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_get_order_status().never();

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_find_by_instrument_save_order_id()
            .withf(|order_id| order_id == ORDER)
            .returning(move |_| Ok(Some(existing.clone())));
        subscriptions.expect_create_subscription().never();
        subscriptions.expect_advance_billing_cycle().never();

        let mut notifier = MockUserNotifier::new();
        notifier.expect_notify().never();

        let raw = body("COMPLETED", None);
        let outcome = usecase(subscriptions, payments, gateway, notifier)
            .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
            .await
            .unwrap();

        assert_eq!(outcome, CallbackOutcome::AlreadySettled);
    }

    #[tokio::test]
    async fn redelivery_after_failed_activation_creates_subscription() {
        let status = Arc::new(std::sync::Mutex::new("pending".to_string()));
        let create_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let payment = checkout_payment("pending");

        let mut payments = MockPaymentRepository::new();
        let current = Arc::clone(&status);
        payments.expect_find_by_order_id().returning(move |_| {
            let mut row = payment.clone();
            row.status = current.lock().unwrap().clone();
            Ok(Some(row))
        });
        let settled = Arc::clone(&status);
        payments
            .expect_settle_payment()
            .times(1)
            .returning(move |_, new_status, _| {
                *settled.lock().unwrap() = new_status.to_string();
                Ok(true)
            });

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_find_by_instrument_save_order_id()
            .returning(|_| Ok(None));
        let calls = Arc::clone(&create_calls);
        subscriptions.expect_create_subscription().returning(move |row| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("connection reset"))
            } else {
                Ok(created(row))
            }
        });

        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, n| matches!(n, UserNotification::SubscriptionActivated { .. }))
            .times(1)
            .returning(|_, _| Ok(()));

        let usecase = usecase(
            subscriptions,
            payments,
            gateway_reporting(OrderStatus::Completed),
            notifier,
        );
        let raw = body("COMPLETED", None);
        let signature = sign_payload(SECRET, &raw);

        let err = usecase.handle(&raw, Some(&signature), now()).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status.lock().unwrap().as_str(), "completed");

        let outcome = usecase.handle(&raw, Some(&signature), now()).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::AlreadySettled);
        assert_eq!(create_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn replayed_recurring_callback_keeps_newer_reference() {
        let subscription_id = Uuid::new_v4();
        let charged_ref = "5a6b7c8d-9e0f-4a1b-8c2d-3e4f5a6b7c8d";
        let recovered_ref = "1b2c3d4e-5f6a-4b7c-8d9e-0f1a2b3c4d5e";
        let confirmed = "0f9e8d7c-6b5a-4a3b-8c2d-1e0f9a8b7c6d";

        let mut payment = checkout_payment("completed");
        payment.context = CONTEXT_RECURRING.into();
        payment.recurring_payment_id = Some(subscription_id);
        payment.parent_order_id = Some(charged_ref.into());
        payment.plan_snapshot = None;
        let owner = payment.user_id;

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(payment.clone())));
        payments
            .expect_attach_instrument_token()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions.expect_find_by_id().returning(move |id| {
            let mut row = created(InsertSubscriptionEntity {
                user_id: owner,
                plan_id: "pro".into(),
                plan_name: "Pro".into(),
                plan_price_minor: 4_900,
                currency: "PLN".into(),
                period: "monthly".into(),
                status: "active".into(),
                start_date: now(),
                end_date: None,
                next_billing_date: Some(now()),
                instrument_save_order_id: Some(charged_ref.into()),
                chargeable_instrument_ref: Some(recovered_ref.into()),
                payment_method: "card_token".into(),
                total_paid_minor: 9_800,
                billing_cycles: 2,
            });
            row.id = id;
            Ok(Some(row))
        });
        subscriptions.expect_replace_instrument_ref().never();

        let mut notifier = MockUserNotifier::new();
        notifier.expect_notify().never();

        let raw = body("COMPLETED", Some(confirmed));
        let outcome = usecase(
            subscriptions,
            payments,
            MockPaymentGateway::new(),
            notifier,
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert_eq!(outcome, CallbackOutcome::AlreadySettled);
    }

    #[tokio::test]
    async fn lost_settlement_race_is_a_no_op() {
        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(|_| Ok(Some(checkout_payment("pending"))));
        payments
            .expect_settle_payment()
            .returning(|_, _, _| Ok(false));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions.expect_create_subscription().never();

        let raw = body("COMPLETED", None);
        let outcome = usecase(
            subscriptions,
            payments,
            gateway_reporting(OrderStatus::Completed),
            MockUserNotifier::new(),
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert_eq!(outcome, CallbackOutcome::AlreadySettled);
    }

    #[tokio::test]
    async fn gateway_status_wins_over_notified_status() {
        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(|_| Ok(Some(checkout_payment("pending"))));
        payments.expect_settle_payment().never();

        let raw = body("COMPLETED", None);
        let outcome = usecase(
            MockSubscriptionRepository::new(),
            payments,
            gateway_reporting(OrderStatus::WaitingForConfirmation),
            MockUserNotifier::new(),
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert_eq!(outcome, CallbackOutcome::StillPending);
    }

    #[tokio::test]
    async fn completed_recurring_charge_stores_confirmed_reference() {
        let subscription_id = Uuid::new_v4();
        let mut payment = checkout_payment("pending");
        payment.context = CONTEXT_RECURRING.into();
        payment.recurring_payment_id = Some(subscription_id);
        payment.plan_snapshot = None;
        let confirmed = "0f9e8d7c-6b5a-4a3b-8c2d-1e0f9a8b7c6d";

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(payment.clone())));
        payments
            .expect_settle_payment()
            .returning(|_, _, _| Ok(true));
        payments
            .expect_attach_instrument_token()
            .withf(move |order_id, token| order_id == ORDER && token == confirmed)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_replace_instrument_ref()
            .withf(move |id, reference| *id == subscription_id && reference == confirmed)
            .times(1)
            .returning(|_, _| Ok(()));
        subscriptions.expect_find_by_id().returning(|_| Ok(None));
        subscriptions.expect_create_subscription().never();
        subscriptions.expect_advance_billing_cycle().never();

        let raw = body("COMPLETED", Some(confirmed));
        let outcome = usecase(
            subscriptions,
            payments,
            gateway_reporting(OrderStatus::Completed),
            MockUserNotifier::new(),
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            CallbackOutcome::Settled {
                activated_subscription_id: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejected_recurring_charge_demotes_subscription() {
        let subscription_id = Uuid::new_v4();
        let mut payment = checkout_payment("pending");
        payment.context = CONTEXT_RECURRING.into();
        payment.recurring_payment_id = Some(subscription_id);

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_find_by_order_id()
            .returning(move |_| Ok(Some(payment.clone())));
        payments
            .expect_settle_payment()
            .withf(|_, status, _| *status == PaymentStatus::Rejected)
            .returning(|_, _, _| Ok(true));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_mark_pending()
            .withf(move |id| *id == subscription_id)
            .times(1)
            .returning(|_| Ok(()));
        subscriptions.expect_find_by_id().returning(|_| Ok(None));

        let raw = body("REJECTED", None);
        let outcome = usecase(
            subscriptions,
            payments,
            gateway_reporting(OrderStatus::Rejected),
            MockUserNotifier::new(),
        )
        .handle(&raw, Some(&sign_payload(SECRET, &raw)), now())
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            CallbackOutcome::Settled {
                status: PaymentStatus::Rejected,
                ..
            }
        ));
    }

    #[test]
    fn settlement_mapping() {
        assert_eq!(settlement_status(OrderStatus::Canceled), Some(PaymentStatus::Failed));
        assert_eq!(settlement_status(OrderStatus::Rejected), Some(PaymentStatus::Rejected));
        assert_eq!(settlement_status(OrderStatus::New), None);
    }
}
