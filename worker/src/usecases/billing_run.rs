use std::{collections::VecDeque, sync::Arc};

use billing_core::{
    domain::{
        entities::{payments::NewPaymentEntity, subscriptions::SubscriptionEntity},
        repositories::{
            notifications::UserNotifier, payments::PaymentRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::{
            billing::{BillingRunSummary, CONTEXT_RECURRING, ChargeOutcome, SkipReason},
            enums::{
                payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
                subscription_statuses::SubscriptionStatus,
            },
            gateway::{ChargeReceipt, StoredInstrumentCharge},
            notifications::UserNotification,
        },
    },
    payments::{errors::GatewayError, gateway::PaymentGateway},
};
use chrono::{DateTime, Datelike, Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::token_recovery::{RecoveryOutcome, TokenRecoveryUseCase};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("subscription store failure: {0}")]
    Store(anyhow::Error),
    #[error("payment ledger failure: {0}")]
    Ledger(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct BillingRunSettings {
    pub worker_id: String,
    pub claim_ttl: Duration,
}

/// Due subscriptions of one run, drained front to back.
#[derive(Debug, Default)]
pub struct BillingWorkQueue {
    items: VecDeque<SubscriptionEntity>,
}

impl BillingWorkQueue {
    /// Orders by `next_billing_date` ascending. The sort is stable, so ties keep the
    /// store's order.
    pub fn from_due(mut due: Vec<SubscriptionEntity>) -> Self {
        due.sort_by_key(|subscription| subscription.next_billing_date);
        Self { items: due.into() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Iterator for BillingWorkQueue {
    type Item = SubscriptionEntity;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.pop_front()
    }
}

pub struct BillingRunUseCase {
    subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
    payments: Arc<dyn PaymentRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn UserNotifier + Send + Sync>,
    recovery: TokenRecoveryUseCase,
    settings: BillingRunSettings,
}

impl BillingRunUseCase {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
        payments: Arc<dyn PaymentRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn UserNotifier + Send + Sync>,
        settings: BillingRunSettings,
    ) -> Self {
        let recovery = TokenRecoveryUseCase::new(
            Arc::clone(&subscriptions),
            Arc::clone(&payments),
            Arc::clone(&gateway),
        );

        Self {
            subscriptions,
            payments,
            gateway,
            notifier,
            recovery,
            settings,
        }
    }

    /// One scheduler tick. Only discovery can fail the run as a whole; everything after
    /// that is isolated per subscription.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<BillingRunSummary, BillingError> {
        let due = self
            .subscriptions
            .find_due_for_billing(now)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "billing_run: failed to load due subscriptions");
                BillingError::Store(err)
            })?;

        let queue = BillingWorkQueue::from_due(due);
        let mut summary = BillingRunSummary {
            due: queue.len(),
            ..Default::default()
        };

        info!(
            due = summary.due,
            worker_id = %self.settings.worker_id,
            "billing_run: started"
        );

        for subscription in queue {
            let subscription_id = subscription.id;
            match self.process_subscription(&subscription, now).await {
                Ok(outcome) => summary.record(subscription_id, &outcome),
                Err(err) => {
                    // Not retried within this run.
                    summary.persistence_errors += 1;
                    error!(
                        %subscription_id,
                        error = %err,
                        "billing_run: subscription outcome could not be persisted"
                    );
                }
            }
        }

        match self
            .subscriptions
            .count_by_status(SubscriptionStatus::Pending)
            .await
        {
            Ok(pending) => info!(
                due = summary.due,
                charged = summary.charged,
                recovered = summary.recovered,
                demoted = summary.demoted,
                skipped = summary.skipped,
                persistence_errors = summary.persistence_errors,
                pending_subscriptions = pending,
                "billing_run: finished"
            ),
            Err(err) => {
                warn!(db_error = ?err, "billing_run: failed to count pending subscriptions");
                info!(
                    due = summary.due,
                    charged = summary.charged,
                    recovered = summary.recovered,
                    demoted = summary.demoted,
                    skipped = summary.skipped,
                    persistence_errors = summary.persistence_errors,
                    "billing_run: finished"
                );
            }
        }

        Ok(summary)
    }

    /// Claim, charge, recover at most once, then record and advance or demote.
    ///
    /// `Err` means a store or ledger write failed after the attempt started; the
    /// gateway's answer has already been logged by then.
    pub async fn process_subscription(
        &self,
        subscription: &SubscriptionEntity,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome, BillingError> {
        let (Some(due_date), Some(instrument_ref)) = (
            subscription.next_billing_date,
            subscription.chargeable_ref().map(str::to_string),
        ) else {
            return Ok(ChargeOutcome::Skipped {
                reason: SkipReason::NotDue,
            });
        };
        if !subscription.is_due(now) {
            return Ok(ChargeOutcome::Skipped {
                reason: SkipReason::NotDue,
            });
        }

        let claimed = self
            .subscriptions
            .claim_for_billing(
                subscription.id,
                &self.settings.worker_id,
                now,
                now + self.settings.claim_ttl,
            )
            .await
            .map_err(BillingError::Store)?;
        if !claimed {
            info!(
                subscription_id = %subscription.id,
                "billing_run: subscription claimed by another worker; skipping"
            );
            return Ok(ChargeOutcome::Skipped {
                reason: SkipReason::ClaimedElsewhere,
            });
        }

        // Anchored on the previous due date so scheduler jitter never shifts the cycle.
        let Some(next_billing_date) = subscription
            .billing_period()
            .and_then(|period| period.advance_anchored(due_date, subscription.start_date.day()))
        else {
            let reason = format!("cannot advance billing period {:?}", subscription.period);
            return self.demote(subscription, reason).await;
        };

        let charge = StoredInstrumentCharge {
            parent_order_id: instrument_ref,
            amount_minor: subscription.plan_price_minor,
            currency: subscription.currency.clone(),
            external_order_id: external_order_id(subscription.user_id),
            description: format!("{} subscription renewal", subscription.plan_name),
        };

        let external_order_id = charge.external_order_id.clone();
        let (receipt, charged_ref, recovered) = match self
            .gateway
            .charge_stored_instrument(charge.clone())
            .await
        {
            Ok(receipt) => (receipt, charge.parent_order_id.clone(), false),
            Err(err) if err.is_instrument_not_found() => {
                warn!(
                    subscription_id = %subscription.id,
                    instrument_ref = %charge.parent_order_id,
                    "billing_run: stored instrument not found; attempting recovery"
                );
                match self
                    .recovery
                    .recover_and_retry(subscription, charge, err)
                    .await?
                {
                    RecoveryOutcome::Recovered {
                        receipt,
                        instrument_ref,
                    } => (receipt, instrument_ref, true),
                    RecoveryOutcome::Unrecoverable { error } => {
                        return self
                            .handle_charge_failure(subscription, error, &external_order_id)
                            .await;
                    }
                }
            }
            Err(err) => {
                return self
                    .handle_charge_failure(subscription, err, &external_order_id)
                    .await;
            }
        };

        self.record_and_advance(
            subscription,
            receipt,
            charged_ref,
            external_order_id,
            next_billing_date,
            recovered,
        )
        .await
    }

    async fn handle_charge_failure(
        &self,
        subscription: &SubscriptionEntity,
        err: GatewayError,
        external_order_id: &str,
    ) -> Result<ChargeOutcome, BillingError> {
        if err.is_auth_failure() {
            // Nothing reached the gateway's charge endpoint; try again next tick.
            warn!(
                subscription_id = %subscription.id,
                kind = err.kind(),
                error = %err,
                "billing_run: gateway auth unavailable; leaving subscription active"
            );
            self.subscriptions
                .release_claim(subscription.id, &self.settings.worker_id)
                .await
                .map_err(BillingError::Store)?;
            return Ok(ChargeOutcome::Skipped {
                reason: SkipReason::GatewayAuthUnavailable,
            });
        }

        warn!(
            subscription_id = %subscription.id,
            external_order_id,
            kind = err.kind(),
            error = %err,
            "billing_run: charge failed"
        );
        self.demote(subscription, err.to_string()).await
    }

    async fn demote(
        &self,
        subscription: &SubscriptionEntity,
        reason: String,
    ) -> Result<ChargeOutcome, BillingError> {
        self.subscriptions
            .mark_pending(subscription.id)
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    db_error = ?err,
                    "billing_run: failed to demote subscription"
                );
                BillingError::Store(err)
            })?;

        error!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            plan_id = %subscription.plan_id,
            reason = %reason,
            "billing_run: subscription demoted to pending"
        );

        self.notify(
            subscription.user_id,
            UserNotification::SubscriptionSuspended {
                subscription_id: subscription.id,
                plan_name: subscription.plan_name.clone(),
            },
        )
        .await;

        Ok(ChargeOutcome::Demoted { reason })
    }

    async fn record_and_advance(
        &self,
        subscription: &SubscriptionEntity,
        receipt: ChargeReceipt,
        charged_ref: String,
        external_order_id: String,
        next_billing_date: DateTime<Utc>,
        recovered: bool,
    ) -> Result<ChargeOutcome, BillingError> {
        let payment = NewPaymentEntity {
            user_id: subscription.user_id,
            order_id: receipt.order_id.clone(),
            amount_minor: subscription.plan_price_minor,
            currency: subscription.currency.clone(),
            payment_method: PaymentMethod::CardToken.to_string(),
            context: CONTEXT_RECURRING.to_string(),
            is_recurring: true,
            parent_order_id: Some(charged_ref),
            external_order_id: Some(external_order_id),
            recurring_payment_id: Some(subscription.id),
            payment_token: None,
            plan_snapshot: None,
            status: PaymentStatus::Pending.to_string(),
        };

        let ledger_result = self.payments.record_payment(payment).await;
        if let Err(err) = &ledger_result {
            // The gateway accepted the charge, so the cycle still advances below;
            // otherwise the next run would charge the same period again.
            error!(
                subscription_id = %subscription.id,
                order_id = %receipt.order_id,
                db_error = ?err,
                "billing_run: failed to record accepted charge"
            );
        }

        self.subscriptions
            .advance_billing_cycle(
                subscription.id,
                subscription.plan_price_minor,
                next_billing_date,
            )
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription.id,
                    order_id = %receipt.order_id,
                    db_error = ?err,
                    "billing_run: failed to advance billing cycle after accepted charge"
                );
                BillingError::Store(err)
            })?;

        ledger_result.map_err(BillingError::Ledger)?;

        info!(
            subscription_id = %subscription.id,
            order_id = %receipt.order_id,
            %next_billing_date,
            recovered,
            "billing_run: subscription charged"
        );

        Ok(ChargeOutcome::Charged {
            order_id: receipt.order_id,
            next_billing_date,
            recovered,
        })
    }

    async fn notify(&self, user_id: Uuid, notification: UserNotification) {
        if let Err(err) = self.notifier.notify(user_id, notification).await {
            warn!(%user_id, error = %err, "billing_run: user notification failed");
        }
    }
}

/// Correlation id sent to the gateway; embeds the owner for debuggability.
fn external_order_id(user_id: Uuid) -> String {
    format!("{user_id}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_core::{
        domain::repositories::{
            notifications::MockUserNotifier, payments::MockPaymentRepository,
            subscriptions::MockSubscriptionRepository,
        },
        payments::gateway::MockPaymentGateway,
    };
    use chrono::TimeZone;

    const REF: &str = "9a4a39f5-7f0e-4f5c-9d0c-2f8a0d1b7e11";

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn subscription(next_billing_date: DateTime<Utc>) -> SubscriptionEntity {
        let created = at(2023, 12, 1);
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            plan_name: "Pro".into(),
            plan_price_minor: 4_900,
            currency: "PLN".into(),
            period: "monthly".into(),
            status: "active".into(),
            start_date: created,
            end_date: None,
            next_billing_date: Some(next_billing_date),
            instrument_save_order_id: Some(REF.into()),
            chargeable_instrument_ref: Some(REF.into()),
            payment_method: "card_token".into(),
            total_paid_minor: 4_900,
            billing_cycles: 1,
            billing_claimed_by: None,
            billing_claimed_until: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn settings() -> BillingRunSettings {
        BillingRunSettings {
            worker_id: "worker-a".into(),
            claim_ttl: Duration::minutes(15),
        }
    }

    fn quiet_notifier() -> MockUserNotifier {
        let mut notifier = MockUserNotifier::new();
        notifier.expect_notify().returning(|_, _| Ok(()));
        notifier
    }

    fn usecase(
        subscriptions: MockSubscriptionRepository,
        payments: MockPaymentRepository,
        gateway: MockPaymentGateway,
        notifier: MockUserNotifier,
    ) -> BillingRunUseCase {
        BillingRunUseCase::new(
            Arc::new(subscriptions),
            Arc::new(payments),
            Arc::new(gateway),
            Arc::new(notifier),
            settings(),
        )
    }

    #[test]
    fn work_queue_is_oldest_due_first() {
        let late = subscription(at(2024, 1, 5));
        let early = subscription(at(2024, 1, 1));
        let early_id = early.id;

        let mut queue = BillingWorkQueue::from_due(vec![late, early]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().map(|s| s.id), Some(early_id));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn successful_charge_records_pending_payment_and_advances_from_due_date() {
        let sub = subscription(at(2024, 1, 1));
        let sub_id = sub.id;
        let owner = sub.user_id.to_string();
        let now = at(2024, 1, 3);

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_claim_for_billing()
            .withf(move |id, worker, _, until| {
                *id == sub_id && worker == "worker-a" && *until == now + Duration::minutes(15)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        subscriptions
            .expect_advance_billing_cycle()
            .withf(move |id, amount, next| {
                *id == sub_id && *amount == 4_900 && *next == at(2024, 2, 1)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        subscriptions.expect_mark_pending().never();

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_record_payment()
            .withf(move |payment| {
                payment.order_id == "order-2"
                    && payment.status == "pending"
                    && payment.context == CONTEXT_RECURRING
                    && payment.parent_order_id.as_deref() == Some(REF)
                    && payment.recurring_payment_id == Some(sub_id)
                    && payment
                        .external_order_id
                        .as_deref()
                        .is_some_and(|ext| ext.starts_with(&owner))
            })
            .times(1)
            .returning(|payment| {
                Ok(billing_core::domain::entities::payments::PaymentEntity {
                    id: Uuid::new_v4(),
                    user_id: payment.user_id,
                    order_id: payment.order_id,
                    amount_minor: payment.amount_minor,
                    currency: payment.currency,
                    payment_method: payment.payment_method,
                    context: payment.context,
                    is_recurring: payment.is_recurring,
                    parent_order_id: payment.parent_order_id,
                    external_order_id: payment.external_order_id,
                    recurring_payment_id: payment.recurring_payment_id,
                    payment_token: payment.payment_token,
                    plan_snapshot: payment.plan_snapshot,
                    status: payment.status,
                    settled_at: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            });

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge_stored_instrument()
            .withf(|charge| charge.parent_order_id == REF && charge.amount_minor == 4_900)
            .times(1)
            .returning(|_| {
                Ok(ChargeReceipt {
                    order_id: "order-2".into(),
                })
            });

        let outcome = usecase(subscriptions, payments, gateway, MockUserNotifier::new())
            .process_subscription(&sub, now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ChargeOutcome::Charged {
                order_id: "order-2".into(),
                next_billing_date: at(2024, 2, 1),
                recovered: false,
            }
        );
    }

    #[tokio::test]
    async fn declined_charge_demotes_and_notifies() {
        let sub = subscription(at(2024, 1, 1));
        let sub_id = sub.id;

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_claim_for_billing()
            .returning(|_, _, _, _| Ok(true));
        subscriptions
            .expect_mark_pending()
            .withf(move |id| *id == sub_id)
            .times(1)
            .returning(|_| Ok(()));
        subscriptions.expect_advance_billing_cycle().never();

        let mut payments = MockPaymentRepository::new();
        payments.expect_record_payment().never();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_charge_stored_instrument().returning(|_| {
            Err(GatewayError::Gateway {
                context: "charge stored instrument",
                status: 402,
                message: "Insufficient funds".into(),
            })
        });

        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, notification| {
                matches!(notification, UserNotification::SubscriptionSuspended { .. })
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = usecase(subscriptions, payments, gateway, notifier)
            .process_subscription(&sub, at(2024, 1, 3))
            .await
            .unwrap();

        assert!(matches!(outcome, ChargeOutcome::Demoted { reason } if reason.contains("Insufficient funds")));
    }

    #[tokio::test]
    async fn auth_failure_releases_claim_without_demotion() {
        let sub = subscription(at(2024, 1, 1));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_claim_for_billing()
            .returning(|_, _, _, _| Ok(true));
        subscriptions
            .expect_release_claim()
            .withf(|_, worker| worker == "worker-a")
            .times(1)
            .returning(|_, _| Ok(()));
        subscriptions.expect_mark_pending().never();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge_stored_instrument()
            .returning(|_| Err(GatewayError::AuthExchange("token endpoint returned status 503".into())));

        let outcome = usecase(
            subscriptions,
            MockPaymentRepository::new(),
            gateway,
            MockUserNotifier::new(),
        )
        .process_subscription(&sub, at(2024, 1, 3))
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ChargeOutcome::Skipped {
                reason: SkipReason::GatewayAuthUnavailable
            }
        );
    }

    #[tokio::test]
    async fn claimed_elsewhere_is_skipped_without_charging() {
        let sub = subscription(at(2024, 1, 1));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_claim_for_billing()
            .returning(|_, _, _, _| Ok(false));

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_charge_stored_instrument().never();

        let outcome = usecase(
            subscriptions,
            MockPaymentRepository::new(),
            gateway,
            MockUserNotifier::new(),
        )
        .process_subscription(&sub, at(2024, 1, 3))
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ChargeOutcome::Skipped {
                reason: SkipReason::ClaimedElsewhere
            }
        );
    }

    #[tokio::test]
    async fn not_yet_due_is_skipped_without_claiming() {
        let sub = subscription(at(2024, 2, 1));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions.expect_claim_for_billing().never();

        let outcome = usecase(
            subscriptions,
            MockPaymentRepository::new(),
            MockPaymentGateway::new(),
            MockUserNotifier::new(),
        )
        .process_subscription(&sub, at(2024, 1, 3))
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ChargeOutcome::Skipped {
                reason: SkipReason::NotDue
            }
        );
    }

    #[tokio::test]
    async fn ledger_failure_still_advances_and_is_counted() {
        let sub = subscription(at(2024, 1, 1));

        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_find_due_for_billing()
            .returning(move |_| Ok(vec![sub.clone()]));
        subscriptions
            .expect_claim_for_billing()
            .returning(|_, _, _, _| Ok(true));
        subscriptions
            .expect_advance_billing_cycle()
            .times(1)
            .returning(|_, _, _| Ok(()));
        subscriptions
            .expect_count_by_status()
            .returning(|_| Ok(0));

        let mut payments = MockPaymentRepository::new();
        payments
            .expect_record_payment()
            .returning(|_| Err(anyhow::anyhow!("unique violation")));

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_charge_stored_instrument().returning(|_| {
            Ok(ChargeReceipt {
                order_id: "order-2".into(),
            })
        });

        let summary = usecase(subscriptions, payments, gateway, quiet_notifier())
            .run(at(2024, 1, 3))
            .await
            .unwrap();

        assert_eq!(summary.due, 1);
        assert_eq!(summary.charged, 0);
        assert_eq!(summary.persistence_errors, 1);
    }

    #[tokio::test]
    async fn discovery_failure_fails_the_run() {
        let mut subscriptions = MockSubscriptionRepository::new();
        subscriptions
            .expect_find_due_for_billing()
            .returning(|_| Err(anyhow::anyhow!("pool timed out")));

        let err = usecase(
            subscriptions,
            MockPaymentRepository::new(),
            MockPaymentGateway::new(),
            MockUserNotifier::new(),
        )
        .run(at(2024, 1, 3))
        .await
        .unwrap_err();

        assert!(matches!(err, BillingError::Store(_)));
    }
}
