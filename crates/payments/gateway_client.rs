use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{error, info, warn};
use url::Url;

use crate::domain::value_objects::gateway::{
    ChargeReceipt, CreatedOrder, OrderRequest, OrderStatus, OrderStatusReport,
    StoredInstrumentCharge,
};

use super::{
    credential_cache::CredentialCache,
    error_classifier::{classify_failure, extract_message},
    errors::GatewayError,
    gateway::PaymentGateway,
};

const ORDERS_PATH: &str = "api/v1/orders";
const RECURRING_ORDERS_PATH: &str = "api/v1/orders/recurring";

/// Thin JSON wrapper over the gateway's order API. Every call asks the
/// [`CredentialCache`] for a token and drops it from the cache on 401.
pub struct GatewayClient {
    http: Client,
    api_base_url: Url,
    credentials: Arc<CredentialCache>,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    ext_order_id: &'a str,
    description: &'a str,
    currency_code: &'a str,
    total_amount: i64,
    customer_ip: &'a str,
    notify_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    continue_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer: Option<BuyerBody<'a>>,
    save_instrument: bool,
}

#[derive(Debug, Serialize)]
struct BuyerBody<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct RecurringChargeBody<'a> {
    parent_order_id: &'a str,
    external_order_id: &'a str,
    total_amount: i64,
    currency_code: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    #[serde(alias = "id", alias = "orderId")]
    order_id: String,
    #[serde(alias = "redirectUri", alias = "redirect_uri")]
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    #[serde(default, alias = "id", alias = "orderId")]
    order_id: Option<String>,
    status: String,
    #[serde(default, alias = "statusDesc", alias = "message")]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    #[serde(alias = "order_id", alias = "orderId")]
    id: String,
}

impl GatewayClient {
    pub fn new(
        api_base_url: Url,
        credentials: Arc<CredentialCache>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| GatewayError::Transport {
                context: "build gateway client",
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            api_base_url: normalize_base(api_base_url),
            credentials,
        })
    }

    fn endpoint(&self, context: &'static str, path: &str) -> Result<Url, GatewayError> {
        self.api_base_url
            .join(path)
            .map_err(|err| GatewayError::Transport {
                context,
                message: format!("invalid gateway url for {path}: {err}"),
            })
    }

    async fn send(
        &self,
        context: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let token = self.credentials.get_token().await?;

        let response = request
            .bearer_auth(&token)
            .send()
            .await
            .map_err(sanitize_reqwest_error)
            .map_err(|message| {
                error!(context, error = %message, "gateway_client: request failed");
                GatewayError::Transport { context, message }
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.credentials.invalidate(&token).await;
        }
        Ok(response)
    }

    async fn ensure_success(
        &self,
        response: Response,
        context: &'static str,
        parent_order_id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(text) => text,
            Err(err) => format!("<failed to read response body: {err}>"),
        };
        let message = extract_message(&body);

        let classified = classify_failure(context, status.as_u16(), message, parent_order_id);
        match &classified {
            GatewayError::InstrumentNotFound { .. } => warn!(
                context,
                status = status.as_u16(),
                parent_order_id = ?parent_order_id,
                error = %classified,
                "gateway_client: saved instrument could not be resolved"
            ),
            _ => error!(
                context,
                status = status.as_u16(),
                kind = classified.kind(),
                error = %classified,
                "gateway_client: gateway request failed"
            ),
        }

        Err(classified)
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        context: &'static str,
    ) -> Result<T, GatewayError> {
        response.json::<T>().await.map_err(|err| GatewayError::Decode {
            context,
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_order(&self, request: OrderRequest) -> Result<CreatedOrder, GatewayError> {
        const CONTEXT: &str = "create order";

        let body = CreateOrderBody {
            ext_order_id: &request.external_order_id,
            description: &request.description,
            currency_code: &request.currency,
            total_amount: request.total_amount_minor,
            customer_ip: &request.customer_ip,
            notify_url: &request.notify_url,
            continue_url: request.continue_url.as_deref(),
            buyer: request
                .buyer_email
                .as_deref()
                .map(|email| BuyerBody { email }),
            save_instrument: request.save_instrument,
        };

        let url = self.endpoint(CONTEXT, ORDERS_PATH)?;
        let response = self.send(CONTEXT, self.http.post(url).json(&body)).await?;
        let response = self.ensure_success(response, CONTEXT, None).await?;
        let parsed: CreateOrderResponse = Self::decode(response, CONTEXT).await?;

        info!(
            order_id = %parsed.order_id,
            external_order_id = %request.external_order_id,
            "gateway_client: order created"
        );

        Ok(CreatedOrder {
            order_id: parsed.order_id,
            redirect_url: parsed.redirect_url,
        })
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, GatewayError> {
        const CONTEXT: &str = "get order status";

        let url = self.endpoint(CONTEXT, &format!("{ORDERS_PATH}/{order_id}"))?;
        let response = self.send(CONTEXT, self.http.get(url)).await?;
        let response = self.ensure_success(response, CONTEXT, None).await?;
        let parsed: OrderStatusResponse = Self::decode(response, CONTEXT).await?;

        let status = OrderStatus::from_str(&parsed.status).ok_or_else(|| GatewayError::Decode {
            context: CONTEXT,
            message: format!("unknown order status {}", parsed.status),
        })?;

        Ok(OrderStatusReport {
            order_id: parsed.order_id.unwrap_or_else(|| order_id.to_string()),
            status,
            detail: parsed.detail,
        })
    }

    async fn charge_stored_instrument(
        &self,
        charge: StoredInstrumentCharge,
    ) -> Result<ChargeReceipt, GatewayError> {
        const CONTEXT: &str = "charge stored instrument";

        let body = RecurringChargeBody {
            parent_order_id: &charge.parent_order_id,
            external_order_id: &charge.external_order_id,
            total_amount: charge.amount_minor,
            currency_code: &charge.currency,
            description: &charge.description,
        };

        let url = self.endpoint(CONTEXT, RECURRING_ORDERS_PATH)?;
        let response = self.send(CONTEXT, self.http.post(url).json(&body)).await?;
        let response = self
            .ensure_success(response, CONTEXT, Some(&charge.parent_order_id))
            .await?;
        let parsed: ChargeResponse = Self::decode(response, CONTEXT).await?;

        if parsed.id.trim().is_empty() {
            return Err(GatewayError::Decode {
                context: CONTEXT,
                message: "gateway accepted the charge without an order id".to_string(),
            });
        }

        info!(
            order_id = %parsed.id,
            parent_order_id = %charge.parent_order_id,
            external_order_id = %charge.external_order_id,
            amount_minor = charge.amount_minor,
            "gateway_client: stored instrument charged"
        );

        Ok(ChargeReceipt { order_id: parsed.id })
    }
}

/// `Url::join` drops the last path segment unless the base ends with '/'.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn sanitize_reqwest_error(err: reqwest::Error) -> String {
    if err.is_timeout() {
        return "request timed out".to_string();
    }
    if err.is_connect() {
        return "connection failed".to_string();
    }
    err.without_url().to_string()
}
