use anyhow::{Context, Result, bail};
use url::Url;
use uuid::Uuid;

use super::config_model::{
    Billing, Database, DotEnvyConfig, Gateway, InternalApi, Notifications, WorkerServer,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

/// Reads the configuration through `lookup` so tests can supply their own variables.
pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let optional = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let required = |key: &str| optional(key).with_context(|| format!("{key} is not set"));

    let worker_server = WorkerServer {
        port: required("SERVER_PORT_WORKER")?
            .parse()
            .context("SERVER_PORT_WORKER is invalid")?,
        body_limit: optional("SERVER_BODY_LIMIT")
            .unwrap_or_else(|| "1".to_string())
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: optional("SERVER_TIMEOUT")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
        max_pool_size: optional("DATABASE_MAX_POOL_SIZE")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_MAX_POOL_SIZE is invalid")?,
    };

    let gateway = Gateway {
        api_base_url: Url::parse(&required("GATEWAY_API_BASE_URL")?)
            .context("GATEWAY_API_BASE_URL is invalid")?,
        token_url: Url::parse(&required("GATEWAY_TOKEN_URL")?)
            .context("GATEWAY_TOKEN_URL is invalid")?,
        client_id: optional("GATEWAY_CLIENT_ID"),
        client_secret: optional("GATEWAY_CLIENT_SECRET"),
        callback_secret: required("GATEWAY_CALLBACK_SECRET")?,
        notify_url: required("GATEWAY_NOTIFY_URL")?,
        continue_url: optional("GATEWAY_CONTINUE_URL"),
        request_timeout_secs: optional("GATEWAY_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "15".to_string())
            .parse()
            .context("GATEWAY_REQUEST_TIMEOUT_SECS is invalid")?,
    };
    if gateway.request_timeout_secs == 0 {
        bail!("GATEWAY_REQUEST_TIMEOUT_SECS must be greater than zero");
    }

    let billing = Billing {
        interval_secs: optional("BILLING_INTERVAL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse()
            .context("BILLING_INTERVAL_SECS is invalid")?,
        claim_ttl_secs: optional("BILLING_CLAIM_TTL_SECS")
            .unwrap_or_else(|| "900".to_string())
            .parse()
            .context("BILLING_CLAIM_TTL_SECS is invalid")?,
        worker_id: optional("BILLING_WORKER_ID")
            .unwrap_or_else(|| format!("billing-worker-{}", Uuid::new_v4())),
    };
    if billing.interval_secs == 0 {
        bail!("BILLING_INTERVAL_SECS must be greater than zero");
    }
    if billing.claim_ttl_secs <= 0 {
        bail!("BILLING_CLAIM_TTL_SECS must be greater than zero");
    }

    let notifications = Notifications {
        push_url: optional("PUSH_NOTIFICATION_URL")
            .map(|raw| Url::parse(&raw))
            .transpose()
            .context("PUSH_NOTIFICATION_URL is invalid")?,
        timeout_secs: optional("PUSH_NOTIFICATION_TIMEOUT_SECS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("PUSH_NOTIFICATION_TIMEOUT_SECS is invalid")?,
    };

    let internal_api = InternalApi {
        token: optional("INTERNAL_API_TOKEN"),
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        gateway,
        billing,
        notifications,
        internal_api,
    })
}
