use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub gateway: Gateway,
    pub billing: Billing,
    pub notifications: Notifications,
    pub internal_api: InternalApi,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_pool_size: u32,
}

/// Gateway credentials stay optional here; their absence is reported as the fatal
/// auth configuration error when the credential cache is built.
#[derive(Clone)]
pub struct Gateway {
    pub api_base_url: Url,
    pub token_url: Url,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_secret: String,
    pub notify_url: String,
    pub continue_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("notify_url", &self.notify_url)
            .field("continue_url", &self.continue_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Billing {
    pub interval_secs: u64,
    pub claim_ttl_secs: i64,
    pub worker_id: String,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub push_url: Option<Url>,
    pub timeout_secs: u64,
}

#[derive(Clone, Default)]
pub struct InternalApi {
    pub token: Option<String>,
}

impl std::fmt::Debug for InternalApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalApi")
            .field("token_configured", &self.token.is_some())
            .finish()
    }
}
