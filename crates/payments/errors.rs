use thiserror::Error;

/// Closed set of failures the gateway boundary can report. Everything downstream
/// matches on these variants and never on upstream message text.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway credentials are not configured: {0}")]
    AuthConfig(&'static str),
    #[error("gateway token exchange failed: {0}")]
    AuthExchange(String),
    #[error("gateway rejected the bearer token ({context}, status {status})")]
    Unauthorized { context: &'static str, status: u16 },
    #[error("no saved instrument for parent order {parent_order_id}: {message}")]
    InstrumentNotFound {
        parent_order_id: String,
        message: String,
    },
    #[error("gateway request failed ({context}, status {status}): {message}")]
    Gateway {
        context: &'static str,
        status: u16,
        message: String,
    },
    #[error("gateway transport error ({context}): {message}")]
    Transport {
        context: &'static str,
        message: String,
    },
    #[error("gateway response could not be decoded ({context}): {message}")]
    Decode {
        context: &'static str,
        message: String,
    },
}

impl GatewayError {
    pub fn is_instrument_not_found(&self) -> bool {
        matches!(self, GatewayError::InstrumentNotFound { .. })
    }

    /// Failures that happen before the gateway could have accepted a charge.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthConfig(_)
                | GatewayError::AuthExchange(_)
                | GatewayError::Unauthorized { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AuthConfig(_) => "auth_config",
            GatewayError::AuthExchange(_) => "auth_exchange",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::InstrumentNotFound { .. } => "instrument_not_found",
            GatewayError::Gateway { .. } => "gateway",
            GatewayError::Transport { .. } => "transport",
            GatewayError::Decode { .. } => "decode",
        }
    }
}
