use std::env;

use tracing::Level;
use url::Url;

/// Identity stamped on every forwarded alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceIdentity {
    pub(crate) service: String,
    pub(crate) stage: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AlertSinkConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Debug, Clone)]
pub(crate) struct AlertConfig {
    pub(crate) identity: ServiceIdentity,
    pub(crate) sink: Option<AlertSinkConfig>,
    /// Problems found while reading the environment; logged once tracing is up.
    pub(crate) warnings: Vec<String>,
}

impl AlertConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(component: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let component = component.trim().to_string();

        let identity = ServiceIdentity {
            service: non_empty("SERVICE_NAME").unwrap_or_else(|| component.clone()),
            stage: non_empty("STAGE").unwrap_or_else(|| "unknown".to_string()),
            component,
        };

        let mut warnings = Vec::new();

        let enabled = match non_empty("ALERT_NOTIFY_ENABLED") {
            None => true,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "ALERT_NOTIFY_ENABLED has unrecognised value {raw}; treating as enabled"
                ));
                true
            }),
        };

        let webhook_url = non_empty("ALERT_WEBHOOK_URL").and_then(|raw| match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(err) => {
                // The URL embeds a credential, so only the parse error is reported.
                warnings.push(format!(
                    "ALERT_WEBHOOK_URL is not a valid url ({err}); alerts disabled"
                ));
                None
            }
        });

        let min_level = match non_empty("ALERT_NOTIFY_LEVEL") {
            None => Level::ERROR,
            Some(raw) => parse_level(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "ALERT_NOTIFY_LEVEL has unrecognised value {raw}; using ERROR"
                ));
                Level::ERROR
            }),
        };

        let sink = match (enabled, webhook_url) {
            (true, Some(webhook_url)) => Some(AlertSinkConfig {
                webhook_url,
                min_level,
            }),
            _ => None,
        };

        Self {
            identity,
            sink,
            warnings,
        }
    }
}

fn parse_level(raw: &str) -> Option<Level> {
    match raw.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
