mod alert_layer;
mod alert_queue;
mod config;
mod webhook;

use std::sync::Arc;

use alert_layer::AlertLayer;
use alert_queue::{AlertQueue, AlertSink};
use anyhow::Result;
use config::AlertConfig;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};
use webhook::ChatWebhookSink;

/// Installs the global subscriber: `RUST_LOG` filter (default `info`), a chrono-stamped
/// fmt layer, and the alert webhook layer when `ALERT_WEBHOOK_URL` is configured.
///
/// Must be called from inside a tokio runtime because the alert queue spawns its
/// delivery task.
pub fn init_observability(component: &str) -> Result<()> {
    let mut config = AlertConfig::from_env(component);

    let alert_layer = match config.sink.as_ref() {
        Some(sink) => match ChatWebhookSink::new(sink.webhook_url.clone()) {
            Ok(webhook) => {
                let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(webhook)];
                Some(
                    AlertLayer::new(AlertQueue::spawn(sinks), config.identity.clone(), sink.min_level)
                        .with_filter(LevelFilter::from_level(sink.min_level)),
                )
            }
            Err(err) => {
                config.warnings.push(err.to_string());
                None
            }
        },
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339());

    let alerts_enabled = alert_layer.is_some();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    for warning in &config.warnings {
        warn!(
            service = %config.identity.service,
            stage = %config.identity.stage,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %config.identity.service,
        stage = %config.identity.stage,
        component = %config.identity.component,
        alerts_enabled,
        "observability: tracing initialised"
    );

    Ok(())
}
