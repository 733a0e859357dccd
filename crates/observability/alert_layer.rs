use std::{collections::BTreeMap, fmt};

use chrono::Utc;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

use super::{
    alert_queue::{ALERTS_TARGET, AlertEvent, AlertQueue},
    config::ServiceIdentity,
};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_FIELD_FRAGMENTS: &[&str] = &["token", "secret", "authorization", "password", "webhook"];

/// Forwards events at or above `min_level` to the alert queue.
pub(crate) struct AlertLayer {
    queue: AlertQueue,
    identity: ServiceIdentity,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(queue: AlertQueue, identity: ServiceIdentity, min_level: Level) -> Self {
        Self {
            queue,
            identity,
            min_level,
        }
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: String) {
        let name = field.name();
        if name == "message" {
            self.message = Some(value);
            return;
        }
        let value = if is_sensitive(name) {
            REDACTED.to_string()
        } else {
            value
        };
        self.fields.insert(name.to_string(), value);
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // tracing orders levels by verbosity: ERROR is the smallest.
        if *metadata.level() > self.min_level {
            return;
        }
        // The queue's own diagnostics must not be re-queued.
        if metadata.target() == ALERTS_TARGET {
            return;
        }

        let mut visitor = EventFields::default();
        event.record(&mut visitor);

        let span_path = ctx
            .event_scope(event)
            .map(|scope| {
                scope
                    .from_root()
                    .map(|span| span.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        self.queue.push(AlertEvent {
            level: *metadata.level(),
            at: Utc::now(),
            service: self.identity.service.clone(),
            stage: self.identity.stage.clone(),
            component: self.identity.component.clone(),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            span_path,
        });
    }
}

fn is_sensitive(field_name: &str) -> bool {
    let lowered = field_name.to_ascii_lowercase();
    SENSITIVE_FIELD_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}
