use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use url::Url;

use super::alert_queue::{AlertEvent, AlertSink};

/// Chat webhooks (Discord and compatible) reject messages above this many characters.
const MESSAGE_LIMIT: usize = 2000;

pub(crate) struct ChatWebhookSink {
    client: Client,
    url: Url,
}

impl ChatWebhookSink {
    pub(crate) fn new(url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|err| anyhow!("alert webhook client could not be built: {err}"))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSink for ChatWebhookSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "content": render(event) }))
            .send()
            .await
            // reqwest errors carry the url, which holds the webhook credential.
            .map_err(|err| anyhow!("alert webhook request failed: {}", err.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("alert webhook answered {status}"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chat_webhook"
    }
}

pub(crate) fn render(event: &AlertEvent) -> String {
    let mut out = format!(
        "**{}** [{}] {} `{}`\n{} `{}`",
        event.service,
        event.stage,
        event.component,
        event.level,
        event.at.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.target,
    );

    if !event.message.is_empty() {
        out.push_str("\n> ");
        out.push_str(&event.message);
    }
    if !event.span_path.is_empty() {
        out.push_str(&format!("\nin `{}`", event.span_path.join(" > ")));
    }
    for (key, value) in &event.fields {
        out.push_str(&format!("\n- `{key}`: `{value}`"));
    }

    if out.chars().count() > MESSAGE_LIMIT {
        let marker = "\n[truncated]";
        let keep = MESSAGE_LIMIT - marker.len();
        out = out.chars().take(keep).collect::<String>() + marker;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tracing::Level;

    fn event(fields: BTreeMap<String, String>) -> AlertEvent {
        AlertEvent {
            level: Level::ERROR,
            at: Utc::now(),
            service: "billing".into(),
            stage: "prod".into(),
            component: "worker".into(),
            target: "billing_worker::usecases::billing_run".into(),
            message: "billing_run: subscription demoted to pending".into(),
            fields,
            span_path: vec!["billing_run".into()],
        }
    }

    #[test]
    fn render_includes_message_and_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("subscription_id".to_string(), "abc".to_string());
        let text = render(&event(fields));
        assert!(text.contains("subscription demoted to pending"));
        assert!(text.contains("`subscription_id`: `abc`"));
        assert!(text.contains("in `billing_run`"));
    }

    #[test]
    fn render_respects_message_limit() {
        let mut fields = BTreeMap::new();
        fields.insert("reason".to_string(), "x".repeat(5000));
        let text = render(&event(fields));
        assert_eq!(text.chars().count(), MESSAGE_LIMIT);
        assert!(text.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn deliver_posts_content_json() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hooks/abc")
            .match_body(mockito::Matcher::Regex("\"content\"".into()))
            .with_status(204)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/hooks/abc", server.url())).unwrap();
        let sink = ChatWebhookSink::new(url).unwrap();
        sink.deliver(&event(BTreeMap::new())).await.unwrap();

        hook.assert_async().await;
    }
}
