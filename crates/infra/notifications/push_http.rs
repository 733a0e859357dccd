use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::domain::{
    repositories::notifications::UserNotifier, value_objects::notifications::UserNotification,
};

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    user_id: Uuid,
    title: &'a str,
    data: &'a UserNotification,
}

/// Posts user notifications to the push dispatch service. With no endpoint
/// configured, notifications are logged and dropped.
pub struct PushNotificationClient {
    endpoint: Option<Url>,
    client: Client,
}

impl PushNotificationClient {
    pub fn new(endpoint: Option<Url>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl UserNotifier for PushNotificationClient {
    async fn notify(&self, user_id: Uuid, notification: UserNotification) -> Result<()> {
        let Some(endpoint) = self.endpoint.clone() else {
            debug!(
                %user_id,
                kind = notification.title(),
                "push_notifications: endpoint not configured; dropping notification"
            );
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .json(&PushRequest {
                user_id,
                title: notification.title(),
                data: &notification,
            })
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "push notification service returned non-success status: {}",
            response.status()
        ))
    }
}

fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("push notification request timed out");
    }
    if error.is_connect() {
        return anyhow!("push notification connection failed");
    }
    anyhow!("push notification request failed")
}
