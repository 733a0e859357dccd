use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::value_objects::notifications::UserNotification;

#[automock]
#[async_trait]
pub trait UserNotifier {
    async fn notify(&self, user_id: Uuid, notification: UserNotification) -> Result<()>;
}
