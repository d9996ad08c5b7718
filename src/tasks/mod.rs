pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::UserTask;

/// Supplies the ordered list of checks assigned to a user.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn user_tasks(&self, user_id: Uuid) -> Result<Vec<UserTask>>;
}
