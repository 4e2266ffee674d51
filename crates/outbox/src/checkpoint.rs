//! Where each subscriber has read up to in the global event log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::Result;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last sequence delivered to `subscriber`, or 0 before the first delivery.
    async fn load(&self, subscriber: &str) -> Result<i64>;

    async fn save(&self, subscriber: &str, position: i64) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    positions: Arc<RwLock<HashMap<String, i64>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, subscriber: &str) -> Result<i64> {
        Ok(self
            .positions
            .read()
            .await
            .get(subscriber)
            .copied()
            .unwrap_or(0))
    }

    async fn save(&self, subscriber: &str, position: i64) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(subscriber.to_string(), position);
        Ok(())
    }
}

/// Checkpoints in the `outbox_checkpoints` table.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self, subscriber: &str) -> Result<i64> {
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM outbox_checkpoints WHERE subscriber = $1")
                .bind(subscriber)
                .fetch_optional(&self.pool)
                .await?;
        Ok(position.unwrap_or(0))
    }

    async fn save(&self, subscriber: &str, position: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_checkpoints (subscriber, position, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (subscriber) DO UPDATE
            SET position = GREATEST(outbox_checkpoints.position, EXCLUDED.position),
                updated_at = NOW()
            "#,
        )
        .bind(subscriber)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn positions_are_kept_per_subscriber() {
        let store = InMemoryCheckpointStore::new();
        store.save("shipping", 12).await.unwrap();

        assert_eq!(store.load("shipping").await.unwrap(), 12);
        assert_eq!(store.load("notifications").await.unwrap(), 0);
    }
}
