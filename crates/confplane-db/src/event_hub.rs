//! Durable, per-consumer fan-out queue over the `event_consumers`/`events`
//! tables (spec.md §4.2).
//!
//! `publish` is the writer-side entry point `DurableConfigStore` calls after
//! every mutation; the `confplane_core::EventHub` impl below is the
//! consumer-side contract the replicator pulls through. Both sides share one
//! pool and one set of in-process counters (`publish_counts`/`pull_counts`)
//! that drive the two opportunistic-maintenance rules in spec.md §4.2:
//! publish-time cleanup of idle consumers every `PUBLISH_CLEANUP_FREQUENCY`
//! publishes, and consumer-side `lastUsedAt` refresh every `REPORT_FREQUENCY`
//! pulls.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use confplane_core::error::ConfigError;
use confplane_core::{EventHub, StoredEvent};

use crate::connection::DatabasePool;

/// The options table from spec.md §6, the subset the event hub itself
/// consumes.
#[derive(Debug, Clone, Copy)]
pub struct EventHubSettings {
    pub consumer_idle_ttl_ms: i64,
    pub publish_cleanup_frequency: u32,
    pub report_frequency: u32,
}

impl Default for EventHubSettings {
    fn default() -> Self {
        Self {
            consumer_idle_ttl_ms: 86_400_000,
            publish_cleanup_frequency: 128,
            report_frequency: 16,
        }
    }
}

pub struct DurableEventHub {
    pool: DatabasePool,
    settings: EventHubSettings,
    publish_counts: DashMap<String, AtomicU32>,
    pull_counts: DashMap<Uuid, AtomicU32>,
}

impl DurableEventHub {
    pub fn new(pool: DatabasePool, settings: EventHubSettings) -> Self {
        Self {
            pool,
            settings,
            publish_counts: DashMap::new(),
            pull_counts: DashMap::new(),
        }
    }

    /// Appends one event to every live consumer of `topic` (spec.md §4.2
    /// "for each live consumer of that topic, append a row"). A writer
    /// publishing before a consumer exists loses that event for that
    /// consumer by design — initial sync handles the gap.
    pub async fn publish(&self, topic: &str, entity_id: Uuid) -> Result<(), ConfigError> {
        let consumer_ids = self.consumers_for_topic(topic).await?;
        let data = json!({ "entityId": entity_id }).to_string();
        let now = Utc::now();

        for consumer_id in &consumer_ids {
            let event_id = Uuid::new_v4();
            match &self.pool {
                DatabasePool::MySql(pool) => {
                    sqlx::query(
                        "INSERT INTO events (id, consumer_id, data, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(event_id.to_string())
                    .bind(consumer_id.to_string())
                    .bind(&data)
                    .bind(now)
                    .execute(pool)
                    .await?;
                }
                DatabasePool::Sqlite(pool) => {
                    sqlx::query(
                        "INSERT INTO events (id, consumer_id, data, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(event_id.to_string())
                    .bind(consumer_id.to_string())
                    .bind(&data)
                    .bind(now.to_rfc3339())
                    .execute(pool)
                    .await?;
                }
            }
        }
        metrics::counter!("confplane_event_hub_published_total", consumer_ids.len() as u64);

        let counter = self
            .publish_counts
            .entry(topic.to_string())
            .or_insert_with(|| AtomicU32::new(0));
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        drop(counter);
        if n % self.settings.publish_cleanup_frequency.max(1) == 0 {
            self.cleanup_idle_consumers().await?;
        }

        Ok(())
    }

    async fn consumers_for_topic(&self, topic: &str) -> Result<Vec<Uuid>, ConfigError> {
        match &self.pool {
            DatabasePool::MySql(pool) => {
                let rows = sqlx::query("SELECT id FROM event_consumers WHERE topic = ?")
                    .bind(topic)
                    .fetch_all(pool)
                    .await?;
                rows.into_iter()
                    .map(|row| parse_uuid(row.get::<String, _>("id")))
                    .collect()
            }
            DatabasePool::Sqlite(pool) => {
                let rows = sqlx::query("SELECT id FROM event_consumers WHERE topic = ?")
                    .bind(topic)
                    .fetch_all(pool)
                    .await?;
                rows.into_iter()
                    .map(|row| parse_uuid(row.get::<String, _>("id")))
                    .collect()
            }
        }
    }

    /// Deletes consumers whose `lastUsedAt` is older than
    /// `CONSUMER_IDLE_TTL` (spec.md §4.2 "Liveness"). Their events cascade.
    async fn cleanup_idle_consumers(&self) -> Result<(), ConfigError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.settings.consumer_idle_ttl_ms);
        let deleted_ids: Vec<String> = match &self.pool {
            DatabasePool::MySql(pool) => {
                let rows = sqlx::query("SELECT id FROM event_consumers WHERE last_used_at < ?")
                    .bind(cutoff)
                    .fetch_all(pool)
                    .await?;
                let ids: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>("id")).collect();
                if !ids.is_empty() {
                    sqlx::query("DELETE FROM event_consumers WHERE last_used_at < ?")
                        .bind(cutoff)
                        .execute(pool)
                        .await?;
                }
                ids
            }
            DatabasePool::Sqlite(pool) => {
                let cutoff = cutoff.to_rfc3339();
                let rows = sqlx::query("SELECT id FROM event_consumers WHERE last_used_at < ?")
                    .bind(&cutoff)
                    .fetch_all(pool)
                    .await?;
                let ids: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>("id")).collect();
                if !ids.is_empty() {
                    sqlx::query("DELETE FROM event_consumers WHERE last_used_at < ?")
                        .bind(&cutoff)
                        .execute(pool)
                        .await?;
                }
                ids
            }
        };
        if !deleted_ids.is_empty() {
            metrics::counter!("confplane_event_hub_consumers_gc_total", deleted_ids.len() as u64);
        }
        for id in deleted_ids {
            if let Ok(id) = Uuid::parse_str(&id) {
                self.pull_counts.remove(&id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHub for DurableEventHub {
    async fn create_consumer(&self, topic: &str) -> Result<Uuid, ConfigError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query(
                    "INSERT INTO event_consumers (id, topic, created_at, last_used_at) VALUES (?, ?, ?, ?)",
                )
                .bind(id.to_string())
                .bind(topic)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO event_consumers (id, topic, created_at, last_used_at) VALUES (?, ?, ?, ?)",
                )
                .bind(id.to_string())
                .bind(topic)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(pool)
                .await?;
            }
        }
        Ok(id)
    }

    /// Refreshes `lastUsedAt`; `Ok(false)` if the consumer row is gone
    /// (garbage-collected by a publish-time cleanup).
    async fn try_restore_consumer(&self, topic: &str, consumer_id: Uuid) -> Result<bool, ConfigError> {
        let now = Utc::now();
        let rows_affected = match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query("UPDATE event_consumers SET last_used_at = ? WHERE id = ? AND topic = ?")
                    .bind(now)
                    .bind(consumer_id.to_string())
                    .bind(topic)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("UPDATE event_consumers SET last_used_at = ? WHERE id = ? AND topic = ?")
                    .bind(now.to_rfc3339())
                    .bind(consumer_id.to_string())
                    .bind(topic)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        Ok(rows_affected == 1)
    }

    async fn pull(&self, consumer_id: Uuid, n: u32) -> Result<Vec<StoredEvent>, ConfigError> {
        let counter = self
            .pull_counts
            .entry(consumer_id)
            .or_insert_with(|| AtomicU32::new(0));
        let c = counter.fetch_add(1, Ordering::SeqCst) + 1;
        drop(counter);

        if c % self.settings.report_frequency.max(1) == 0 {
            let now = Utc::now();
            let rows_affected = match &self.pool {
                DatabasePool::MySql(pool) => {
                    sqlx::query("UPDATE event_consumers SET last_used_at = ? WHERE id = ?")
                        .bind(now)
                        .bind(consumer_id.to_string())
                        .execute(pool)
                        .await?
                        .rows_affected()
                }
                DatabasePool::Sqlite(pool) => {
                    sqlx::query("UPDATE event_consumers SET last_used_at = ? WHERE id = ?")
                        .bind(now.to_rfc3339())
                        .bind(consumer_id.to_string())
                        .execute(pool)
                        .await?
                        .rows_affected()
                }
            };
            if rows_affected != 1 {
                return Err(ConfigError::ConsumerDestroyed(format!(
                    "consumer {consumer_id} no longer exists"
                )));
            }
        }

        let rows = match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query(
                    "SELECT id, data FROM events WHERE consumer_id = ? ORDER BY created_at ASC LIMIT ?",
                )
                .bind(consumer_id.to_string())
                .bind(n as i64)
                .fetch_all(pool)
                .await?
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "SELECT id, data FROM events WHERE consumer_id = ? ORDER BY created_at ASC LIMIT ?",
                )
                .bind(consumer_id.to_string())
                .bind(n as i64)
                .fetch_all(pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| {
                let id = parse_uuid(row.get::<String, _>("id"))?;
                let data_raw: String = row.get("data");
                let data: serde_json::Value = serde_json::from_str(&data_raw)
                    .map_err(|e| ConfigError::FatalInternal(e.to_string()))?;
                let entity_id = data
                    .get("entityId")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        ConfigError::FatalInternal("event row missing entityId".to_string())
                    })?;
                Ok(StoredEvent { id, entity_id })
            })
            .collect()
    }

    async fn ack(&self, consumer_id: Uuid, ids: &[Uuid]) -> Result<(), ConfigError> {
        if ids.is_empty() {
            return Ok(());
        }
        let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let placeholders = id_strings.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "DELETE FROM events WHERE consumer_id = ? AND id IN ({placeholders})"
        );
        match &self.pool {
            DatabasePool::MySql(pool) => {
                let mut query = sqlx::query(&sql).bind(consumer_id.to_string());
                for id in &id_strings {
                    query = query.bind(id);
                }
                query.execute(pool).await?;
            }
            DatabasePool::Sqlite(pool) => {
                let mut query = sqlx::query(&sql).bind(consumer_id.to_string());
                for id in &id_strings {
                    query = query.bind(id);
                }
                query.execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn destroy(&self, consumer_id: Uuid) -> Result<(), ConfigError> {
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query("DELETE FROM event_consumers WHERE id = ?")
                    .bind(consumer_id.to_string())
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM event_consumers WHERE id = ?")
                    .bind(consumer_id.to_string())
                    .execute(pool)
                    .await?;
            }
        }
        self.pull_counts.remove(&consumer_id);
        Ok(())
    }
}

fn parse_uuid(s: String) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(&s).map_err(|e| ConfigError::FatalInternal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{create_sqlite_pool, run_migrations};

    async fn test_hub() -> DurableEventHub {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let pool = DatabasePool::Sqlite(pool);
        run_migrations(&pool).await.unwrap();
        DurableEventHub::new(
            pool,
            EventHubSettings {
                consumer_idle_ttl_ms: 86_400_000,
                publish_cleanup_frequency: 128,
                report_frequency: 16,
            },
        )
    }

    #[tokio::test]
    async fn publish_before_consumer_exists_is_not_delivered() {
        let hub = test_hub().await;
        let entity_id = Uuid::new_v4();
        hub.publish("configs", entity_id).await.unwrap();

        let consumer_id = hub.create_consumer("configs").await.unwrap();
        let events = hub.pull(consumer_id, 10).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn publish_after_consumer_created_is_delivered_and_acked() {
        let hub = test_hub().await;
        let consumer_id = hub.create_consumer("configs").await.unwrap();
        let entity_id = Uuid::new_v4();
        hub.publish("configs", entity_id).await.unwrap();

        let events = hub.pull(consumer_id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, entity_id);

        hub.ack(consumer_id, &[events[0].id]).await.unwrap();
        let events = hub.pull(consumer_id, 10).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn pull_returns_events_in_created_at_order() {
        let hub = test_hub().await;
        let consumer_id = hub.create_consumer("configs").await.unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        hub.publish("configs", first).await.unwrap();
        hub.publish("configs", second).await.unwrap();

        let events = hub.pull(consumer_id, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_id, first);
        assert_eq!(events[1].entity_id, second);
    }

    #[tokio::test]
    async fn try_restore_consumer_succeeds_for_live_consumer() {
        let hub = test_hub().await;
        let consumer_id = hub.create_consumer("configs").await.unwrap();
        let restored = hub.try_restore_consumer("configs", consumer_id).await.unwrap();
        assert!(restored);
    }

    #[tokio::test]
    async fn try_restore_consumer_fails_for_unknown_consumer() {
        let hub = test_hub().await;
        let restored = hub
            .try_restore_consumer("configs", Uuid::new_v4())
            .await
            .unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn destroy_removes_consumer_and_cascades_events() {
        let hub = test_hub().await;
        let consumer_id = hub.create_consumer("configs").await.unwrap();
        hub.publish("configs", Uuid::new_v4()).await.unwrap();
        hub.destroy(consumer_id).await.unwrap();

        let restored = hub.try_restore_consumer("configs", consumer_id).await.unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn idle_consumer_is_garbage_collected_on_publish_cleanup() {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let pool = DatabasePool::Sqlite(pool);
        run_migrations(&pool).await.unwrap();
        let hub = DurableEventHub::new(
            pool,
            EventHubSettings {
                consumer_idle_ttl_ms: 1,
                publish_cleanup_frequency: 1,
                report_frequency: 16,
            },
        );

        let consumer_id = hub.create_consumer("configs").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Any publish on any topic triggers cleanup at this frequency.
        hub.publish("configs", Uuid::new_v4()).await.unwrap();

        let restored = hub.try_restore_consumer("configs", consumer_id).await.unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn pull_fails_with_consumer_destroyed_after_gc() {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let pool = DatabasePool::Sqlite(pool);
        run_migrations(&pool).await.unwrap();
        let hub = DurableEventHub::new(
            pool,
            EventHubSettings {
                consumer_idle_ttl_ms: 1,
                publish_cleanup_frequency: 1,
                report_frequency: 1,
            },
        );

        let consumer_id = hub.create_consumer("configs").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        // Publish on a different topic still runs the frequency-gated
        // cleanup sweep across all topics.
        hub.publish("other", Uuid::new_v4()).await.unwrap();

        let result = hub.pull(consumer_id, 10).await;
        assert!(matches!(result, Err(ConfigError::ConsumerDestroyed(_))));
    }
}
