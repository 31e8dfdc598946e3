//! Durable store adapter over `projects`/`environments`/`configs`/
//! `config_variants` (spec.md §6).
//!
//! Read accessors (`get_ids`/`get_by_ids`) implement
//! `confplane_core::ReplicationSource` for the replicator. The write
//! methods are the narrow, un-authenticated path spec.md §6 keeps in scope
//! as "the entity fetchers used by §4.3" plus the CRUD the admin
//! collaborator would otherwise own — there is no auth check here, by
//! design; that lives outside this workspace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as Json;
use sqlx::Row;
use uuid::Uuid;

use confplane_core::error::ConfigError;
use confplane_core::model::{Config, ConfigVariant, ConfigReplica, Environment, Override, Project};
use confplane_core::ReplicationSource;

use crate::connection::DatabasePool;
use crate::event_hub::DurableEventHub;

const CONFIGS_TOPIC: &str = "configs";

pub struct DurableConfigStore {
    pool: DatabasePool,
    hub: Arc<DurableEventHub>,
}

impl DurableConfigStore {
    /// `hub` is shared with the replicator's consumer side — both need the
    /// same in-process publish/pull counters (spec.md §4.6 cleanup cadence).
    pub fn new(pool: DatabasePool, hub: Arc<DurableEventHub>) -> Self {
        Self { pool, hub }
    }

    pub async fn create_project(&self, name: &str) -> Result<Project, ConfigError> {
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query("INSERT INTO projects (id, name) VALUES (?, ?)")
                    .bind(project.id.to_string())
                    .bind(&project.name)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("INSERT INTO projects (id, name) VALUES (?, ?)")
                    .bind(project.id.to_string())
                    .bind(&project.name)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(project)
    }

    pub async fn create_environment(
        &self,
        project_id: Uuid,
        name: &str,
        order: i32,
    ) -> Result<Environment, ConfigError> {
        let environment = Environment {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            order,
        };
        let sql = "INSERT INTO environments (id, project_id, name, \"order\") VALUES (?, ?, ?, ?)";
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query(sql)
                    .bind(environment.id.to_string())
                    .bind(environment.project_id.to_string())
                    .bind(&environment.name)
                    .bind(environment.order)
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(sql)
                    .bind(environment.id.to_string())
                    .bind(environment.project_id.to_string())
                    .bind(&environment.name)
                    .bind(environment.order)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(environment)
    }

    /// Inserts a new config at version 1, or updates it and bumps `version`
    /// if `id` already exists. Publishes a `configs` topic event on success
    /// (spec.md §3 "Lifecycle").
    pub async fn upsert_config(
        &self,
        id: Uuid,
        project_id: Uuid,
        name: &str,
        base_value: Json,
        base_schema: Option<Json>,
        base_overrides: Vec<Override>,
    ) -> Result<i64, ConfigError> {
        let overrides_json = serde_json::to_value(&base_overrides)
            .map_err(|e| ConfigError::BadRequest(e.to_string()))?;
        let now = Utc::now();

        let version = match &self.pool {
            DatabasePool::MySql(pool) => {
                let existing: Option<i64> =
                    sqlx::query("SELECT version FROM configs WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_optional(pool)
                        .await?
                        .map(|row| row.get::<i64, _>("version"));
                let version = existing.map(|v| v + 1).unwrap_or(1);
                sqlx::query(
                    r#"
                    INSERT INTO configs (id, project_id, name, version, value, `schema`, overrides, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON DUPLICATE KEY UPDATE
                        version = VALUES(version), value = VALUES(value), `schema` = VALUES(`schema`),
                        overrides = VALUES(overrides), updated_at = VALUES(updated_at)
                    "#,
                )
                .bind(id.to_string())
                .bind(project_id.to_string())
                .bind(name)
                .bind(version)
                .bind(&base_value)
                .bind(&base_schema)
                .bind(&overrides_json)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
                version
            }
            DatabasePool::Sqlite(pool) => {
                let existing: Option<i64> =
                    sqlx::query("SELECT version FROM configs WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_optional(pool)
                        .await?
                        .map(|row| row.get::<i64, _>("version"));
                let version = existing.map(|v| v + 1).unwrap_or(1);
                sqlx::query(
                    r#"
                    INSERT INTO configs (id, project_id, name, version, value, schema, overrides, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        version = excluded.version, value = excluded.value, schema = excluded.schema,
                        overrides = excluded.overrides, updated_at = excluded.updated_at
                    "#,
                )
                .bind(id.to_string())
                .bind(project_id.to_string())
                .bind(name)
                .bind(version)
                .bind(base_value.to_string())
                .bind(base_schema.as_ref().map(|s| s.to_string()))
                .bind(overrides_json.to_string())
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(pool)
                .await?;
                version
            }
        };

        self.hub.publish(CONFIGS_TOPIC, id).await?;
        Ok(version)
    }

    pub async fn upsert_config_variant(
        &self,
        id: Uuid,
        config_id: Uuid,
        environment_id: Uuid,
        value: Json,
        schema: Option<Json>,
        overrides: Vec<Override>,
        use_base_schema: bool,
    ) -> Result<(), ConfigError> {
        let overrides_json = serde_json::to_value(&overrides)
            .map_err(|e| ConfigError::BadRequest(e.to_string()))?;

        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO config_variants (id, config_id, environment_id, value, `schema`, overrides, use_base_schema)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON DUPLICATE KEY UPDATE
                        value = VALUES(value), `schema` = VALUES(`schema`), overrides = VALUES(overrides),
                        use_base_schema = VALUES(use_base_schema)
                    "#,
                )
                .bind(id.to_string())
                .bind(config_id.to_string())
                .bind(environment_id.to_string())
                .bind(&value)
                .bind(&schema)
                .bind(&overrides_json)
                .bind(use_base_schema)
                .execute(pool)
                .await?;
                self.bump_config_version_mysql(pool, config_id).await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO config_variants (id, config_id, environment_id, value, schema, overrides, use_base_schema)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(config_id, environment_id) DO UPDATE SET
                        value = excluded.value, schema = excluded.schema, overrides = excluded.overrides,
                        use_base_schema = excluded.use_base_schema
                    "#,
                )
                .bind(id.to_string())
                .bind(config_id.to_string())
                .bind(environment_id.to_string())
                .bind(value.to_string())
                .bind(schema.as_ref().map(|s| s.to_string()))
                .bind(overrides_json.to_string())
                .bind(use_base_schema)
                .execute(pool)
                .await?;
                self.bump_config_version_sqlite(pool, config_id).await?;
            }
        }

        self.hub.publish(CONFIGS_TOPIC, config_id).await?;
        Ok(())
    }

    async fn bump_config_version_mysql(
        &self,
        pool: &sqlx::MySqlPool,
        config_id: Uuid,
    ) -> Result<(), ConfigError> {
        sqlx::query("UPDATE configs SET version = version + 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(config_id.to_string())
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn bump_config_version_sqlite(
        &self,
        pool: &sqlx::SqlitePool,
        config_id: Uuid,
    ) -> Result<(), ConfigError> {
        sqlx::query("UPDATE configs SET version = version + 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(config_id.to_string())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete_config(&self, id: Uuid) -> Result<(), ConfigError> {
        match &self.pool {
            DatabasePool::MySql(pool) => {
                sqlx::query("DELETE FROM configs WHERE id = ?")
                    .bind(id.to_string())
                    .execute(pool)
                    .await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM configs WHERE id = ?")
                    .bind(id.to_string())
                    .execute(pool)
                    .await?;
            }
        }
        self.hub.publish(CONFIGS_TOPIC, id).await?;
        Ok(())
    }

    async fn fetch_configs(&self, ids: &[Uuid]) -> Result<Vec<Config>, ConfigError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let placeholders = id_strings.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        match &self.pool {
            DatabasePool::MySql(pool) => {
                let sql = format!(
                    "SELECT id, project_id, name, version, value, `schema`, overrides, created_at, updated_at FROM configs WHERE id IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql);
                for id in &id_strings {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(pool).await?;
                rows.into_iter().map(config_from_mysql_row).collect()
            }
            DatabasePool::Sqlite(pool) => {
                let sql = format!(
                    "SELECT id, project_id, name, version, value, schema, overrides, created_at, updated_at FROM configs WHERE id IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql);
                for id in &id_strings {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(pool).await?;
                rows.into_iter().map(config_from_sqlite_row).collect()
            }
        }
    }

    async fn fetch_variants(&self, config_ids: &[Uuid]) -> Result<Vec<ConfigVariant>, ConfigError> {
        if config_ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_strings: Vec<String> = config_ids.iter().map(Uuid::to_string).collect();
        let placeholders = id_strings.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        match &self.pool {
            DatabasePool::MySql(pool) => {
                let sql = format!(
                    "SELECT id, config_id, environment_id, value, `schema`, overrides, use_base_schema FROM config_variants WHERE config_id IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql);
                for id in &id_strings {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(pool).await?;
                rows.into_iter().map(variant_from_mysql_row).collect()
            }
            DatabasePool::Sqlite(pool) => {
                let sql = format!(
                    "SELECT id, config_id, environment_id, value, schema, overrides, use_base_schema FROM config_variants WHERE config_id IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql);
                for id in &id_strings {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(pool).await?;
                rows.into_iter().map(variant_from_sqlite_row).collect()
            }
        }
    }
}

#[async_trait]
impl ReplicationSource for DurableConfigStore {
    async fn get_ids(&self) -> Result<Vec<Uuid>, ConfigError> {
        match &self.pool {
            DatabasePool::MySql(pool) => {
                let rows = sqlx::query("SELECT id FROM configs").fetch_all(pool).await?;
                rows.into_iter()
                    .map(|row| parse_uuid(row.get::<String, _>("id")))
                    .collect()
            }
            DatabasePool::Sqlite(pool) => {
                let rows = sqlx::query("SELECT id FROM configs").fetch_all(pool).await?;
                rows.into_iter()
                    .map(|row| parse_uuid(row.get::<String, _>("id")))
                    .collect()
            }
        }
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ConfigReplica>, ConfigError> {
        let configs = self.fetch_configs(ids).await?;
        let config_ids: Vec<Uuid> = configs.iter().map(|c| c.id).collect();
        let variants = self.fetch_variants(&config_ids).await?;

        let mut by_config: HashMap<Uuid, HashMap<Uuid, ConfigVariant>> = HashMap::new();
        for variant in variants {
            by_config
                .entry(variant.config_id)
                .or_default()
                .insert(variant.environment_id, variant);
        }

        Ok(configs
            .into_iter()
            .map(|config| ConfigReplica {
                variants: by_config.remove(&config.id).unwrap_or_default(),
                id: config.id,
                project_id: config.project_id,
                name: config.name,
                version: config.version,
                base_value: config.base_value,
                base_schema: config.base_schema,
                base_overrides: config.base_overrides,
            })
            .collect())
    }
}

fn parse_uuid(s: String) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(&s).map_err(|e| ConfigError::FatalInternal(e.to_string()))
}

fn config_from_mysql_row(row: sqlx::mysql::MySqlRow) -> Result<Config, ConfigError> {
    let overrides_json: Json = row.get("overrides");
    Ok(Config {
        id: parse_uuid(row.get::<String, _>("id"))?,
        project_id: parse_uuid(row.get::<String, _>("project_id"))?,
        name: row.get("name"),
        version: row.get("version"),
        base_value: row.get("value"),
        base_schema: row.get("schema"),
        base_overrides: serde_json::from_value(overrides_json)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn config_from_sqlite_row(row: sqlx::sqlite::SqliteRow) -> Result<Config, ConfigError> {
    let value_text: String = row.get("value");
    let schema_text: Option<String> = row.get("schema");
    let overrides_text: String = row.get("overrides");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(Config {
        id: parse_uuid(row.get::<String, _>("id"))?,
        project_id: parse_uuid(row.get::<String, _>("project_id"))?,
        name: row.get("name"),
        version: row.get("version"),
        base_value: serde_json::from_str(&value_text)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        base_schema: schema_text
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        base_overrides: serde_json::from_str(&overrides_text)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn variant_from_mysql_row(row: sqlx::mysql::MySqlRow) -> Result<ConfigVariant, ConfigError> {
    let overrides_json: Json = row.get("overrides");
    Ok(ConfigVariant {
        id: parse_uuid(row.get::<String, _>("id"))?,
        config_id: parse_uuid(row.get::<String, _>("config_id"))?,
        environment_id: parse_uuid(row.get::<String, _>("environment_id"))?,
        value: row.get("value"),
        schema: row.get("schema"),
        overrides: serde_json::from_value(overrides_json)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        use_base_schema: row.get("use_base_schema"),
        created_at: Utc::now(),
    })
}

fn variant_from_sqlite_row(row: sqlx::sqlite::SqliteRow) -> Result<ConfigVariant, ConfigError> {
    let value_text: String = row.get("value");
    let schema_text: Option<String> = row.get("schema");
    let overrides_text: String = row.get("overrides");
    Ok(ConfigVariant {
        id: parse_uuid(row.get::<String, _>("id"))?,
        config_id: parse_uuid(row.get::<String, _>("config_id"))?,
        environment_id: parse_uuid(row.get::<String, _>("environment_id"))?,
        value: serde_json::from_str(&value_text)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        schema: schema_text
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        overrides: serde_json::from_str(&overrides_text)
            .map_err(|e| ConfigError::FatalInternal(e.to_string()))?,
        use_base_schema: row.get::<i64, _>("use_base_schema") != 0,
        created_at: Utc::now(),
    })
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>, ConfigError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConfigError::FatalInternal(e.to_string()))
}
