//! Database connection management

use anyhow::Result;
use confplane_settings::DatabaseConfig;
use secrecy::ExposeSecret;
use sqlx::migrate::Migrator;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, MySqlPool, Pool, Sqlite, SqlitePool};
use std::time::Duration;

static MYSQL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");
static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

#[derive(Clone)]
pub enum DatabasePool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

pub async fn create_mysql_pool(config: &DatabaseConfig) -> Result<Pool<MySql>> {
    let options = config
        .mysql_url
        .expose_secret()
        .parse::<MySqlConnectOptions>()?;

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime)))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn create_sqlite_pool(database_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePool::connect(database_url).await?;
    Ok(pool)
}

/// Runs the migration set matching `pool`'s backend. Handles already-applied
/// migrations gracefully the way the caller expects at startup.
pub async fn run_migrations(pool: &DatabasePool) -> Result<()> {
    match pool {
        DatabasePool::MySql(p) => MYSQL_MIGRATOR.run(p).await?,
        DatabasePool::Sqlite(p) => SQLITE_MIGRATOR.run(p).await?,
    }
    Ok(())
}
