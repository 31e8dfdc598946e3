//! Core configuration structures: server, database and replication settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[cfg(test)]
use proptest_derive::Arbitrary;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    pub host: String,
    pub workers: Option<usize>,
    pub max_connections: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub mysql_url: secrecy::Secret<String>,
    pub sqlite_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

/// The options table from spec.md §6, with its exact defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct ReplicationConfig {
    #[validate(range(min = 1))]
    pub step_batch_size: u32,
    #[validate(range(min = 1))]
    pub step_interval_ms: u64,
    #[validate(range(min = 1))]
    pub dump_batch_size: u32,
    #[validate(range(min = 1))]
    pub consumer_idle_ttl_ms: u64,
    #[validate(range(min = 1))]
    pub publish_cleanup_frequency: u32,
    #[validate(range(min = 1))]
    pub report_frequency: u32,
    #[validate(range(min = 1))]
    pub stream_heartbeat_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            step_batch_size: 128,
            step_interval_ms: 100,
            dump_batch_size: 256,
            consumer_idle_ttl_ms: 86_400_000,
            publish_cleanup_frequency: 128,
            report_frequency: 16,
            stream_heartbeat_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub structured: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8081,
                host: "0.0.0.0".to_string(),
                workers: None,
                max_connections: Some(1000),
                timeout_seconds: Some(30),
            },
            database: DatabaseConfig {
                mysql_url: secrecy::Secret::new("mysql://localhost/confplane".to_string()),
                sqlite_url: Some(":memory:".to_string()),
                max_connections: 10,
                min_connections: 1,
                connection_timeout: 30,
                idle_timeout: 600,
                max_lifetime: 3600,
            },
            replication: ReplicationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                output: "stdout".to_string(),
                structured: true,
            },
        }
    }
}
