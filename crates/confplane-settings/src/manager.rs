//! Dynamic configuration management with hot-reload capabilities

use crate::config::AppConfig;
use crate::loader::ConfigLoader;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct ConfigManager {
    current_config: Arc<RwLock<AppConfig>>,
    config_sender: watch::Sender<AppConfig>,
    config_receiver: watch::Receiver<AppConfig>,
    loader: ConfigLoader,
}

impl ConfigManager {
    pub fn new(loader: ConfigLoader) -> Result<Self> {
        let initial_config = loader
            .load()
            .map_err(|e| anyhow::anyhow!("Failed to load initial configuration: {}", e))?;

        let (config_sender, config_receiver) = watch::channel(initial_config.clone());

        Ok(Self {
            current_config: Arc::new(RwLock::new(initial_config)),
            config_sender,
            config_receiver,
            loader,
        })
    }

    #[cfg(test)]
    pub fn new_with_config(config: AppConfig) -> Result<Self> {
        let (config_sender, config_receiver) = watch::channel(config.clone());

        Ok(Self {
            current_config: Arc::new(RwLock::new(config)),
            config_sender,
            config_receiver,
            loader: ConfigLoader::new("config", "test"),
        })
    }

    pub fn get_config(&self) -> AppConfig {
        self.current_config.read().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.config_receiver.clone()
    }

    pub async fn reload_config(&self) -> Result<()> {
        match self.loader.load() {
            Ok(new_config) => {
                if let Err(e) = validator::Validate::validate(&new_config) {
                    error!("Configuration validation failed: {}", e);
                    return Err(anyhow::anyhow!("Invalid configuration: {}", e));
                }

                {
                    let mut config = self.current_config.write();
                    *config = new_config.clone();
                }

                if let Err(e) = self.config_sender.send(new_config) {
                    warn!("Failed to notify configuration subscribers: {}", e);
                }

                info!("Configuration reloaded successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload configuration: {}", e);
                Err(anyhow::anyhow!("Configuration reload failed: {}", e))
            }
        }
    }

    pub async fn start_auto_reload(&self, interval_seconds: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

            loop {
                interval.tick().await;
                if let Err(e) = manager.reload_config().await {
                    error!("Auto-reload failed: {}", e);
                }
            }
        });
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            current_config: Arc::clone(&self.current_config),
            config_sender: self.config_sender.clone(),
            config_receiver: self.config_receiver.clone(),
            loader: ConfigLoader::new("config", "development"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use proptest::prelude::*;

    fn arb_server_config() -> impl Strategy<Value = ServerConfig> {
        (
            1u16..=65535,
            any::<String>(),
            any::<Option<usize>>(),
            any::<Option<u32>>(),
            any::<Option<u64>>(),
        )
            .prop_map(
                |(port, host, workers, max_connections, timeout_seconds)| ServerConfig {
                    port,
                    host: if host.is_empty() {
                        "localhost".to_string()
                    } else {
                        host
                    },
                    workers,
                    max_connections,
                    timeout_seconds,
                },
            )
    }

    fn arb_database_config() -> impl Strategy<Value = DatabaseConfig> {
        (
            "[a-zA-Z0-9:/._-]{10,100}",
            any::<Option<String>>(),
            1u32..=100,
            1u32..=50,
            1u64..=300,
            1u64..=3600,
            1u64..=86400,
        )
            .prop_map(
                |(
                    mysql_url,
                    sqlite_url,
                    max_connections,
                    min_connections,
                    connection_timeout,
                    idle_timeout,
                    max_lifetime,
                )| {
                    let min_connections = std::cmp::min(min_connections, max_connections);
                    DatabaseConfig {
                        mysql_url: secrecy::Secret::new(format!("mysql://{}", mysql_url)),
                        sqlite_url,
                        max_connections,
                        min_connections,
                        connection_timeout,
                        idle_timeout,
                        max_lifetime,
                    }
                },
            )
    }

    fn arb_replication_config() -> impl Strategy<Value = ReplicationConfig> {
        (
            1u32..=1024,
            1u64..=10_000,
            1u32..=2048,
            1u64..=604_800_000,
            1u32..=1024,
            1u32..=1024,
            1u64..=60_000,
        )
            .prop_map(
                |(
                    step_batch_size,
                    step_interval_ms,
                    dump_batch_size,
                    consumer_idle_ttl_ms,
                    publish_cleanup_frequency,
                    report_frequency,
                    stream_heartbeat_ms,
                )| ReplicationConfig {
                    step_batch_size,
                    step_interval_ms,
                    dump_batch_size,
                    consumer_idle_ttl_ms,
                    publish_cleanup_frequency,
                    report_frequency,
                    stream_heartbeat_ms,
                },
            )
    }

    fn arb_app_config() -> impl Strategy<Value = AppConfig> {
        (
            arb_server_config(),
            arb_database_config(),
            arb_replication_config(),
            any::<LoggingConfig>(),
        )
            .prop_map(|(server, database, replication, logging)| AppConfig {
                server,
                database,
                replication,
                logging,
            })
    }

    proptest! {
        #[test]
        fn hot_reload_propagates_and_revalidates(initial_config in arb_app_config()) {
            let result = tokio_test::block_on(async {
                let manager = ConfigManager::new_with_config(initial_config.clone())
                    .map_err(|e| proptest::test_runner::TestCaseError::fail(e.to_string()))?;

                let initial_retrieved = manager.get_config();
                prop_assert_eq!(initial_retrieved.server.port, initial_config.server.port);
                prop_assert_eq!(
                    initial_retrieved.replication.step_batch_size,
                    initial_config.replication.step_batch_size
                );

                let _receiver = manager.subscribe();

                let current_config = manager.get_config();
                prop_assert!(validator::Validate::validate(&current_config).is_ok());

                let manager_clone = manager.clone();
                prop_assert_eq!(
                    manager_clone.get_config().server.port,
                    manager.get_config().server.port
                );

                Ok(())
            });
            result.unwrap();
        }
    }
}
