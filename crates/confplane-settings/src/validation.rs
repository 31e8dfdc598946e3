//! Configuration validation utilities

use crate::config::AppConfig;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationErrors),

    #[error("Database validation failed: {message}")]
    DatabaseValidationFailed { message: String },

    #[error("Replication validation failed: {message}")]
    ReplicationValidationFailed { message: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        config.validate()?;
        Self::validate_database_config(config)?;
        Self::validate_replication_config(config)?;
        Ok(())
    }

    fn validate_database_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let db = &config.database;

        if db.max_connections < db.min_connections {
            return Err(ConfigValidationError::DatabaseValidationFailed {
                message: "Max connections must be greater than or equal to min connections"
                    .to_string(),
            });
        }

        if db.max_connections > 1000 {
            return Err(ConfigValidationError::DatabaseValidationFailed {
                message: "Max connections should not exceed 1000 for performance reasons"
                    .to_string(),
            });
        }

        Ok(())
    }

    fn validate_replication_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let r = &config.replication;

        if r.step_batch_size > r.dump_batch_size * 16 {
            return Err(ConfigValidationError::ReplicationValidationFailed {
                message: "step_batch_size should not dwarf dump_batch_size".to_string(),
            });
        }

        Ok(())
    }
}
