//! Standalone bearer-token resolver (spec.md §6 "Authentication
//! (collaborator contract)"). Production deployments normally plug in
//! whatever identity system issues their bearer tokens; this binary ships
//! a minimal static one so the service is runnable without one.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use confplane_api::ProjectResolver;
use confplane_core::error::ConfigError;

pub struct StaticProjectResolver {
    tokens: HashMap<String, Uuid>,
}

impl StaticProjectResolver {
    /// Parses `CONFPLANE_PROJECT_TOKENS` as a comma-separated
    /// `token=project-uuid` list, e.g.
    /// `demo-token=6ba7b810-9dad-11d1-80b4-00c04fd430c8`. Malformed entries
    /// are skipped with a warning rather than failing startup.
    pub fn from_env() -> Self {
        let raw = std::env::var("CONFPLANE_PROJECT_TOKENS").unwrap_or_default();
        let mut tokens = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((token, id)) => match Uuid::parse_str(id.trim()) {
                    Ok(id) => {
                        tokens.insert(token.trim().to_string(), id);
                    }
                    Err(_) => warn!(entry, "skipping malformed CONFPLANE_PROJECT_TOKENS entry"),
                },
                None => warn!(entry, "skipping malformed CONFPLANE_PROJECT_TOKENS entry"),
            }
        }
        Self { tokens }
    }
}

#[async_trait]
impl ProjectResolver for StaticProjectResolver {
    async fn resolve(&self, bearer_token: &str) -> Result<Uuid, ConfigError> {
        self.tokens
            .get(bearer_token)
            .copied()
            .ok_or_else(|| ConfigError::Forbidden("unknown bearer token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_token() {
        let id = Uuid::new_v4();
        std::env::set_var("CONFPLANE_PROJECT_TOKENS", format!("demo={id}"));
        let resolver = StaticProjectResolver::from_env();
        assert_eq!(resolver.resolve("demo").await.unwrap(), id);
        std::env::remove_var("CONFPLANE_PROJECT_TOKENS");
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        std::env::set_var("CONFPLANE_PROJECT_TOKENS", "");
        let resolver = StaticProjectResolver::from_env();
        assert!(matches!(
            resolver.resolve("nope").await,
            Err(ConfigError::Forbidden(_))
        ));
        std::env::remove_var("CONFPLANE_PROJECT_TOKENS");
    }
}
