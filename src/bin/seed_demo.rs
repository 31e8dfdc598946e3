//! Demo seeder: creates one project, one environment, and the configs from
//! spec.md's S1 (override order) and S4 (reference) scenarios against a
//! local SQLite database, so the read API has something to serve.

use std::sync::Arc;

use confplane_core::model::{Condition, Override, PathSegment, Value};
use confplane_db::event_hub::EventHubSettings;
use confplane_db::{create_sqlite_pool, run_migrations, DatabasePool, DurableConfigStore, DurableEventHub};
use serde_json::json;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let database_url = std::env::var("CONFPLANE_SEED_SQLITE_URL")
        .unwrap_or_else(|_| "sqlite://confplane-demo.db?mode=rwc".to_string());

    println!("seeding demo data into {database_url}");

    let pool = DatabasePool::Sqlite(create_sqlite_pool(&database_url).await?);
    run_migrations(&pool).await?;

    let hub = Arc::new(DurableEventHub::new(pool.clone(), EventHubSettings::default()));
    let store = DurableConfigStore::new(pool, hub);

    let project = store.create_project("demo").await?;
    let prod = store.create_environment(project.id, "Production", 0).await?;

    // S1: first-match-wins override order.
    let rate_id = Uuid::new_v4();
    store
        .upsert_config(
            rate_id,
            project.id,
            "rate-limit",
            json!({"rate": 10}),
            None,
            vec![
                Override {
                    name: "gold-50".to_string(),
                    conditions: vec![Condition::Equals {
                        property: "tier".to_string(),
                        value: Value::Literal { value: json!("gold") },
                    }],
                    value: Value::Literal { value: json!({"rate": 50}) },
                },
                Override {
                    name: "gold-100".to_string(),
                    conditions: vec![Condition::Equals {
                        property: "tier".to_string(),
                        value: Value::Literal { value: json!("gold") },
                    }],
                    value: Value::Literal { value: json!({"rate": 100}) },
                },
            ],
        )
        .await?;

    // S4: reference into another config's base value.
    let threshold_id = Uuid::new_v4();
    store
        .upsert_config(
            threshold_id,
            project.id,
            "premium-threshold",
            json!({"threshold": 100}),
            None,
            vec![],
        )
        .await?;

    let gated_id = Uuid::new_v4();
    store
        .upsert_config(
            gated_id,
            project.id,
            "premium-gate",
            json!({"tier": "standard"}),
            None,
            vec![Override {
                name: "above-threshold".to_string(),
                conditions: vec![Condition::GreaterThan {
                    property: "score".to_string(),
                    value: Value::Reference {
                        project_id: project.id,
                        config_name: "premium-threshold".to_string(),
                        path: vec![PathSegment::Key("threshold".to_string())],
                    },
                }],
                value: Value::Literal { value: json!({"tier": "premium"}) },
            }],
        )
        .await?;

    println!("project id:    {}", project.id);
    println!("environment id: {}", prod.id);
    println!("configs: rate-limit, premium-threshold, premium-gate");
    println!("export CONFPLANE_PROJECT_TOKENS=\"demo-token={}\"", project.id);

    Ok(())
}
