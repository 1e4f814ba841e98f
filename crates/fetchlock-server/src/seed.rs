//! Seeding engines with tasks from a JSON file.
//!
//! ```json
//! [
//!   {"topicName": "invoice", "priority": 10, "businessKey": "order-1",
//!    "variables": {"amount": {"type": "Long", "value": 300}}},
//!   {"engine": "billing", "topicName": "charge"}
//! ]
//! ```

use serde::Deserialize;
use thiserror::Error;

use fetchlock_core::app::EngineRegistry;
use fetchlock_core::domain::{NewExternalTask, StoreError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("seed task targets unknown engine '{0}'")]
    UnknownEngine(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTask {
    /// Defaults to the registry's default engine.
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(flatten)]
    pub task: NewExternalTask,
}

pub fn parse_seed(text: &str) -> Result<Vec<SeedTask>, SeedError> {
    Ok(serde_json::from_str(text)?)
}

/// Creates every seed task. Returns how many were created.
pub async fn apply_seed(registry: &EngineRegistry, seed: Vec<SeedTask>) -> Result<usize, SeedError> {
    let mut created = 0;
    for SeedTask { engine, task } in seed {
        let engine = match engine {
            Some(name) => registry.get(&name).ok_or(SeedError::UnknownEngine(name))?,
            None => registry.default_engine(),
        };
        engine.service().create(task).await?;
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchlock_core::config::FetchLockConfig;
    use fetchlock_core::domain::{TopicName, TypedValue};
    use fetchlock_core::ports::TaskStore;

    fn registry() -> EngineRegistry {
        let config = FetchLockConfig {
            engines: vec!["default".to_string(), "billing".to_string()],
            ..FetchLockConfig::default()
        };
        EngineRegistry::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn seeds_tasks_into_engines() {
        let registry = registry();
        let seed = parse_seed(
            r#"[
                {"topicName": "invoice", "priority": 10, "businessKey": "order-1",
                 "variables": {"amount": {"type": "Long", "value": 300}}},
                {"engine": "billing", "topicName": "charge"}
            ]"#,
        )
        .unwrap();

        assert_eq!(apply_seed(&registry, seed).await.unwrap(), 2);

        let default_engine = registry.default_engine();
        let invoices = default_engine
            .store()
            .find_lockable(&[TopicName::new("invoice")], chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].priority, 10);
        assert_eq!(invoices[0].context.business_key.as_deref(), Some("order-1"));
        let vars = default_engine.store().variables(invoices[0].id).await.unwrap();
        assert_eq!(vars["amount"], TypedValue::Long(300));
    }

    #[tokio::test]
    async fn unknown_engine_is_an_error() {
        let seed = parse_seed(r#"[{"engine": "nope", "topicName": "x"}]"#).unwrap();
        assert!(matches!(
            apply_seed(&registry(), seed).await,
            Err(SeedError::UnknownEngine(name)) if name == "nope"
        ));
    }
}
