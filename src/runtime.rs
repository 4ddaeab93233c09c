//! Wiring for the `tmplsync` binary: effective config, seeded store, and the
//! running controller.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tmplsync_core::{Template, manifest};
use tmplsync_reconciler::{
    Controller, ControllerConfig, ControllerHandle, InMemoryResourceStore, InMemoryTemplateClient,
    ReconcilerBuilder, TracingResourceStore,
};
use tracing::info;

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub log_level: Option<String>,
}

/// Build the effective config: defaults, then `path`, then `TMPLSYNC_*`
/// variables, then `overrides`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result
/// does not validate.
pub fn effective_config(path: Option<&Path>, overrides: Overrides) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let config = apply_overrides(config.with_env(), overrides);
    config.validate().context("Invalid controller config")?;
    Ok(config)
}

fn apply_overrides(config: ControllerConfig, overrides: Overrides) -> ControllerConfig {
    let config = match overrides.workers {
        Some(workers) => config.workers(workers),
        None => config,
    };
    match overrides.log_level {
        Some(level) => config.log_level(level),
        None => config,
    }
}

/// Load templates from a manifest file or directory.
///
/// # Errors
///
/// Returns an error if any manifest cannot be read or holds an invalid template.
pub fn load_manifests(path: &Path) -> Result<Vec<Template>> {
    let templates = if path.is_dir() {
        manifest::load_dir(path)
    } else {
        manifest::load_file(path)
    };
    templates.with_context(|| format!("Failed to load manifests from {}", path.display()))
}

/// Create a store holding `templates`.
///
/// # Errors
///
/// Returns an error if two templates share a namespace and name.
pub async fn seed_store(
    templates: Vec<Template>,
    watch_capacity: usize,
) -> Result<InMemoryResourceStore> {
    let store = InMemoryResourceStore::with_watch_capacity(watch_capacity);
    for template in templates {
        let key = template.key();
        store
            .create(template)
            .await
            .with_context(|| format!("Failed to seed template {key}"))?;
    }
    Ok(store)
}

/// Start a controller over `store` against an in-memory backend.
///
/// # Errors
///
/// Returns an error if the reconciler or controller rejects `config`.
pub fn start_controller(
    store: InMemoryResourceStore,
    client: Arc<InMemoryTemplateClient>,
    config: ControllerConfig,
) -> Result<ControllerHandle> {
    let store = Arc::new(TracingResourceStore::new(store));
    let reconciler = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_client(client)
        .build()
        .context("Failed to build reconciler")?;

    let controller = Controller::new(Arc::new(reconciler), store, config)
        .context("Failed to create controller")?;
    info!("Reconciler initialized");
    Ok(controller.start())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let config = apply_overrides(
            ControllerConfig::default().workers(2),
            Overrides {
                workers: Some(9),
                log_level: Some("debug".to_string()),
            },
        );
        assert_eq!(config.workers, 9);
        assert_eq!(config.log_level, "debug");

        let untouched = apply_overrides(ControllerConfig::default().workers(2), Overrides::default());
        assert_eq!(untouched.workers, 2);
    }

    #[test]
    fn test_effective_config_rejects_zero_workers() {
        let result = effective_config(
            None,
            Overrides {
                workers: Some(0),
                log_level: None,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_manifest_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_manifests(&dir.path().join("absent.yaml"));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("absent.yaml"));
    }

    #[tokio::test]
    async fn test_seed_store_rejects_duplicates() {
        let templates = vec![
            Template::new("default", "a", None),
            Template::new("default", "a", Some("x".to_string())),
        ];
        assert!(seed_store(templates, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_seeded_templates_converge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("templates.yaml"),
            "metadata:\n  name: ubuntu\nspec:\n  data: \"tasks: []\"\n",
        )
        .unwrap();

        let templates = load_manifests(dir.path()).unwrap();
        let store = seed_store(templates, 16).await.unwrap();
        let client = Arc::new(InMemoryTemplateClient::new());
        let handle = start_controller(store, client.clone(), ControllerConfig::default()).unwrap();

        let mut created = false;
        for _ in 0..200 {
            if client.len().await == 1 {
                created = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(created);
    }
}
