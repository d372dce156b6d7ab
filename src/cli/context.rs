//! Wiring of configuration, storage and services for one invocation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::storage::FileTaskStore;
use crate::domain::models::{Config, ProviderSettings};
use crate::infrastructure::config::ConfigLoader;
use crate::services::TaskLifecycleService;

/// Everything a command needs, built from the project directory.
pub struct AppContext {
    pub project_dir: PathBuf,
    pub config: Config,
    pub provider_settings: ProviderSettings,
    pub lifecycle: Arc<TaskLifecycleService>,
}

impl AppContext {
    /// Resolve the project directory and load its configuration.
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let project_dir = match project_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };
        let config = ConfigLoader::load(&project_dir).context("Failed to load configuration")?;
        Self::with_config(project_dir, config)
    }

    pub fn with_config(project_dir: PathBuf, config: Config) -> Result<Self> {
        let provider_settings = ConfigLoader::load_provider_settings(&project_dir)
            .context("Failed to load provider settings")?;
        let store = FileTaskStore::new(project_dir.join(&config.tasks_file))
            .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms));
        let lifecycle = Arc::new(TaskLifecycleService::new(Arc::new(store)));

        Ok(Self {
            project_dir,
            config,
            provider_settings,
            lifecycle,
        })
    }
}
