use crate::{
    app::{context::AppContext, remote::AppRemote, state::SyncStore},
    config::Config,
    enrichment::GeminiClient,
    storage,
};
use anyhow::{bail, Context, Result};
use homedir::my_home;
use std::{sync::Arc, time::Duration};

const ENV_BASE_PATH: &str = "MARKSYNC_BASE_PATH";
const ENV_GEMINI_API_KEY: &str = "MARKSYNC_GEMINI_API_KEY";
const ENV_SUPABASE_KEY: &str = "MARKSYNC_SUPABASE_KEY";

/// Wires configuration, local state and the two hosted services together.
pub struct AppFactory;

impl AppFactory {
    /// Build everything the commands and the daemon need.
    pub fn create_context(paths: &AppPaths) -> Result<AppContext> {
        let config = Self::create_config(&paths.base_path)?;
        let store = Self::create_store(paths)?;
        let timeout = Duration::from_secs(config.sync.request_timeout_secs);

        let enrichment_key = Self::secret(ENV_GEMINI_API_KEY, &config.enrichment.api_key)
            .context("no enrichment api key, set MARKSYNC_GEMINI_API_KEY")?;
        let enrichment = GeminiClient::new(&config.enrichment, &enrichment_key, timeout)?;

        if config.remote.url.is_empty() {
            bail!("remote.url is not configured in {}/config.yaml", paths.base_path);
        }
        let remote_key = Self::secret(ENV_SUPABASE_KEY, &config.remote.anon_key)
            .context("no remote index key, set MARKSYNC_SUPABASE_KEY")?;
        let remote = AppRemote::new(&config.remote, &remote_key, store.clone(), timeout)?;

        Ok(AppContext::new(
            config,
            store,
            Arc::new(remote),
            Arc::new(enrichment),
        ))
    }

    /// Local state only, for commands that never talk to a hosted service.
    pub fn create_store(paths: &AppPaths) -> Result<SyncStore> {
        let storage_mgr = storage::BackendLocal::new(&paths.base_path)
            .context("failed to open state directory")?;
        Ok(SyncStore::new(Arc::new(storage_mgr)))
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    pub fn create_config(base_path: &str) -> Result<Config> {
        Config::load_with(base_path)
    }

    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var(ENV_BASE_PATH) {
            return Ok(base_path);
        }

        let home = my_home()
            .ok()
            .flatten()
            .context("Could not determine home directory")?;
        Ok(format!("{}/.local/share/marksync", home.to_string_lossy()))
    }

    /// Environment wins over the config file.
    fn secret(env_key: &str, configured: &str) -> Option<String> {
        std::env::var(env_key)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| Some(configured.trim().to_string()).filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_secret_is_used_without_env() {
        assert_eq!(
            AppFactory::secret("MARKSYNC_TEST_UNSET_SECRET", " from-config "),
            Some("from-config".to_string())
        );
        assert_eq!(AppFactory::secret("MARKSYNC_TEST_UNSET_SECRET", "  "), None);
    }

    #[test]
    fn test_create_store_in_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths {
            base_path: tmp.path().to_string_lossy().to_string(),
        };

        let store = AppFactory::create_store(&paths).unwrap();
        assert!(store.user().unwrap().is_none());

        store
            .set_user(&crate::app::state::UserIdentity {
                id: "u1".to_string(),
                access_token: None,
            })
            .unwrap();
        assert!(tmp.path().join("user.json").exists());
    }
}
