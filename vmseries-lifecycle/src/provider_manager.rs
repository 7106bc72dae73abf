use anyhow::Result;
use std::env;
use std::sync::Arc;
use vmseries_providers::secrets::FileSecretStore;
use vmseries_providers::SecretStore;

use crate::orchestrator::Backends;
use crate::settings::Settings;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_backend_name() -> String {
        env::var("LIFECYCLE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "mock".to_string())
    }

    /// Secrets come from mounted files when `SECRETS_DIR` is set.
    fn file_secrets() -> Option<Arc<dyn SecretStore>> {
        env::var("SECRETS_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|_| Arc::new(FileSecretStore::from_env()) as Arc<dyn SecretStore>)
    }

    /// `Ok(None)` when the backend is unknown or not compiled in.
    pub fn get_backends(backend_name: &str, settings: &Settings) -> Result<Option<Backends>> {
        match backend_name {
            #[cfg(feature = "provider-mock")]
            "mock" => {
                use vmseries_providers::mock::MockCloud;

                let cloud = match env::var("MOCK_FIXTURE_FILE") {
                    Ok(path) if !path.trim().is_empty() => MockCloud::from_fixture_file(path.trim())?,
                    _ => MockCloud::new(),
                };
                tracing::info!(region = %settings.region, "using in-memory mock backend");
                let cloud = Arc::new(cloud);
                Ok(Some(Backends {
                    compute: cloud.clone(),
                    autoscaler: cloud.clone(),
                    secrets: Self::file_secrets().unwrap_or_else(|| cloud.clone()),
                    controllers: cloud,
                }))
            }
            // Add other backends here:
            // "aws" => ...
            _ => {
                let _ = settings;
                Ok(None)
            }
        }
    }
}
