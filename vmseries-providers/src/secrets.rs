use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::SecretStore;

pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Secret store backed by mounted files (Docker/K8s style), with an
/// environment fallback.
///
/// A reference such as `arn:aws:secretsmanager:...:secret:panorama-AbC` is
/// looked up as `<dir>/arn_aws_secretsmanager_..._secret_panorama-AbC`, then
/// as env var `SECRET_ARN_AWS_SECRETSMANAGER_..._SECRET_PANORAMA_ABC`.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        let dir = std::env::var("SECRETS_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SECRETS_DIR.to_string());
        Self::new(dir)
    }

    pub fn file_name(reference: &str) -> String {
        reference
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    pub fn env_name(reference: &str) -> String {
        let upper = Self::file_name(reference)
            .replace(['-', '.'], "_")
            .to_ascii_uppercase();
        format!("SECRET_{}", upper)
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret_string(&self, reference: &str) -> Result<String> {
        let path = self.dir.join(Self::file_name(reference));
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(s.trim().to_string()),
            Err(file_err) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %file_err,
                    "secret file unreadable, trying environment"
                );
                std::env::var(Self::env_name(reference))
                    .map(|s| s.trim().to_string())
                    .with_context(|| {
                        format!(
                            "secret {} not found at {} ({})",
                            reference,
                            path.display(),
                            file_err
                        )
                    })
            }
        }
    }
}
