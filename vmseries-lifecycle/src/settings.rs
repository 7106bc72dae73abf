use vmseries_common::{ConfigError, SubnetTable};

pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_DELICENSE: &str = "fw_delicense";
pub const ENV_INTERFACES_CONFIG: &str = "interfaces_config";
pub const ENV_SECURITY_GROUP: &str = "sgr_id";
pub const ENV_PANORAMA_CONFIG: &str = "panorama_config";

/// Invocation settings read from the environment.
///
/// Only the region is required up front. The zone table and security group
/// are validated when the launch path needs them, the secret reference when
/// the delicense path needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub region: String,
    pub delicense_enabled: bool,
    pub interfaces_config: Option<String>,
    pub security_group_id: Option<String>,
    pub panorama_config: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Ok(Self {
            region: get(ENV_REGION).ok_or(ConfigError::MissingSetting(ENV_REGION))?,
            delicense_enabled: parse_flag(get(ENV_DELICENSE).as_deref()),
            interfaces_config: get(ENV_INTERFACES_CONFIG),
            security_group_id: get(ENV_SECURITY_GROUP),
            panorama_config: get(ENV_PANORAMA_CONFIG),
        })
    }

    pub fn subnet_table(&self) -> Result<SubnetTable, ConfigError> {
        let raw = self
            .interfaces_config
            .as_deref()
            .ok_or(ConfigError::MissingSetting(ENV_INTERFACES_CONFIG))?;
        SubnetTable::parse(raw)
    }

    pub fn security_group(&self) -> Result<&str, ConfigError> {
        self.security_group_id
            .as_deref()
            .ok_or(ConfigError::MissingSetting(ENV_SECURITY_GROUP))
    }

    pub fn secret_reference(&self) -> Result<&str, ConfigError> {
        self.panorama_config
            .as_deref()
            .ok_or(ConfigError::MissingSecretReference)
    }
}

/// `true`, `1`, `yes`, `on` (any case) enable; anything else disables.
pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}
