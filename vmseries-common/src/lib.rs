use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod bus;

pub use bus::{LifecycleActionResult, LifecycleEvent, LifecycleKind};

// --- Device indexes ---

/// Index of the interface created by the launch template; never re-provisioned.
pub const PRIMARY_DEVICE_INDEX: u32 = 0;
/// Index the provisioner attaches the additional interface at.
pub const ADDITIONAL_DEVICE_INDEX: u32 = 1;
/// Index of the interface carrying the management-plane address.
pub const MANAGEMENT_DEVICE_INDEX: u32 = 1;

// --- Errors ---

/// Conditions that abort the whole invocation. The lifecycle action is left
/// uncompleted so the autoscaler's own timeout takes over.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Event type cannot be handled: {0}")]
    UnrecognizedEvent(String),
    #[error("Malformed lifecycle event: {0}")]
    MalformedEvent(String),
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("Invalid interfaces config: {0}")]
    InvalidSubnetTable(String),
    #[error("No subnet configured for availability zone {0}")]
    UnknownZone(String),
    #[error("Panorama config not found. Please check configuration")]
    MissingSecretReference,
    #[error("Invalid controller secret: {0}")]
    InvalidSecret(String),
}

/// Everything that escapes a lifecycle invocation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to inspect instance {instance_id}: {message}")]
    InstanceContext {
        instance_id: String,
        message: String,
    },
}

// --- Instance snapshot ---

/// A network interface as seen on (or created for) an instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    /// Only set once the interface is attached.
    #[serde(default)]
    pub attachment_id: Option<String>,
}

impl AttachmentRef {
    pub fn is_attached(&self) -> bool {
        self.attachment_id.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InstanceContext {
    pub zone: String,
    pub subnet: String,
    /// Ordered by device index.
    pub existing_attachments: Vec<AttachmentRef>,
}

impl InstanceContext {
    pub fn primary_attachment(&self) -> Option<&AttachmentRef> {
        self.existing_attachments.first()
    }
}

// --- Attachment configuration ---

/// Zone -> subnet mapping, loaded from the `interfaces_config` JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetTable(BTreeMap<String, String>);

impl SubnetTable {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let map: BTreeMap<String, String> = serde_json::from_str(raw)
            .map_err(|e| ConfigError::InvalidSubnetTable(e.to_string()))?;
        Ok(Self(map))
    }

    pub fn subnet_for(&self, zone: &str) -> Option<&str> {
        self.0.get(zone).map(String::as_str)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AttachmentSpec {
    pub target_index: u32,
    pub subnet_id: String,
    pub security_group_id: String,
}

impl AttachmentSpec {
    /// Builds the single additional interface for `zone`, always at
    /// [`ADDITIONAL_DEVICE_INDEX`].
    pub fn for_zone(
        table: &SubnetTable,
        zone: &str,
        security_group_id: &str,
    ) -> Result<Self, ConfigError> {
        let subnet_id = table
            .subnet_for(zone)
            .ok_or_else(|| ConfigError::UnknownZone(zone.to_string()))?;
        Ok(Self {
            target_index: ADDITIONAL_DEVICE_INDEX,
            subnet_id: subnet_id.to_string(),
            security_group_id: security_group_id.to_string(),
        })
    }

    pub fn needs_attach(&self) -> bool {
        self.target_index != PRIMARY_DEVICE_INDEX
    }
}

// --- Management controller ---

/// Secret-store record holding controller credentials.
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct PanoramaSecret {
    pub username: Option<String>,
    pub password: Option<String>,
    pub panorama1: Option<String>,
    pub panorama2: Option<String>,
    pub license_manager: Option<String>,
}

impl PanoramaSecret {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidSecret(e.to_string()))
    }

    /// Ordered candidates: `panorama1` first, then `panorama2` when present.
    pub fn candidate_endpoints(&self) -> Result<Vec<ControllerEndpoint>, ConfigError> {
        let field = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let primary = field(&self.panorama1)
            .ok_or_else(|| ConfigError::InvalidSecret("panorama1 is missing".to_string()))?;
        let username = field(&self.username)
            .ok_or_else(|| ConfigError::InvalidSecret("username is missing".to_string()))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| ConfigError::InvalidSecret("password is missing".to_string()))?;
        let license_manager = field(&self.license_manager)
            .ok_or_else(|| ConfigError::InvalidSecret("license_manager is missing".to_string()))?;

        let mut endpoints = vec![ControllerEndpoint {
            hostname: primary,
            username: username.clone(),
            password: password.clone(),
            license_manager_name: license_manager.clone(),
        }];
        // A blank `panorama2` counts as no secondary, same as a missing key.
        if let Some(secondary) = field(&self.panorama2) {
            endpoints.push(ControllerEndpoint {
                hostname: secondary,
                username,
                password,
                license_manager_name: license_manager,
            });
        }
        Ok(endpoints)
    }
}

impl fmt::Debug for PanoramaSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanoramaSecret")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("panorama1", &self.panorama1)
            .field("panorama2", &self.panorama2)
            .field("license_manager", &self.license_manager)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub license_manager_name: String,
}

impl fmt::Debug for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerEndpoint")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"***")
            .field("license_manager_name", &self.license_manager_name)
            .finish()
    }
}

/// One entry of the license manager's device inventory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LicenseRecord {
    #[serde(default)]
    pub management_ip: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl LicenseRecord {
    /// Exact string equality; prefixes and substrings never match.
    pub fn matches_ip(&self, ip: &str) -> bool {
        self.management_ip.as_deref() == Some(ip)
    }
}
