use serde::{Deserialize, Serialize};

use crate::ConfigError;

// -----------------------------------------------------------------------------
// Lifecycle action types (`detail-type`)
// -----------------------------------------------------------------------------

pub const DETAIL_TYPE_LAUNCH: &str = "EC2 Instance-launch Lifecycle Action";
pub const DETAIL_TYPE_TERMINATE: &str = "EC2 Instance-terminate Lifecycle Action";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Launch,
    Terminate,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Launch => DETAIL_TYPE_LAUNCH,
            LifecycleKind::Terminate => DETAIL_TYPE_TERMINATE,
        }
    }

    /// Exact, case-sensitive match against the two recognized literals.
    pub fn classify(detail_type: &str) -> Result<Self, ConfigError> {
        match detail_type {
            DETAIL_TYPE_LAUNCH => Ok(LifecycleKind::Launch),
            DETAIL_TYPE_TERMINATE => Ok(LifecycleKind::Terminate),
            other => Err(ConfigError::UnrecognizedEvent(other.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// Completion result sent back to the autoscaler
// -----------------------------------------------------------------------------

/// The handler only ever lets the instance proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleActionResult {
    Continue,
}

impl LifecycleActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleActionResult::Continue => "CONTINUE",
        }
    }
}

// -----------------------------------------------------------------------------
// Inbound envelope (event bus payload)
// -----------------------------------------------------------------------------

/// Only `detail-type` and `detail` drive the handler. The bus id is kept
/// as raw JSON for log correlation; every other envelope field is ignored.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RawLifecycleEvent {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LifecycleDetail {
    #[serde(rename = "EC2InstanceId")]
    pub ec2_instance_id: String,
    #[serde(rename = "LifecycleHookName")]
    pub lifecycle_hook_name: String,
    #[serde(rename = "AutoScalingGroupName")]
    pub auto_scaling_group_name: String,
    #[serde(rename = "LifecycleActionToken")]
    pub lifecycle_action_token: String,
}

/// One lifecycle action, built once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub instance_id: String,
    pub hook_name: String,
    pub group_name: String,
    pub action_token: String,
}

impl LifecycleEvent {
    /// Classifies first, so an unknown `detail-type` is reported as such even
    /// when the detail block is incomplete.
    pub fn from_raw(raw: RawLifecycleEvent) -> Result<Self, ConfigError> {
        let kind = LifecycleKind::classify(&raw.detail_type)?;
        let detail: LifecycleDetail = serde_json::from_value(raw.detail)
            .map_err(|e| ConfigError::MalformedEvent(e.to_string()))?;
        Ok(Self {
            kind,
            instance_id: detail.ec2_instance_id,
            hook_name: detail.lifecycle_hook_name,
            group_name: detail.auto_scaling_group_name,
            action_token: detail.lifecycle_action_token,
        })
    }
}
