use anyhow::Result;
use async_trait::async_trait;
use vmseries_common::{ControllerEndpoint, InstanceContext, LifecycleActionResult};

pub mod panorama;
pub mod secrets;

/// Compute platform calls used by both lifecycle paths.
///
/// Every call is a single request/response; callers decide which failures
/// are fatal.
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceContext>;

    /// Returns the new interface id.
    async fn create_network_interface(
        &self,
        subnet_id: &str,
        security_group_id: &str,
    ) -> Result<String>;

    /// Returns the attachment id.
    async fn attach_network_interface(
        &self,
        instance_id: &str,
        interface_id: &str,
        device_index: u32,
    ) -> Result<String>;

    async fn set_delete_on_termination(&self, interface_id: &str, attachment_id: &str)
        -> Result<()>;

    async fn delete_network_interface(&self, interface_id: &str) -> Result<()>;

    async fn disable_source_dest_check(&self, interface_id: &str) -> Result<()>;

    // Optional: full interface listing, only used for diagnostics.
    // Default implementation returns an empty list.
    async fn list_instance_interfaces(
        &self,
        _instance_id: &str,
    ) -> Result<Vec<inventory::InterfaceSummary>> {
        Ok(vec![])
    }

    /// Private IP of the interface attached at `device_index`, if any.
    async fn interface_ip_at_index(
        &self,
        instance_id: &str,
        device_index: u32,
    ) -> Result<Option<String>>;
}

#[async_trait]
pub trait Autoscaler: Send + Sync {
    async fn complete_lifecycle_action(
        &self,
        hook_name: &str,
        group_name: &str,
        action_token: &str,
        result: LifecycleActionResult,
    ) -> Result<()>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_string(&self, reference: &str) -> Result<String>;
}

/// Opens command sessions against a management controller.
#[async_trait]
pub trait ControllerConnector: Send + Sync {
    async fn connect(&self, endpoint: &ControllerEndpoint) -> Result<Box<dyn ControllerSession>>;
}

#[async_trait]
pub trait ControllerSession: Send + Sync {
    /// Runs an operational command (see [`panorama`]) and returns the typed
    /// view of the reply, as built by
    /// [`ControllerResponse::from_xml`](inventory::ControllerResponse::from_xml).
    async fn op(&self, command: &str) -> Result<inventory::ControllerResponse>;

    /// `sync = false` returns as soon as the commit job is queued.
    async fn commit(&self, admins: &str, sync: bool) -> Result<()>;
}

pub mod inventory {
    use anyhow::{Context, Result};
    use roxmltree::Node;
    use serde::{Deserialize, Serialize};
    use vmseries_common::LicenseRecord;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InterfaceSummary {
        pub interface_id: String,
        pub device_index: Option<u32>,
        pub private_ip: Option<String>,
        pub attachment_id: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum ResponseStatus {
        Success,
        Error,
        Other(String),
    }

    impl ResponseStatus {
        pub fn parse(raw: &str) -> Self {
            match raw {
                "success" => ResponseStatus::Success,
                "error" => ResponseStatus::Error,
                other => ResponseStatus::Other(other.to_string()),
            }
        }
    }

    /// Typed view of a controller reply: the top-level status plus the parts
    /// of the body the lifecycle handler reads.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ControllerResponse {
        pub status: ResponseStatus,
        /// `state` under the local peer's HA info.
        pub ha_local_state: Option<String>,
        /// Device inventory in the order the controller returned it.
        pub devices: Vec<LicenseRecord>,
    }

    impl ControllerResponse {
        pub fn with_status(status: ResponseStatus) -> Self {
            Self {
                status,
                ha_local_state: None,
                devices: vec![],
            }
        }

        pub fn is_success(&self) -> bool {
            self.status == ResponseStatus::Success
        }

        /// Builds the view from a raw `<response status="...">` document.
        ///
        /// - `ha_local_state`: every `local-info` child of the first result
        ///   element is scanned and the last `state` found wins.
        /// - `devices`: one record per child of the first element under the
        ///   first result element, reading its optional `ip` and `serial`.
        pub fn from_xml(raw: &str) -> Result<Self> {
            let doc = roxmltree::Document::parse(raw).context("invalid controller reply")?;
            let root = doc.root_element();
            let status = ResponseStatus::parse(root.attribute("status").unwrap_or_default());

            let result = first_element(root);
            let ha_local_state = result.and_then(|result| {
                result
                    .children()
                    .filter(|n| n.has_tag_name("local-info"))
                    .flat_map(|info| info.children().filter(|n| n.has_tag_name("state")))
                    .last()
                    .map(|state| state.text().unwrap_or_default().trim().to_string())
            });

            let devices = result
                .and_then(first_element)
                .map(|list| {
                    list.children()
                        .filter(|n| n.is_element())
                        .map(|device| LicenseRecord {
                            management_ip: child_text(device, "ip"),
                            serial_number: child_text(device, "serial"),
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(Self {
                status,
                ha_local_state,
                devices,
            })
        }
    }

    fn first_element<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
        node.children().find(|n| n.is_element())
    }

    /// Text of the first `tag` child; absent and empty elements both give `None`.
    fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
        node.children()
            .find(|n| n.has_tag_name(tag))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

}

#[cfg(feature = "mock")]
pub mod mock;
