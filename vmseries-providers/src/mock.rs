use crate::inventory::{ControllerResponse, InterfaceSummary};
use crate::panorama::ControllerCommand;
use crate::{Autoscaler, ComputePlatform, ControllerConnector, ControllerSession, SecretStore};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use vmseries_common::{
    AttachmentRef, ControllerEndpoint, InstanceContext, LicenseRecord, LifecycleActionResult,
};

// -----------------------------------------------------------------------------
// Fixture (seed state)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockFixture {
    #[serde(default)]
    pub instances: BTreeMap<String, MockInstance>,
    /// Secret reference -> secret body (any JSON, stored as its string form).
    #[serde(default)]
    pub secrets: BTreeMap<String, serde_json::Value>,
    /// Controller hostname -> behaviour.
    #[serde(default)]
    pub controllers: BTreeMap<String, MockController>,
    #[serde(default)]
    pub faults: MockFaults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockInstance {
    pub zone: String,
    pub subnet: String,
    #[serde(default)]
    pub interfaces: Vec<MockInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockInterface {
    pub id: String,
    pub device_index: u32,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockController {
    /// Reported local HA state; `None` means the reply carries no state.
    #[serde(default)]
    pub ha_state: Option<String>,
    /// HA query fails at the transport level.
    #[serde(default)]
    pub ha_unreachable: bool,
    /// Connection itself is refused.
    #[serde(default)]
    pub unreachable: bool,
    /// License manager the controller knows; other names get an error reply.
    #[serde(default)]
    pub license_manager: Option<String>,
    #[serde(default = "default_status")]
    pub inventory_status: String,
    #[serde(default)]
    pub devices: Vec<LicenseRecord>,
    /// Serials whose deactivation is answered with an error status.
    #[serde(default)]
    pub failing_serials: Vec<String>,
    #[serde(default)]
    pub commit_fails: bool,
}

fn default_status() -> String {
    "success".to_string()
}

impl Default for MockController {
    fn default() -> Self {
        Self {
            ha_state: None,
            ha_unreachable: false,
            unreachable: false,
            license_manager: None,
            inventory_status: default_status(),
            devices: vec![],
            failing_serials: vec![],
            commit_fails: false,
        }
    }
}

impl MockController {
    pub fn with_devices(devices: Vec<LicenseRecord>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }
}

/// Calls that fail with a platform error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockFaults {
    #[serde(default)]
    pub describe_instance: bool,
    #[serde(default)]
    pub create_interface: bool,
    #[serde(default)]
    pub attach_interface: bool,
    #[serde(default)]
    pub set_delete_on_termination: bool,
    #[serde(default)]
    pub delete_interface: bool,
    #[serde(default)]
    pub disable_source_dest_check: bool,
    #[serde(default)]
    pub interface_lookup: bool,
    #[serde(default)]
    pub complete_lifecycle: bool,
    #[serde(default)]
    pub get_secret: bool,
}

// -----------------------------------------------------------------------------
// Journal
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    DescribeInstance {
        instance_id: String,
    },
    CreateInterface {
        subnet_id: String,
        security_group_id: String,
    },
    AttachInterface {
        instance_id: String,
        interface_id: String,
        device_index: u32,
    },
    SetDeleteOnTermination {
        interface_id: String,
        attachment_id: String,
    },
    DeleteInterface {
        interface_id: String,
    },
    DisableSourceDestCheck {
        interface_id: String,
    },
    ListInterfaces {
        instance_id: String,
    },
    InterfaceIp {
        instance_id: String,
        device_index: u32,
    },
    CompleteLifecycle {
        hook_name: String,
        group_name: String,
        action_token: String,
        result: LifecycleActionResult,
    },
    GetSecret {
        reference: String,
    },
    Connect {
        hostname: String,
    },
    ControllerOp {
        hostname: String,
        command: String,
    },
    Commit {
        hostname: String,
        admins: String,
        sync: bool,
    },
}

/// Interface created through the mock, tracked until deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInterface {
    pub id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub attached_to: Option<(String, u32)>,
    pub attachment_id: Option<String>,
    pub delete_on_termination: bool,
}

#[derive(Debug, Default)]
struct MockState {
    fixture: MockFixture,
    created: BTreeMap<String, CreatedInterface>,
    source_dest_disabled: BTreeSet<String>,
    next_id: u64,
    journal: Vec<RecordedCall>,
}

impl MockState {
    fn record(&mut self, call: RecordedCall) {
        self.journal.push(call);
    }

    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-mock{:04}", prefix, self.next_id)
    }
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

/// In-memory simulation of the compute platform, autoscaler, secret store and
/// management controllers. Clones share state, so one instance can be handed
/// out for every collaborator role and inspected afterwards.
#[derive(Clone, Default)]
pub struct MockCloud {
    state: Arc<Mutex<MockState>>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: MockFixture) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                fixture,
                ..Default::default()
            })),
        }
    }

    pub fn from_fixture_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read mock fixture {}", path.display()))?;
        let fixture: MockFixture = serde_json::from_str(&raw)
            .with_context(|| format!("invalid mock fixture {}", path.display()))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_instance(self, instance_id: &str, instance: MockInstance) -> Self {
        self.lock()
            .fixture
            .instances
            .insert(instance_id.to_string(), instance);
        self
    }

    pub fn with_secret(self, reference: &str, value: serde_json::Value) -> Self {
        self.lock()
            .fixture
            .secrets
            .insert(reference.to_string(), value);
        self
    }

    pub fn with_controller(self, hostname: &str, controller: MockController) -> Self {
        self.lock()
            .fixture
            .controllers
            .insert(hostname.to_string(), controller);
        self
    }

    pub fn with_faults(self, faults: MockFaults) -> Self {
        self.lock().fixture.faults = faults;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call made against this backend, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().journal.clone()
    }

    pub fn completions(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, RecordedCall::CompleteLifecycle { .. }))
            .collect()
    }

    /// Commands sent to `hostname`, in order.
    pub fn controller_commands(&self, hostname: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::ControllerOp {
                    hostname: h,
                    command,
                } if h == hostname => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn deactivated_serials(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::ControllerOp { command, .. } => match ControllerCommand::parse(&command)
                {
                    Some(ControllerCommand::Deactivate { serial, .. }) => Some(serial),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, RecordedCall::Commit { .. }))
            .collect()
    }

    /// Interfaces created through this backend that still exist.
    pub fn live_interfaces(&self) -> Vec<CreatedInterface> {
        self.lock().created.values().cloned().collect()
    }

    pub fn source_dest_disabled(&self, interface_id: &str) -> bool {
        self.lock().source_dest_disabled.contains(interface_id)
    }
}

#[async_trait]
impl ComputePlatform for MockCloud {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceContext> {
        let mut st = self.lock();
        st.record(RecordedCall::DescribeInstance {
            instance_id: instance_id.to_string(),
        });
        if st.fixture.faults.describe_instance {
            return Err(anyhow!("RequestLimitExceeded: describe_instances throttled"));
        }
        let inst = st
            .fixture
            .instances
            .get(instance_id)
            .ok_or_else(|| anyhow!("InvalidInstanceID.NotFound: {}", instance_id))?;
        let mut interfaces = inst.interfaces.clone();
        interfaces.sort_by_key(|i| i.device_index);
        Ok(InstanceContext {
            zone: inst.zone.clone(),
            subnet: inst.subnet.clone(),
            existing_attachments: interfaces
                .into_iter()
                .map(|i| AttachmentRef {
                    id: i.id,
                    attachment_id: i.attachment_id,
                })
                .collect(),
        })
    }

    async fn create_network_interface(
        &self,
        subnet_id: &str,
        security_group_id: &str,
    ) -> Result<String> {
        let mut st = self.lock();
        st.record(RecordedCall::CreateInterface {
            subnet_id: subnet_id.to_string(),
            security_group_id: security_group_id.to_string(),
        });
        if st.fixture.faults.create_interface {
            return Err(anyhow!("InsufficientFreeAddressesInSubnet: {}", subnet_id));
        }
        let id = st.next("eni");
        st.created.insert(
            id.clone(),
            CreatedInterface {
                id: id.clone(),
                subnet_id: subnet_id.to_string(),
                security_group_id: security_group_id.to_string(),
                attached_to: None,
                attachment_id: None,
                delete_on_termination: false,
            },
        );
        Ok(id)
    }

    async fn attach_network_interface(
        &self,
        instance_id: &str,
        interface_id: &str,
        device_index: u32,
    ) -> Result<String> {
        let mut st = self.lock();
        st.record(RecordedCall::AttachInterface {
            instance_id: instance_id.to_string(),
            interface_id: interface_id.to_string(),
            device_index,
        });
        if st.fixture.faults.attach_interface {
            return Err(anyhow!("UnauthorizedOperation: ec2:AttachNetworkInterface"));
        }
        if !st.created.contains_key(interface_id) {
            return Err(anyhow!("InvalidNetworkInterfaceID.NotFound: {}", interface_id));
        }
        let attachment_id = st.next("eni-attach");
        if let Some(eni) = st.created.get_mut(interface_id) {
            eni.attached_to = Some((instance_id.to_string(), device_index));
            eni.attachment_id = Some(attachment_id.clone());
        }
        Ok(attachment_id)
    }

    async fn set_delete_on_termination(
        &self,
        interface_id: &str,
        attachment_id: &str,
    ) -> Result<()> {
        let mut st = self.lock();
        st.record(RecordedCall::SetDeleteOnTermination {
            interface_id: interface_id.to_string(),
            attachment_id: attachment_id.to_string(),
        });
        if st.fixture.faults.set_delete_on_termination {
            return Err(anyhow!("InvalidAttachmentID.NotFound: {}", attachment_id));
        }
        let eni = st
            .created
            .get_mut(interface_id)
            .ok_or_else(|| anyhow!("InvalidNetworkInterfaceID.NotFound: {}", interface_id))?;
        if eni.attachment_id.as_deref() != Some(attachment_id) {
            return Err(anyhow!("InvalidAttachmentID.NotFound: {}", attachment_id));
        }
        eni.delete_on_termination = true;
        Ok(())
    }

    async fn delete_network_interface(&self, interface_id: &str) -> Result<()> {
        let mut st = self.lock();
        st.record(RecordedCall::DeleteInterface {
            interface_id: interface_id.to_string(),
        });
        if st.fixture.faults.delete_interface {
            return Err(anyhow!("InvalidNetworkInterfaceID.InUse: {}", interface_id));
        }
        st.created
            .remove(interface_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("InvalidNetworkInterfaceID.NotFound: {}", interface_id))
    }

    async fn disable_source_dest_check(&self, interface_id: &str) -> Result<()> {
        let mut st = self.lock();
        st.record(RecordedCall::DisableSourceDestCheck {
            interface_id: interface_id.to_string(),
        });
        if st.fixture.faults.disable_source_dest_check {
            return Err(anyhow!("UnauthorizedOperation: ec2:ModifyNetworkInterfaceAttribute"));
        }
        st.source_dest_disabled.insert(interface_id.to_string());
        Ok(())
    }

    async fn list_instance_interfaces(&self, instance_id: &str) -> Result<Vec<InterfaceSummary>> {
        let mut st = self.lock();
        st.record(RecordedCall::ListInterfaces {
            instance_id: instance_id.to_string(),
        });
        if st.fixture.faults.interface_lookup {
            return Err(anyhow!("RequestLimitExceeded: describe_network_interfaces throttled"));
        }
        let mut out: Vec<InterfaceSummary> = st
            .fixture
            .instances
            .get(instance_id)
            .map(|inst| {
                inst.interfaces
                    .iter()
                    .map(|i| InterfaceSummary {
                        interface_id: i.id.clone(),
                        device_index: Some(i.device_index),
                        private_ip: i.private_ip.clone(),
                        attachment_id: i.attachment_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.extend(
            st.created
                .values()
                .filter(|c| c.attached_to.as_ref().map(|(i, _)| i.as_str()) == Some(instance_id))
                .map(|c| InterfaceSummary {
                    interface_id: c.id.clone(),
                    device_index: c.attached_to.as_ref().map(|(_, idx)| *idx),
                    private_ip: None,
                    attachment_id: c.attachment_id.clone(),
                }),
        );
        Ok(out)
    }

    async fn interface_ip_at_index(
        &self,
        instance_id: &str,
        device_index: u32,
    ) -> Result<Option<String>> {
        let mut st = self.lock();
        st.record(RecordedCall::InterfaceIp {
            instance_id: instance_id.to_string(),
            device_index,
        });
        if st.fixture.faults.interface_lookup {
            return Err(anyhow!("RequestLimitExceeded: describe_network_interfaces throttled"));
        }
        Ok(st.fixture.instances.get(instance_id).and_then(|inst| {
            inst.interfaces
                .iter()
                .find(|i| i.device_index == device_index)
                .and_then(|i| i.private_ip.clone())
        }))
    }
}

#[async_trait]
impl Autoscaler for MockCloud {
    async fn complete_lifecycle_action(
        &self,
        hook_name: &str,
        group_name: &str,
        action_token: &str,
        result: LifecycleActionResult,
    ) -> Result<()> {
        let mut st = self.lock();
        st.record(RecordedCall::CompleteLifecycle {
            hook_name: hook_name.to_string(),
            group_name: group_name.to_string(),
            action_token: action_token.to_string(),
            result,
        });
        if st.fixture.faults.complete_lifecycle {
            return Err(anyhow!("ValidationError: No active Lifecycle Action found"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MockCloud {
    async fn get_secret_string(&self, reference: &str) -> Result<String> {
        let mut st = self.lock();
        st.record(RecordedCall::GetSecret {
            reference: reference.to_string(),
        });
        if st.fixture.faults.get_secret {
            return Err(anyhow!("AccessDeniedException: {}", reference));
        }
        match st.fixture.secrets.get(reference) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(anyhow!("ResourceNotFoundException: {}", reference)),
        }
    }
}

#[async_trait]
impl ControllerConnector for MockCloud {
    async fn connect(&self, endpoint: &ControllerEndpoint) -> Result<Box<dyn ControllerSession>> {
        let mut st = self.lock();
        st.record(RecordedCall::Connect {
            hostname: endpoint.hostname.clone(),
        });
        match st.fixture.controllers.get(&endpoint.hostname) {
            Some(c) if !c.unreachable => Ok(Box::new(MockSession {
                cloud: self.clone(),
                hostname: endpoint.hostname.clone(),
            })),
            _ => Err(anyhow!(
                "connection to {} refused",
                endpoint.hostname
            )),
        }
    }
}

struct MockSession {
    cloud: MockCloud,
    hostname: String,
}

#[async_trait]
impl ControllerSession for MockSession {
    async fn op(&self, command: &str) -> Result<ControllerResponse> {
        let mut st = self.cloud.lock();
        st.record(RecordedCall::ControllerOp {
            hostname: self.hostname.clone(),
            command: command.to_string(),
        });
        let ctrl = st
            .fixture
            .controllers
            .get(&self.hostname)
            .cloned()
            .ok_or_else(|| anyhow!("controller {} disappeared", self.hostname))?;

        let known_lm = |lm: &str| ctrl.license_manager.as_deref().map_or(true, |k| k == lm);

        let reply = match ControllerCommand::parse(command) {
            Some(ControllerCommand::HaState) => {
                if ctrl.ha_unreachable {
                    return Err(anyhow!("timed out waiting for {}", self.hostname));
                }
                ha_reply(ctrl.ha_state.as_deref())
            }
            Some(ControllerCommand::ListDevices { license_manager }) => {
                if known_lm(&license_manager) {
                    devices_reply(&ctrl.inventory_status, &ctrl.devices)
                } else {
                    error_reply("license manager not found")
                }
            }
            Some(ControllerCommand::Deactivate {
                license_manager,
                serial,
            }) => {
                if known_lm(&license_manager) && !ctrl.failing_serials.contains(&serial) {
                    r#"<response status="success"><result/></response>"#.to_string()
                } else {
                    error_reply("deactivation failed")
                }
            }
            None => error_reply("unknown command"),
        };
        ControllerResponse::from_xml(&reply)
    }

    async fn commit(&self, admins: &str, sync: bool) -> Result<()> {
        let mut st = self.cloud.lock();
        st.record(RecordedCall::Commit {
            hostname: self.hostname.clone(),
            admins: admins.to_string(),
            sync,
        });
        let fails = st
            .fixture
            .controllers
            .get(&self.hostname)
            .map(|c| c.commit_fails)
            .unwrap_or(true);
        if fails {
            return Err(anyhow!("commit rejected by {}", self.hostname));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Controller reply rendering
// -----------------------------------------------------------------------------

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn ha_reply(state: Option<&str>) -> String {
    let local = state
        .map(|s| format!("<local-info><state>{}</state></local-info>", escape(s)))
        .unwrap_or_default();
    format!(
        r#"<response status="success"><result><enabled>yes</enabled>{}</result></response>"#,
        local
    )
}

fn devices_reply(status: &str, devices: &[LicenseRecord]) -> String {
    let entries: String = devices
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let ip = d
                .management_ip
                .as_deref()
                .map(|v| format!("<ip>{}</ip>", escape(v)))
                .unwrap_or_default();
            let serial = d
                .serial_number
                .as_deref()
                .map(|v| format!("<serial>{}</serial>", escape(v)))
                .unwrap_or_default();
            format!(r#"<entry name="fw{}">{}{}</entry>"#, i, ip, serial)
        })
        .collect();
    format!(
        r#"<response status="{}"><result><devices>{}</devices></result></response>"#,
        escape(status),
        entries
    )
}

fn error_reply(message: &str) -> String {
    format!(
        r#"<response status="error"><msg><line>{}</line></msg></response>"#,
        escape(message)
    )
}
