use serde_json::json;
use vmseries_common::{AttachmentRef, AttachmentSpec, ConfigError};
use vmseries_providers::ComputePlatform;

use crate::logger;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Interface attached; the flag tells whether delete-on-termination stuck.
    Attached {
        interface: AttachmentRef,
        delete_on_termination: bool,
    },
    /// Nothing was created, so there is nothing to roll back.
    CreateFailed { error: String },
    /// Attach failed and the created interface was deleted (or the delete
    /// was attempted and failed, see `deleted`).
    RolledBack {
        interface_id: String,
        attach_error: String,
        deleted: bool,
    },
    /// The target index is the primary slot; nothing to provision.
    NothingToAttach,
}

/// Creates the additional interface for a launching instance and hands it
/// over to the instance.
pub struct AttachmentProvisioner<'a> {
    compute: &'a dyn ComputePlatform,
    settings: &'a Settings,
}

impl<'a> AttachmentProvisioner<'a> {
    pub fn new(compute: &'a dyn ComputePlatform, settings: &'a Settings) -> Self {
        Self { compute, settings }
    }

    pub fn attachment_spec(&self, zone: &str) -> Result<AttachmentSpec, ConfigError> {
        let table = self.settings.subnet_table()?;
        AttachmentSpec::for_zone(&table, zone, self.settings.security_group()?)
    }

    /// Only configuration problems are returned as errors; platform failures
    /// are logged and reported through the outcome.
    pub async fn provision(
        &self,
        zone: &str,
        instance_id: &str,
    ) -> Result<ProvisionOutcome, ConfigError> {
        let spec = self.attachment_spec(zone)?;
        tracing::info!(
            instance_id,
            zone,
            index = spec.target_index,
            subnet = %spec.subnet_id,
            security_group = %spec.security_group_id,
            "[provision] found new interface to create"
        );

        if !spec.needs_attach() {
            tracing::warn!(instance_id, "[provision] target index is the primary slot, skipping");
            return Ok(ProvisionOutcome::NothingToAttach);
        }

        let interface_id = match self.create(instance_id, &spec).await {
            Ok(id) => id,
            Err(error) => return Ok(ProvisionOutcome::CreateFailed { error }),
        };

        // From here until the attach succeeds the interface is ours to clean up.
        let attachment_id = match self.attach(instance_id, &interface_id, spec.target_index).await {
            Ok(id) => id,
            Err(attach_error) => {
                let deleted = self.delete_best_effort(instance_id, &interface_id).await;
                return Ok(ProvisionOutcome::RolledBack {
                    interface_id,
                    attach_error,
                    deleted,
                });
            }
        };

        let delete_on_termination = self
            .set_delete_on_termination(instance_id, &interface_id, &attachment_id)
            .await;

        Ok(ProvisionOutcome::Attached {
            interface: AttachmentRef {
                id: interface_id,
                attachment_id: Some(attachment_id),
            },
            delete_on_termination,
        })
    }

    async fn create(&self, instance_id: &str, spec: &AttachmentSpec) -> Result<String, String> {
        tracing::debug!(
            instance_id,
            subnet_id = %spec.subnet_id,
            sg_id = %spec.security_group_id,
            "[provision] create_interface"
        );
        let log = logger::log_event(
            "PROVIDER_CREATE_INTERFACE",
            instance_id,
            Some(json!({"subnet_id": spec.subnet_id, "security_group_id": spec.security_group_id})),
        );
        match self
            .compute
            .create_network_interface(&spec.subnet_id, &spec.security_group_id)
            .await
        {
            Ok(id) => {
                log.success();
                tracing::info!(instance_id, interface_id = %id, "[provision] created network interface");
                Ok(id)
            }
            Err(e) => {
                let msg = format!("Error creating network interface: {}", e);
                log.failed(&msg);
                Err(msg)
            }
        }
    }

    async fn attach(
        &self,
        instance_id: &str,
        interface_id: &str,
        device_index: u32,
    ) -> Result<String, String> {
        let log = logger::log_event(
            "PROVIDER_ATTACH_INTERFACE",
            instance_id,
            Some(json!({"interface_id": interface_id, "device_index": device_index})),
        );
        match self
            .compute
            .attach_network_interface(instance_id, interface_id, device_index)
            .await
        {
            Ok(id) => {
                log.success();
                tracing::info!(instance_id, attachment_id = %id, "[provision] created network attachment");
                Ok(id)
            }
            Err(e) => {
                let msg = format!("Error attaching network interface {}: {}", interface_id, e);
                log.failed(&msg);
                Err(msg)
            }
        }
    }

    /// Not retried; a failure leaves the interface behind and is only logged.
    async fn delete_best_effort(&self, instance_id: &str, interface_id: &str) -> bool {
        tracing::info!(instance_id, interface_id, "[provision] deleting interface");
        let log = logger::log_event(
            "PROVIDER_DELETE_INTERFACE",
            instance_id,
            Some(json!({"interface_id": interface_id, "reason": "attach_failed"})),
        );
        match self.compute.delete_network_interface(interface_id).await {
            Ok(()) => {
                log.success();
                true
            }
            Err(e) => {
                log.failed(&format!("Error deleting interface {}: {}", interface_id, e));
                false
            }
        }
    }

    async fn set_delete_on_termination(
        &self,
        instance_id: &str,
        interface_id: &str,
        attachment_id: &str,
    ) -> bool {
        let log = logger::log_event(
            "PROVIDER_SET_DELETE_ON_TERMINATION",
            instance_id,
            Some(json!({"interface_id": interface_id, "attachment_id": attachment_id})),
        );
        match self
            .compute
            .set_delete_on_termination(interface_id, attachment_id)
            .await
        {
            Ok(()) => {
                log.success();
                true
            }
            Err(e) => {
                log.failed(&e.to_string());
                false
            }
        }
    }
}
