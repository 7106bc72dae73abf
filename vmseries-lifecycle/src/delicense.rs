//! Terminate path: release the firewall's license on the management
//! controller before the instance disappears.
//!
//! Failures after the secret reference check are logged and turn into a
//! `false` outcome; only a missing reference aborts the invocation.

use anyhow::{Context, Result};
use serde_json::json;
use vmseries_common::{ConfigError, ControllerEndpoint, PanoramaSecret, MANAGEMENT_DEVICE_INDEX};
use vmseries_providers::panorama::{ControllerCommand, HA_ACTIVE, LICENSE_PLUGIN_ADMIN};
use vmseries_providers::{ComputePlatform, ControllerConnector, SecretStore};

use crate::logger;
use crate::settings::Settings;
use crate::state_machine::{DelicenseStage, StageTracker};

pub struct DelicenseCoordinator<'a> {
    compute: &'a dyn ComputePlatform,
    secrets: &'a dyn SecretStore,
    controllers: &'a dyn ControllerConnector,
    settings: &'a Settings,
}

impl<'a> DelicenseCoordinator<'a> {
    pub fn new(
        compute: &'a dyn ComputePlatform,
        secrets: &'a dyn SecretStore,
        controllers: &'a dyn ControllerConnector,
        settings: &'a Settings,
    ) -> Self {
        Self {
            compute,
            secrets,
            controllers,
            settings,
        }
    }

    /// Returns `Ok(true)` iff at least one license record matching the
    /// instance's management IP was deactivated.
    pub async fn delicense(&self, instance_id: &str) -> Result<bool, ConfigError> {
        let mut stages = StageTracker::new(instance_id);

        // Lookup and credential failures end in `false` rather than aborting,
        // so the terminating instance is still released to the autoscaler.
        let ip = match self.management_ip(instance_id).await {
            Ok(Some(ip)) => ip,
            Ok(None) => {
                tracing::info!(instance_id, "[delicense] no management interface found, skipping");
                stages.finish("management interface not found");
                return Ok(false);
            }
            Err(e) => {
                tracing::error!(instance_id, error = %e, "[delicense] management IP lookup failed");
                stages.finish("management IP lookup failed");
                return Ok(false);
            }
        };
        tracing::debug!(instance_id, ip = %ip, "[delicense] found VM-Series management IP");

        stages.advance(DelicenseStage::ResolveCredentials, "management IP resolved");
        let reference = self.settings.secret_reference()?;
        let candidates = match self.load_endpoints(reference).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(instance_id, error = %e, "[delicense] cannot load controller credentials");
                stages.finish("credentials unavailable");
                return Ok(false);
            }
        };

        stages.advance(DelicenseStage::SelectEndpoint, "credentials loaded");
        let outcome = match self.delicense_with(instance_id, &ip, &candidates, &mut stages).await {
            Ok(delicensed) => delicensed,
            Err(e) => {
                tracing::error!(
                    instance_id,
                    stage = stages.current().as_str(),
                    error = %format!("{:#}", e),
                    "[delicense] error while de-licensing VM-Series"
                );
                false
            }
        };
        stages.finish(if outcome { "delicensed" } else { "nothing delicensed" });
        Ok(outcome)
    }

    async fn management_ip(&self, instance_id: &str) -> Result<Option<String>> {
        // Diagnostics only; a failing listing does not affect the lookup.
        match self.compute.list_instance_interfaces(instance_id).await {
            Ok(all) => tracing::debug!(instance_id, interfaces = ?all, "[delicense] found interfaces"),
            Err(e) => tracing::debug!(instance_id, error = %e, "[delicense] interface listing failed"),
        }
        self.compute
            .interface_ip_at_index(instance_id, MANAGEMENT_DEVICE_INDEX)
            .await
    }

    async fn load_endpoints(&self, reference: &str) -> Result<Vec<ControllerEndpoint>> {
        let raw = self
            .secrets
            .get_secret_string(reference)
            .await
            .context("failed to read controller secret")?;
        let secret = PanoramaSecret::parse(&raw)?;
        Ok(secret.candidate_endpoints()?)
    }

    /// Picks the controller that should receive commands. With a single
    /// candidate it is used as is. With an HA pair the first is used only
    /// when it reports itself active; a failed or unparsable check counts as
    /// "not active".
    pub async fn select_active<'e>(
        &self,
        candidates: &'e [ControllerEndpoint],
    ) -> Option<&'e ControllerEndpoint> {
        match candidates {
            [] => None,
            [only] => Some(only),
            [first, second, ..] => {
                if self.is_active_in_ha(first).await {
                    Some(first)
                } else {
                    Some(second)
                }
            }
        }
    }

    async fn is_active_in_ha(&self, endpoint: &ControllerEndpoint) -> bool {
        tracing::info!(
            hostname = %endpoint.hostname,
            username = %endpoint.username,
            "[delicense] checking high-availability state"
        );
        let state = async {
            let session = self.controllers.connect(endpoint).await?;
            let resp = session
                .op(&ControllerCommand::HaState.to_command_string())
                .await?;
            Ok::<_, anyhow::Error>(resp.ha_local_state)
        }
        .await;

        match state {
            Ok(Some(state)) => state == HA_ACTIVE,
            Ok(None) => {
                tracing::info!(hostname = %endpoint.hostname, "[delicense] HA state missing from reply");
                false
            }
            Err(e) => {
                tracing::info!(
                    hostname = %endpoint.hostname,
                    error = %e,
                    "[delicense] error while checking high-availability state"
                );
                false
            }
        }
    }

    async fn delicense_with(
        &self,
        instance_id: &str,
        ip: &str,
        candidates: &[ControllerEndpoint],
        stages: &mut StageTracker,
    ) -> Result<bool> {
        let endpoint = self
            .select_active(candidates)
            .await
            .context("no controller endpoint configured")?;
        let lm = endpoint.license_manager_name.as_str();

        stages.advance(DelicenseStage::QueryInventory, &endpoint.hostname);
        tracing::info!(
            hostname = %endpoint.hostname,
            username = %endpoint.username,
            license_manager = lm,
            "[delicense] connecting to controller"
        );
        let session = self
            .controllers
            .connect(endpoint)
            .await
            .with_context(|| format!("failed to connect to {}", endpoint.hostname))?;

        let list = ControllerCommand::ListDevices {
            license_manager: lm.to_string(),
        };
        let inventory = session.op(&list.to_command_string()).await?;
        if !inventory.is_success() {
            tracing::warn!(
                hostname = %endpoint.hostname,
                status = ?inventory.status,
                "[delicense] device list query did not succeed"
            );
            return Ok(false);
        }

        stages.advance(DelicenseStage::MatchAndDeactivate, "inventory listed");
        let mut any_deactivated = false;
        for record in &inventory.devices {
            let Some(record_ip) = record.management_ip.as_deref() else {
                continue;
            };
            tracing::debug!(ip = record_ip, "[delicense] working on VM-Series");
            if !record.matches_ip(ip) {
                continue;
            }
            let Some(serial) = record.serial_number.as_deref() else {
                tracing::warn!(ip = record_ip, "[delicense] matching record has no serial");
                continue;
            };

            let log = logger::log_event(
                "CONTROLLER_DEACTIVATE_LICENSE",
                instance_id,
                Some(json!({"hostname": endpoint.hostname, "serial": serial, "license_manager": lm})),
            );
            let deactivate = ControllerCommand::Deactivate {
                license_manager: lm.to_string(),
                serial: serial.to_string(),
            };
            let resp = session.op(&deactivate.to_command_string()).await?;
            if resp.is_success() {
                log.success();
                any_deactivated = true;
            } else {
                log.failed(&format!("deactivation of {} returned {:?}", serial, resp.status));
            }
        }

        if any_deactivated {
            stages.advance(DelicenseStage::Commit, "license released");
            tracing::info!(hostname = %endpoint.hostname, "[delicense] committing changes");
            session
                .commit(LICENSE_PLUGIN_ADMIN, false)
                .await
                .context("commit failed")?;
        }

        Ok(any_deactivated)
    }
}
