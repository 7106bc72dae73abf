use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;
use vmseries_common::bus::RawLifecycleEvent;
use vmseries_common::{
    ConfigError, LifecycleActionResult, LifecycleError, LifecycleEvent, LifecycleKind,
};
use vmseries_providers::{Autoscaler, ComputePlatform, ControllerConnector, SecretStore};

use crate::delicense::DelicenseCoordinator;
use crate::hardener::{self, StepOutcome};
use crate::logger;
use crate::provisioner::{AttachmentProvisioner, ProvisionOutcome};
use crate::settings::Settings;

/// Already-initialised collaborator handles for one orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub compute: Arc<dyn ComputePlatform>,
    pub autoscaler: Arc<dyn Autoscaler>,
    pub secrets: Arc<dyn SecretStore>,
    pub controllers: Arc<dyn ControllerConnector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Signaled,
    Failed(String),
}

/// What a single invocation did, path by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub invocation_id: Uuid,
    pub kind: LifecycleKind,
    pub instance_id: String,
    pub hardening: Option<StepOutcome>,
    pub provisioning: Option<ProvisionOutcome>,
    /// `None` when delicensing is disabled.
    pub delicensed: Option<bool>,
    pub completion: CompletionOutcome,
}

impl RunReport {
    fn new(event: &LifecycleEvent, invocation_id: Uuid) -> Self {
        Self {
            invocation_id,
            kind: event.kind,
            instance_id: event.instance_id.clone(),
            hardening: None,
            provisioning: None,
            delicensed: None,
            completion: CompletionOutcome::Signaled,
        }
    }
}

pub struct LifecycleOrchestrator {
    settings: Settings,
    backends: Backends,
}

impl LifecycleOrchestrator {
    pub fn new(settings: Settings, backends: Backends) -> Self {
        Self { settings, backends }
    }

    pub async fn run_json(&self, payload: &str) -> Result<RunReport, LifecycleError> {
        let raw: RawLifecycleEvent = serde_json::from_str(payload)
            .map_err(|e| ConfigError::MalformedEvent(e.to_string()))?;
        self.run(raw).await
    }

    /// Handles one inbound event. An `Err` means the lifecycle action was
    /// deliberately left uncompleted; the autoscaler's timeout governs what
    /// happens to the instance.
    pub async fn run(&self, raw: RawLifecycleEvent) -> Result<RunReport, LifecycleError> {
        tracing::info!(detail_type = %raw.detail_type, id = ?raw.id, "received event");
        let event = LifecycleEvent::from_raw(raw).map_err(|e| {
            tracing::error!(error = %e, "rejecting lifecycle event");
            e
        })?;
        self.handle(&event).await
    }

    pub async fn handle(&self, event: &LifecycleEvent) -> Result<RunReport, LifecycleError> {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "lifecycle",
            %invocation_id,
            kind = event.kind.as_str(),
            instance_id = %event.instance_id
        );
        async {
            let mut report = RunReport::new(event, invocation_id);
            match event.kind {
                LifecycleKind::Launch => {
                    tracing::info!("run launch mode");
                    self.launch(event, &mut report).await?;
                }
                LifecycleKind::Terminate => {
                    tracing::info!("run cleanup mode");
                    self.terminate(event, &mut report).await?;
                }
            }
            report.completion = self.complete(event).await;
            Ok::<_, LifecycleError>(report)
        }
        .instrument(span)
        .await
    }

    async fn launch(
        &self,
        event: &LifecycleEvent,
        report: &mut RunReport,
    ) -> Result<(), LifecycleError> {
        let compute = self.backends.compute.as_ref();
        let context = compute
            .describe_instance(&event.instance_id)
            .await
            .map_err(|e| LifecycleError::InstanceContext {
                instance_id: event.instance_id.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(
            zone = %context.zone,
            subnet = %context.subnet,
            attachments = context.existing_attachments.len(),
            "instance info"
        );

        report.hardening =
            Some(hardener::harden(compute, &event.instance_id, context.primary_attachment()).await);

        let provisioner = AttachmentProvisioner::new(compute, &self.settings);
        let outcome = provisioner
            .provision(&context.zone, &event.instance_id)
            .await?;
        match &outcome {
            ProvisionOutcome::Attached { .. } => {
                logger::log_quick("INTERFACE_PROVISIONED", &event.instance_id, None)
            }
            other => tracing::warn!(outcome = ?other, "additional interface not provisioned"),
        }
        report.provisioning = Some(outcome);
        Ok(())
    }

    async fn terminate(
        &self,
        event: &LifecycleEvent,
        report: &mut RunReport,
    ) -> Result<(), LifecycleError> {
        if !self.settings.delicense_enabled {
            tracing::debug!("delicensing disabled");
            return Ok(());
        }
        let coordinator = DelicenseCoordinator::new(
            self.backends.compute.as_ref(),
            self.backends.secrets.as_ref(),
            self.backends.controllers.as_ref(),
            &self.settings,
        );
        let delicensed = coordinator.delicense(&event.instance_id).await?;
        tracing::info!(delicensed, "delicense finished");
        report.delicensed = Some(delicensed);
        Ok(())
    }

    /// Signals CONTINUE exactly once per handled event.
    async fn complete(&self, event: &LifecycleEvent) -> CompletionOutcome {
        tracing::debug!("completing lifecycle action");
        let log = logger::log_event(
            "AUTOSCALER_COMPLETE_LIFECYCLE",
            &event.instance_id,
            Some(serde_json::json!({
                "hook": event.hook_name,
                "group": event.group_name,
                "result": LifecycleActionResult::Continue.as_str(),
            })),
        );
        match self
            .backends
            .autoscaler
            .complete_lifecycle_action(
                &event.hook_name,
                &event.group_name,
                &event.action_token,
                LifecycleActionResult::Continue,
            )
            .await
        {
            Ok(()) => {
                log.success();
                CompletionOutcome::Signaled
            }
            Err(e) => {
                let msg = format!("Error completing life cycle hook for instance: {}", e);
                log.failed(&msg);
                CompletionOutcome::Failed(msg)
            }
        }
    }
}
