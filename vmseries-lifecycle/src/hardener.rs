use serde_json::json;
use vmseries_common::AttachmentRef;
use vmseries_providers::ComputePlatform;

use crate::logger;

/// Outcome of a best-effort step whose failure never stops the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped(String),
    Failed(String),
}

/// Disables the source/destination check on the instance's first interface.
/// Traffic-forwarding firewalls need it off; launch templates leave it on.
pub async fn harden(
    compute: &dyn ComputePlatform,
    instance_id: &str,
    attachment: Option<&AttachmentRef>,
) -> StepOutcome {
    let Some(attachment) = attachment else {
        tracing::warn!(instance_id, "[harden] instance has no network interface, skipping");
        return StepOutcome::Skipped("no primary interface".to_string());
    };

    tracing::info!(
        instance_id,
        interface_id = %attachment.id,
        "[harden] disabling source_dest_check"
    );
    let log = logger::log_event(
        "PROVIDER_DISABLE_SOURCE_DEST_CHECK",
        instance_id,
        Some(json!({"interface_id": attachment.id})),
    );
    match compute.disable_source_dest_check(&attachment.id).await {
        Ok(()) => {
            log.success();
            StepOutcome::Done
        }
        Err(e) => {
            let msg = e.to_string();
            log.failed(&msg);
            StepOutcome::Failed(msg)
        }
    }
}
