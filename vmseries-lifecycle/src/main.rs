use anyhow::{bail, Context};
use tokio::io::AsyncReadExt;
use vmseries_lifecycle::logger;
use vmseries_lifecycle::provider_manager::ProviderManager;
use vmseries_lifecycle::{LifecycleOrchestrator, Settings};

/// Reads one lifecycle event (file path argument, or stdin) and handles it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logger::init_tracing();

    let settings = Settings::from_env()?;

    let payload = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read event file {}", path))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read event from stdin")?;
            buf
        }
    };

    let backend = ProviderManager::current_backend_name();
    let Some(backends) = ProviderManager::get_backends(&backend, &settings)? else {
        bail!("unknown lifecycle backend: {}", backend);
    };

    let orchestrator = LifecycleOrchestrator::new(settings, backends);
    match orchestrator.run_json(&payload).await {
        Ok(report) => {
            tracing::info!(
                invocation_id = %report.invocation_id,
                kind = report.kind.as_str(),
                instance_id = %report.instance_id,
                hardening = ?report.hardening,
                provisioning = ?report.provisioning,
                delicensed = ?report.delicensed,
                completion = ?report.completion,
                "invocation finished"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "invocation aborted, lifecycle action left pending");
            Err(e.into())
        }
    }
}
