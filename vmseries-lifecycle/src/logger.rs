use std::time::Instant;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// `logger_level` set -> INFO, unset -> DEBUG. `RUST_LOG` wins over both.
pub fn default_level(logger_level: Option<&str>) -> &'static str {
    match logger_level.map(str::trim) {
        Some(s) if !s.is_empty() => "info",
        _ => "debug",
    }
}

pub fn init_tracing() {
    let level = default_level(std::env::var("logger_level").ok().as_deref());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second init (tests, embedding) is harmless.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// One remote step of a lifecycle invocation, logged at start and completion.
#[must_use = "complete the action log so its duration is recorded"]
pub struct ActionLog {
    log_id: Uuid,
    action_type: &'static str,
    instance_id: String,
    started: Instant,
}

/// Log the start of an action with metadata (context info).
pub fn log_event(
    action_type: &'static str,
    instance_id: &str,
    metadata: Option<serde_json::Value>,
) -> ActionLog {
    let log_id = Uuid::new_v4();
    tracing::debug!(
        %log_id,
        action_type,
        instance_id,
        metadata = %metadata.unwrap_or(serde_json::Value::Null),
        status = "in_progress",
        "action started"
    );
    ActionLog {
        log_id,
        action_type,
        instance_id: instance_id.to_string(),
        started: Instant::now(),
    }
}

impl ActionLog {
    pub fn log_id(&self) -> Uuid {
        self.log_id
    }

    fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn success(self) {
        tracing::info!(
            log_id = %self.log_id,
            action_type = self.action_type,
            instance_id = %self.instance_id,
            status = "success",
            duration_ms = self.duration_ms(),
            "action completed"
        );
    }

    pub fn failed(self, error_message: &str) {
        tracing::error!(
            log_id = %self.log_id,
            action_type = self.action_type,
            instance_id = %self.instance_id,
            status = "failed",
            duration_ms = self.duration_ms(),
            error_message,
            "action failed"
        );
    }
}

/// Single-line INFO record for a step with no duration, e.g. a stage change.
pub fn log_quick(action_type: &str, instance_id: &str, details: Option<&str>) {
    tracing::info!(action_type, instance_id, details = details.unwrap_or(""), "event");
}
