use crate::logger;

/// Stages of one delicense attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelicenseStage {
    ResolveIp,
    ResolveCredentials,
    SelectEndpoint,
    QueryInventory,
    MatchAndDeactivate,
    Commit,
    Done,
}

impl DelicenseStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelicenseStage::ResolveIp => "resolve_ip",
            DelicenseStage::ResolveCredentials => "resolve_credentials",
            DelicenseStage::SelectEndpoint => "select_endpoint",
            DelicenseStage::QueryInventory => "query_inventory",
            DelicenseStage::MatchAndDeactivate => "match_and_deactivate",
            DelicenseStage::Commit => "commit",
            DelicenseStage::Done => "done",
        }
    }

    /// Forward edges only; every non-terminal stage may also finish early.
    pub fn can_transition_to(&self, next: DelicenseStage) -> bool {
        use DelicenseStage::*;
        matches!(
            (self, next),
            (ResolveIp, ResolveCredentials)
                | (ResolveCredentials, SelectEndpoint)
                | (SelectEndpoint, QueryInventory)
                | (QueryInventory, MatchAndDeactivate)
                | (MatchAndDeactivate, Commit)
                | (ResolveIp, Done)
                | (ResolveCredentials, Done)
                | (SelectEndpoint, Done)
                | (QueryInventory, Done)
                | (MatchAndDeactivate, Done)
                | (Commit, Done)
        )
    }
}

/// Tracks and logs stage transitions for one instance.
pub struct StageTracker {
    instance_id: String,
    current: DelicenseStage,
}

impl StageTracker {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            current: DelicenseStage::ResolveIp,
        }
    }

    pub fn current(&self) -> DelicenseStage {
        self.current
    }

    /// Moves to `next`. Illegal or repeated transitions are logged and ignored.
    pub fn advance(&mut self, next: DelicenseStage, reason: &str) {
        if !self.current.can_transition_to(next) {
            tracing::warn!(
                instance_id = %self.instance_id,
                from = self.current.as_str(),
                to = next.as_str(),
                "[delicense] ignoring illegal stage transition"
            );
            return;
        }
        let details = format!("{} -> {} ({})", self.current.as_str(), next.as_str(), reason);
        logger::log_quick("DELICENSE_STAGE", &self.instance_id, Some(&details));
        self.current = next;
    }

    pub fn finish(&mut self, reason: &str) {
        if self.current != DelicenseStage::Done {
            self.advance(DelicenseStage::Done, reason);
        }
    }
}
