//! Autoscaling lifecycle hook for VM-Series firewalls.
//!
//! Launch: disable source/destination check on the primary interface and
//! attach one additional interface. Terminate: optionally release the
//! firewall's license on the management controller. Both paths end with a
//! single CONTINUE completion.

pub mod delicense;
pub mod hardener;
pub mod logger;
pub mod orchestrator;
pub mod provider_manager;
pub mod provisioner;
pub mod settings;
pub mod state_machine;

pub use orchestrator::{Backends, CompletionOutcome, LifecycleOrchestrator, RunReport};
pub use settings::Settings;
