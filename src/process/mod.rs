// Process module - Measurement, process trees and the restart policy

pub mod monitor;
pub mod policy;
pub mod restart;
mod tree;
mod types;

pub use monitor::{MetricsProvider, PsProvider, Sampler, SysinfoProvider, SystemProvider};
pub use policy::{evaluate, PolicyEngine, ProcessOutcome, TickReport};
pub use restart::{restart_process, RestartTracker};
pub use tree::ProcessForest;
pub use types::{ManagedProcess, ProcessSample, RestartDecision, ThresholdScope};
