use crate::config::{Thresholds, WatchdogConfig};
use crate::error::Result;
use crate::process::restart::{restart_process, RestartTracker};
use crate::process::{ManagedProcess, MetricsProvider, RestartDecision, Sampler, ThresholdScope};
use crate::rpc::SupervisorControl;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Compare a measured RSS against the thresholds that apply to a process
///
/// Scopes are tried in order: program (bare name, then `group:name`), group,
/// any. The first limit that is strictly exceeded wins; a limit that is not
/// exceeded falls through to the next one.
pub fn evaluate(
    thresholds: &Thresholds,
    process: &ManagedProcess,
    rss: u64,
) -> Option<RestartDecision> {
    let key = process.key();

    let decide = |limit: u64, scope: ThresholdScope| {
        debug!("RSS of {} is {}", key, rss);
        (rss > limit).then(|| RestartDecision {
            key: key.clone(),
            rss,
            limit,
            scope,
        })
    };

    for program_key in [process.name.as_str(), key.as_str()] {
        if let Some(limit) = thresholds.program_limit(program_key) {
            let scope = ThresholdScope::Process(program_key.to_string());
            if let Some(decision) = decide(limit, scope) {
                return Some(decision);
            }
        }
    }

    if let Some(limit) = thresholds.group_limit(&process.group) {
        if let Some(decision) = decide(limit, ThresholdScope::Group(process.group.clone())) {
            return Some(decision);
        }
    }

    thresholds
        .any_limit()
        .and_then(|limit| decide(limit, ThresholdScope::Global))
}

/// What happened to one process during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not running, or vanished before it could be measured
    Skipped,
    /// Measured and under every applicable limit
    WithinLimits,
    /// Over a limit but restarted too recently
    Suppressed(RestartDecision),
    /// Over a limit and a restart was requested
    Restarted(RestartDecision),
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Restart requests issued, in enumeration order
    pub restarted: Vec<RestartDecision>,
    /// Breaches left alone because of the cooldown
    pub suppressed: Vec<RestartDecision>,
    /// Processes without a pid or without a measurement
    pub skipped: usize,
    /// Processes whose measurement or restart failed
    pub failed: usize,
    /// Processes enumerated by the supervisor
    pub checked: usize,
}

/// Applies the thresholds to every supervised process once per tick
pub struct PolicyEngine {
    thresholds: Thresholds,
    cumulative: bool,
    tracker: RestartTracker,
}

impl PolicyEngine {
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            cumulative: config.cumulative,
            tracker: RestartTracker::new(config.cooldown),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run one scan over the supervisor's processes
    ///
    /// Fails only if the process list cannot be fetched; per-process
    /// failures are logged and counted in the report.
    pub async fn check<S, M>(&mut self, supervisor: &mut S, provider: &mut M) -> Result<TickReport>
    where
        S: SupervisorControl,
        M: MetricsProvider,
    {
        let processes = supervisor.list_processes().await?;
        let now = Instant::now();
        self.tracker.prune(now);
        if self.tracker.tracked() > 0 {
            debug!("{} processes in restart cooldown", self.tracker.tracked());
        }

        let mut sampler = Sampler::new(provider, self.cumulative);
        let mut report = TickReport {
            checked: processes.len(),
            ..Default::default()
        };

        for process in &processes {
            match self.check_process(supervisor, &mut sampler, process, now).await {
                Ok(ProcessOutcome::Skipped) => report.skipped += 1,
                Ok(ProcessOutcome::WithinLimits) => {}
                Ok(ProcessOutcome::Suppressed(decision)) => report.suppressed.push(decision),
                Ok(ProcessOutcome::Restarted(decision)) => report.restarted.push(decision),
                Err(e) => {
                    error!("Failed to check {}: {}", process, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn check_process<S, M>(
        &mut self,
        supervisor: &mut S,
        sampler: &mut Sampler<'_, M>,
        process: &ManagedProcess,
        now: Instant,
    ) -> Result<ProcessOutcome>
    where
        S: SupervisorControl,
        M: MetricsProvider,
    {
        let Some(pid) = process.pid else {
            return Ok(ProcessOutcome::Skipped);
        };

        let Some(rss) = sampler.measure(pid).await? else {
            debug!("Could not measure {} (pid {})", process, pid);
            return Ok(ProcessOutcome::Skipped);
        };

        let Some(decision) = evaluate(&self.thresholds, process, rss) else {
            return Ok(ProcessOutcome::WithinLimits);
        };

        if self.tracker.in_cooldown(&decision.key, now) {
            info!(
                "Not restarting {}: restarted less than {:?} ago",
                decision, self.tracker.cooldown()
            );
            return Ok(ProcessOutcome::Suppressed(decision));
        }

        warn!("Restarting {}", decision);
        restart_process(supervisor, &decision.key).await?;
        self.tracker.record_restart(&decision.key, now);

        Ok(ProcessOutcome::Restarted(decision))
    }
}
