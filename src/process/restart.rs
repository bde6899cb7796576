use crate::error::{Result, FAULT_ALREADY_STARTED, FAULT_NOT_RUNNING};
use crate::rpc::SupervisorControl;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Ask the supervisor to stop and then start a process
///
/// Does not wait for the new process to reach the running state. A process
/// that was already stopped, or that came back on its own before the start
/// request, is not an error.
pub async fn restart_process<S: SupervisorControl>(supervisor: &mut S, key: &str) -> Result<()> {
    match supervisor.stop_process(key).await {
        Ok(()) => {}
        Err(e) if e.is_fault(FAULT_NOT_RUNNING) => {
            debug!("{} was not running when asked to stop", key);
        }
        Err(e) => return Err(e),
    }

    match supervisor.start_process(key).await {
        Ok(()) => {}
        Err(e) if e.is_fault(FAULT_ALREADY_STARTED) => {
            debug!("{} was already started", key);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

/// Remembers when each process was last restarted to enforce a cooldown
#[derive(Debug, Clone)]
pub struct RestartTracker {
    /// Minimum time between two restarts of the same process
    cooldown: Duration,
    /// Last restart per `group:name`
    last_restart: HashMap<String, Instant>,
}

impl RestartTracker {
    /// Create a tracker; a zero cooldown disables it
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_restart: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether `key` was restarted less than the cooldown ago
    pub fn in_cooldown(&self, key: &str, now: Instant) -> bool {
        if self.cooldown.is_zero() {
            return false;
        }

        self.last_restart
            .get(key)
            .map(|&at| now.saturating_duration_since(at) < self.cooldown)
            .unwrap_or(false)
    }

    /// Record a restart of `key`
    pub fn record_restart(&mut self, key: &str, now: Instant) {
        if !self.cooldown.is_zero() {
            self.last_restart.insert(key.to_string(), now);
        }
    }

    /// Forget restarts whose cooldown has elapsed
    pub fn prune(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.last_restart
            .retain(|_, &mut at| now.saturating_duration_since(at) < cooldown);
    }

    /// Number of processes currently cooling down
    pub fn tracked(&self) -> usize {
        self.last_restart.len()
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemmonError;
    use crate::process::ManagedProcess;

    #[derive(Default)]
    struct ScriptedSupervisor {
        stop_fault: Option<i64>,
        start_fault: Option<i64>,
        calls: Vec<String>,
    }

    fn fault(code: Option<i64>) -> Result<()> {
        match code {
            Some(code) => Err(MemmonError::RpcFault {
                code,
                message: "scripted".to_string(),
            }),
            None => Ok(()),
        }
    }

    impl SupervisorControl for ScriptedSupervisor {
        async fn list_processes(&mut self) -> Result<Vec<ManagedProcess>> {
            Ok(Vec::new())
        }

        async fn stop_process(&mut self, key: &str) -> Result<()> {
            self.calls.push(format!("stop {}", key));
            fault(self.stop_fault)
        }

        async fn start_process(&mut self, key: &str) -> Result<()> {
            self.calls.push(format!("start {}", key));
            fault(self.start_fault)
        }
    }

    #[tokio::test]
    async fn test_restart_stops_then_starts() {
        let mut supervisor = ScriptedSupervisor::default();
        restart_process(&mut supervisor, "g:foo").await.unwrap();
        assert_eq!(supervisor.calls, vec!["stop g:foo", "start g:foo"]);
    }

    #[tokio::test]
    async fn test_restart_tolerates_not_running() {
        let mut supervisor = ScriptedSupervisor {
            stop_fault: Some(FAULT_NOT_RUNNING),
            start_fault: Some(FAULT_ALREADY_STARTED),
            ..Default::default()
        };
        assert!(restart_process(&mut supervisor, "g:foo").await.is_ok());
        assert_eq!(supervisor.calls.len(), 2);
    }

    #[tokio::test]
    async fn test_restart_stop_failure_skips_start() {
        let mut supervisor = ScriptedSupervisor {
            stop_fault: Some(10),
            ..Default::default()
        };
        let result = restart_process(&mut supervisor, "g:foo").await;
        assert!(matches!(result, Err(MemmonError::RpcFault { code: 10, .. })));
        assert_eq!(supervisor.calls, vec!["stop g:foo"]);
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let mut tracker = RestartTracker::default();
        let now = Instant::now();
        tracker.record_restart("g:foo", now);
        assert!(!tracker.in_cooldown("g:foo", now));
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_cooldown_window() {
        let mut tracker = RestartTracker::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(!tracker.in_cooldown("g:foo", start));
        tracker.record_restart("g:foo", start);

        assert!(tracker.in_cooldown("g:foo", start + Duration::from_secs(59)));
        assert!(!tracker.in_cooldown("g:foo", start + Duration::from_secs(60)));
        assert!(!tracker.in_cooldown("g:bar", start));
    }

    #[test]
    fn test_prune() {
        let mut tracker = RestartTracker::new(Duration::from_secs(10));
        let start = Instant::now();
        tracker.record_restart("g:old", start);
        tracker.record_restart("g:new", start + Duration::from_secs(5));

        tracker.prune(start + Duration::from_secs(12));
        assert_eq!(tracker.tracked(), 1);
        assert!(tracker.in_cooldown("g:new", start + Duration::from_secs(12)));
    }
}
