use std::fmt;

/// One row of the operating system's process table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSample {
    pub pid: u32,
    pub ppid: u32,
    /// Resident set size in bytes
    pub rss: u64,
}

impl ProcessSample {
    pub fn new(pid: u32, ppid: u32, rss: u64) -> Self {
        Self { pid, ppid, rss }
    }
}

/// A process as reported by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: String,
    pub group: String,
    /// `None` when the process is not currently running
    pub pid: Option<u32>,
}

impl ManagedProcess {
    /// Build a managed process; a pid of zero means the process is not running
    pub fn new(name: impl Into<String>, group: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            pid: (pid != 0).then_some(pid),
        }
    }

    /// The `group:name` key the supervisor uses to address this process
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }
}

impl fmt::Display for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// Scope of the threshold that triggered a restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdScope {
    /// Matched a program threshold under this key (bare name or `group:name`)
    Process(String),
    /// Matched the threshold of this group
    Group(String),
    /// Matched the global threshold
    Global,
}

impl fmt::Display for ThresholdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdScope::Process(key) => write!(f, "program {}", key),
            ThresholdScope::Group(group) => write!(f, "group {}", group),
            ThresholdScope::Global => write!(f, "any"),
        }
    }
}

/// Outcome of a threshold breach for one process in one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartDecision {
    /// `group:name` of the process to restart
    pub key: String,
    /// Observed RSS in bytes
    pub rss: u64,
    /// Limit that was exceeded
    pub limit: u64,
    pub scope: ThresholdScope,
}

impl fmt::Display for RestartDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uses {} bytes, over the {} limit of {} bytes",
            self.key, self.rss, self.scope, self.limit
        )
    }
}
