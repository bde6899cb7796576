use crate::config::SamplerKind;
use crate::error::{MemmonError, Result};
use crate::process::{ProcessForest, ProcessSample};
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::debug;

/// Source of process memory measurements
#[allow(async_fn_in_trait)]
pub trait MetricsProvider {
    /// RSS in bytes of a single process, `None` if it cannot be measured
    async fn rss_of(&mut self, pid: u32) -> Result<Option<u64>>;

    /// Every living process with its parent pid and RSS in bytes
    async fn snapshot(&mut self) -> Result<Vec<ProcessSample>>;
}

/// Measures processes by running `ps`, which reports RSS in kilobytes
#[derive(Debug, Default)]
pub struct PsProvider;

impl PsProvider {
    pub fn new() -> Self {
        Self
    }

    async fn run(args: &[&str]) -> Result<String> {
        let output = Command::new("ps")
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| MemmonError::MeasurementError(format!("Failed to run ps: {}", e)))?;

        // ps exits non-zero with empty output for an unknown pid
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MetricsProvider for PsProvider {
    async fn rss_of(&mut self, pid: u32) -> Result<Option<u64>> {
        let output = Self::run(&["-o", "rss=", "-p", &pid.to_string()]).await?;
        Ok(parse_rss_kb(&output))
    }

    async fn snapshot(&mut self) -> Result<Vec<ProcessSample>> {
        let output = Self::run(&["ax", "-o", "pid=", "-o", "ppid=", "-o", "rss="]).await?;
        Ok(parse_process_table(&output))
    }
}

/// Parse the single-pid `ps` output: one RSS value in kilobytes
fn parse_rss_kb(output: &str) -> Option<u64> {
    output.trim().parse::<u64>().ok()?.checked_mul(1024)
}

/// Parse `pid ppid rss` lines, converting kilobytes to bytes
fn parse_process_table(output: &str) -> Vec<ProcessSample> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let sample = parse_table_line(line);
            if sample.is_none() {
                debug!("Ignoring unparseable ps line: {:?}", line);
            }
            sample
        })
        .collect()
}

fn parse_table_line(line: &str) -> Option<ProcessSample> {
    let mut fields = line.split_whitespace();
    let pid = fields.next()?.parse().ok()?;
    let ppid = fields.next()?.parse().ok()?;
    let rss = fields.next()?.parse::<u64>().ok()?.checked_mul(1024)?;
    if fields.next().is_some() {
        return None;
    }
    Some(ProcessSample::new(pid, ppid, rss))
}

/// Measures processes through sysinfo, which reports RSS in bytes
pub struct SysinfoProvider {
    system: System,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SysinfoProvider {
    async fn rss_of(&mut self, pid: u32) -> Result<Option<u64>> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        Ok(self.system.process(sys_pid).map(|process| process.memory()))
    }

    async fn snapshot(&mut self) -> Result<Vec<ProcessSample>> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let samples = self
            .system
            .processes()
            .iter()
            // Threads share their process's memory and would be counted twice
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let ppid = process.parent().map(|parent| parent.as_u32()).unwrap_or(0);
                ProcessSample::new(pid.as_u32(), ppid, process.memory())
            })
            .collect();

        Ok(samples)
    }
}

/// Provider selected at startup
pub enum SystemProvider {
    Ps(PsProvider),
    Sysinfo(SysinfoProvider),
}

impl SystemProvider {
    pub fn new(kind: SamplerKind) -> Self {
        match kind {
            SamplerKind::Ps => SystemProvider::Ps(PsProvider::new()),
            SamplerKind::Sysinfo => SystemProvider::Sysinfo(SysinfoProvider::new()),
        }
    }
}

impl MetricsProvider for SystemProvider {
    async fn rss_of(&mut self, pid: u32) -> Result<Option<u64>> {
        match self {
            SystemProvider::Ps(provider) => provider.rss_of(pid).await,
            SystemProvider::Sysinfo(provider) => provider.rss_of(pid).await,
        }
    }

    async fn snapshot(&mut self) -> Result<Vec<ProcessSample>> {
        match self {
            SystemProvider::Ps(provider) => provider.snapshot().await,
            SystemProvider::Sysinfo(provider) => provider.snapshot().await,
        }
    }
}

enum Snapshot {
    Pending,
    Ready(ProcessForest),
    Failed,
}

/// Per-tick measurement front end
///
/// In cumulative mode the process table is read at most once per tick, on
/// first use, so every process measured in the tick sees the same tree.
pub struct Sampler<'a, M> {
    provider: &'a mut M,
    cumulative: bool,
    snapshot: Snapshot,
}

impl<'a, M: MetricsProvider> Sampler<'a, M> {
    pub fn new(provider: &'a mut M, cumulative: bool) -> Self {
        Self {
            provider,
            cumulative,
            snapshot: Snapshot::Pending,
        }
    }

    /// RSS in bytes for `pid` (with descendants in cumulative mode)
    ///
    /// `Ok(None)` means the process vanished or could not be measured.
    pub async fn measure(&mut self, pid: u32) -> Result<Option<u64>> {
        if !self.cumulative {
            return self.provider.rss_of(pid).await;
        }

        if let Snapshot::Pending = self.snapshot {
            match self.provider.snapshot().await {
                Ok(samples) => {
                    let forest = ProcessForest::build(&samples);
                    debug!("Process table snapshot holds {} processes", forest.len());
                    self.snapshot = Snapshot::Ready(forest);
                }
                Err(e) => {
                    self.snapshot = Snapshot::Failed;
                    return Err(e);
                }
            }
        }

        match &self.snapshot {
            Snapshot::Ready(forest) => Ok(forest.cumulative_rss(pid)),
            _ => Err(MemmonError::MeasurementError(
                "process table unavailable for this tick".to_string(),
            )),
        }
    }
}
