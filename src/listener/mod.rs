// Listener module - Event loop driven by supervisor tick notifications

pub mod protocol;

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::process::{MetricsProvider, PolicyEngine, TickReport};
use crate::rpc::SupervisorControl;
use protocol::{read_event, send_ready, send_result, Ack};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, error, info, Instrument};

pub use protocol::{Event, TICK_PREFIX};

/// Memory watchdog running as a supervisor event listener
pub struct Memmon<S, M> {
    engine: PolicyEngine,
    supervisor: S,
    provider: M,
    name: String,
}

impl<S, M> Memmon<S, M>
where
    S: SupervisorControl,
    M: MetricsProvider,
{
    pub fn new(config: &WatchdogConfig, supervisor: S, provider: M) -> Self {
        Self {
            engine: PolicyEngine::new(config),
            supervisor,
            provider,
            name: config.name.clone().unwrap_or_else(|| "memmon".to_string()),
        }
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn provider(&self) -> &M {
        &self.provider
    }

    /// Handle events until the supervisor closes our input
    ///
    /// # Returns
    /// * `Ok(())` - Input reached end of file
    /// * `Err(MemmonError)` - The protocol stream is broken
    pub async fn run_forever<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("listener", name = %self.name);
        self.event_loop(&mut reader, &mut writer)
            .instrument(span)
            .await
    }

    async fn event_loop<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Waiting for events");
        while self.run_once(reader, writer).await? {}
        info!("Event stream closed, exiting");
        Ok(())
    }

    /// Wait for one event, handle it and acknowledge it
    ///
    /// Returns `false` if the input ended before an event arrived.
    pub async fn run_once<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<bool>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        send_ready(writer).await?;

        let Some(event) = read_event(reader).await? else {
            return Ok(false);
        };

        let ack = if event.is_tick() {
            debug!(
                "Handling {} (serial {})",
                event.name(),
                event.header("serial").unwrap_or("-")
            );
            self.handle_tick().await
        } else {
            debug!(
                "Ignoring {} event ({} payload bytes)",
                event.name(),
                event.payload().len()
            );
            Ack::Ok
        };

        send_result(writer, ack).await?;
        Ok(true)
    }

    /// Scan every supervised process once
    ///
    /// Fails only if the supervisor cannot list its processes.
    pub async fn check(&mut self) -> Result<TickReport> {
        for line in self.engine.thresholds().describe() {
            info!("{}", line);
        }

        self.engine
            .check(&mut self.supervisor, &mut self.provider)
            .await
    }

    async fn handle_tick(&mut self) -> Ack {
        match self.check().await {
            Ok(report) => {
                log_report(&report);
                Ack::Ok
            }
            Err(e) => {
                // FAIL makes the supervisor resend the tick
                error!("Could not list supervised processes: {}", e);
                Ack::Fail
            }
        }
    }
}

fn log_report(report: &TickReport) {
    debug!(
        checked = report.checked,
        restarted = report.restarted.len(),
        suppressed = report.suppressed.len(),
        skipped = report.skipped,
        failed = report.failed,
        "Tick complete"
    );
}
