// RPC module - Control channel to the process supervisor

pub mod client;
pub mod xmlrpc;

use crate::error::Result;
use crate::process::ManagedProcess;

pub use client::{Endpoint, RpcClient, DEFAULT_SERVER_URL};
pub use xmlrpc::Value;

/// Operations the watchdog needs from the process supervisor
#[allow(async_fn_in_trait)]
pub trait SupervisorControl {
    /// Every process the supervisor manages, in its reporting order
    async fn list_processes(&mut self) -> Result<Vec<ManagedProcess>>;

    /// Stop a process addressed by `group:name`, waiting until it is down
    async fn stop_process(&mut self, key: &str) -> Result<()>;

    /// Start a process addressed by `group:name` without waiting for it
    async fn start_process(&mut self, key: &str) -> Result<()>;
}
