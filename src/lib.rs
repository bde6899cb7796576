// Library exports for the memmon memory watchdog

pub mod cli;
pub mod config;
pub mod error;
pub mod listener;
pub mod process;
pub mod rpc;
