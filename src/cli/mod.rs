// CLI module - Command line surface of the listener

use crate::config::{
    parse_byte_size, parse_name_size, parse_seconds, ConfigFile, SamplerKind, WatchdogConfig,
};
use crate::error::Result;
use crate::listener::Memmon;
use crate::process::SystemProvider;
use crate::rpc::{RpcClient, DEFAULT_SERVER_URL};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::info;

const AFTER_HELP: &str = "\
Subscribe the listener to TICK_60 (or TICK_5) events:

  [eventlistener:memmon]
  command=memmon -p program1=200MB -p thegroup:theprog=100MB -g thegroup=100MB -a 1GB
  events=TICK_60

Sizes are plain integers or carry a KB, MB or GB suffix (1024-based).
Durations are plain seconds or carry an s, m, h or d suffix.";

/// memmon - restart supervised processes that use too much memory
#[derive(Parser, Debug)]
#[command(name = "memmon")]
#[command(version, about, long_about = None, after_help = AFTER_HELP)]
pub struct Cli {
    /// Sum the RSS of each process with that of all its descendants
    #[arg(short, long)]
    cumulative: bool,

    /// Restart the process NAME (or GROUP:NAME) when its RSS exceeds SIZE
    #[arg(short = 'p', long = "program", value_name = "NAME=SIZE", value_parser = name_size)]
    programs: Vec<(String, u64)>,

    /// Restart any process in GROUP when its RSS exceeds SIZE
    #[arg(short = 'g', long = "group", value_name = "GROUP=SIZE", value_parser = name_size)]
    groups: Vec<(String, u64)>,

    /// Restart any supervised process when its RSS exceeds SIZE
    #[arg(short, long, value_name = "SIZE", value_parser = byte_size)]
    any: Option<u64>,

    /// Name of this listener, shown in log output
    #[arg(short, long)]
    name: Option<String>,

    /// Do not restart the same process again within DURATION
    #[arg(long, value_name = "DURATION", value_parser = seconds)]
    cooldown: Option<Duration>,

    /// How RSS is measured
    #[arg(long, value_enum)]
    sampler: Option<SamplerKind>,

    /// Read thresholds from a TOML or JSON file before applying the flags
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Supervisor control endpoint (unix:///path or http://host:port)
    #[arg(long, env = "SUPERVISOR_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Username for the supervisor control endpoint
    #[arg(long, env = "SUPERVISOR_USERNAME")]
    username: Option<String>,

    /// Password for the supervisor control endpoint
    #[arg(long, env = "SUPERVISOR_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

fn name_size(value: &str) -> std::result::Result<(String, u64), String> {
    parse_name_size(value).map_err(|e| e.to_string())
}

fn byte_size(value: &str) -> std::result::Result<u64, String> {
    parse_byte_size(value).map_err(|e| e.to_string())
}

fn seconds(value: &str) -> std::result::Result<Duration, String> {
    parse_seconds(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Parse the process arguments, exiting with status 255 on bad input
    pub fn parse_args() -> Self {
        match Self::try_parse() {
            Ok(cli) => cli,
            Err(e) if e.use_stderr() => {
                eprintln!("{}", e);
                std::process::exit(255);
            }
            Err(e) => e.exit(),
        }
    }

    /// Print a configuration error with the usage text and exit with status 255
    pub fn usage_error(message: &str) -> ! {
        eprintln!("✗ Error: {}\n", message);
        eprintln!("{}", Self::command().render_help());
        std::process::exit(255);
    }

    /// Build the watchdog configuration: file first, then flags
    pub fn watchdog_config(&self) -> Result<WatchdogConfig> {
        let mut config = WatchdogConfig::default();

        if let Some(ref path) = self.config {
            config.apply_file(ConfigFile::from_file(path)?)?;
        }

        if self.cumulative {
            config.cumulative = true;
        }
        for (key, limit) in &self.programs {
            config.thresholds.set_program(key.clone(), *limit);
        }
        for (group, limit) in &self.groups {
            config.thresholds.set_group(group.clone(), *limit);
        }
        if let Some(any) = self.any {
            config.thresholds.set_any(any);
        }
        if let Some(cooldown) = self.cooldown {
            config.cooldown = cooldown;
        }
        if self.name.is_some() {
            config.name = self.name.clone();
        }
        if let Some(sampler) = self.sampler {
            config.sampler = sampler;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the client for the supervisor's control interface
    pub fn rpc_client(&self) -> Result<RpcClient> {
        let client = RpcClient::from_url(&self.server_url)?;
        Ok(match self.username {
            Some(ref username) => {
                client.with_credentials(username, self.password.as_deref().unwrap_or_default())
            }
            None => client,
        })
    }

    /// Run the listener on stdin/stdout until the supervisor closes stdin
    pub async fn run(config: WatchdogConfig, client: RpcClient) -> Result<()> {
        info!(
            "Starting memmon (cumulative: {}, sampler: {:?}, endpoint: {:?})",
            config.cumulative,
            config.sampler,
            client.endpoint()
        );

        let provider = SystemProvider::new(config.sampler);
        let mut memmon = Memmon::new(&config, client, provider);
        memmon
            .run_forever(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}
