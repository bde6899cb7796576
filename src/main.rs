use memmon::cli::Cli;
use memmon::error::MemmonError;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_args();

    // stdout is the listener protocol channel, so all logging goes to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .init();

    let config = cli.watchdog_config().unwrap_or_else(|e| fail(e));
    let client = cli.rpc_client().unwrap_or_else(|e| fail(e));

    if let Err(e) = Cli::run(config, client).await {
        fail(e);
    }
}

/// Configuration errors print usage and exit with 255, anything else with 1
fn fail(error: MemmonError) -> ! {
    if error.is_config_error() {
        Cli::usage_error(&error.to_string());
    }
    eprintln!("✗ Error: {}", error);
    std::process::exit(1);
}
