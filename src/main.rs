use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use topng::{setup_logging, Cli, CliRunner, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Usage errors exit with 1 like every other failure; help/version exit 0.
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config = load_config(&args).await?;
    let cli_runner = CliRunner::new(config)?;

    let _shutdown_handler = setup_shutdown_handler(cli_runner.cancellation_token());

    cli_runner.run(args).await
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading config {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("parsing config {}", config_path.display()))?
    } else {
        Config::default()
    };

    if let Some(timeout) = args.timeout {
        config.http_timeout = Some(Duration::from_secs(timeout));
    }

    config.validate()?;

    info!(
        "Configuration loaded: workers={}, http_timeout={:?}",
        config.workers, config.http_timeout
    );

    Ok(config)
}

/// Cancels conversions that have not started yet on Ctrl-C. Work already in
/// flight finishes normally.
fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling pending conversions");
            cancel.cancel();
        }
    })
}
