mod application;
mod domain;
mod infrastructure;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use application::relay::RelayHandler;
use domain::models::StreamEvent;
use domain::settings::{Settings, SettingsService};
use infrastructure::aws::runtime_api::{ErrorDocument, RuntimeApiClient};

#[derive(Debug, Parser)]
#[command(name = "hr-telemetry", version, about = "Heart rate telemetry from BLE to Kinesis and OpenSearch")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true, env = "HR_TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream heart rate from the BLE device into the stream
    Publish {
        /// Streaming duration in seconds (overrides publisher.duration_secs)
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Serve stream-trigger invocations through the Lambda Runtime API
    Relay,
    /// Run the relay once on a stream-trigger event stored in a file
    Replay {
        event: PathBuf,
    },
    /// Write the default settings file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

async fn publish(settings: Settings, duration: Option<u64>) -> Result<()> {
    let duration = Duration::from_secs(duration.unwrap_or(settings.publisher.duration_secs));
    application::publisher::run(&settings, settings.aws.credentials_provider(), duration).await?;
    Ok(())
}

async fn relay(settings: Settings) -> Result<()> {
    let runtime = RuntimeApiClient::from_env()?;

    let handler = match RelayHandler::from_settings(&settings, settings.aws.credentials_provider()) {
        Ok(handler) => handler,
        Err(e) => {
            let err = anyhow::Error::new(e);
            runtime
                .send_init_error(&ErrorDocument::from_error("Runtime.InitError", &err))
                .await?;
            return Err(err.context("Failed to initialize relay"));
        }
    };

    let handler = &handler;
    runtime
        .run(|event: StreamEvent| async move {
            handler.handle(event).await.map_err(anyhow::Error::from)
        })
        .await?;
    Ok(())
}

async fn replay(settings: Settings, path: PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read event file {}", path.display()))?;
    let event: StreamEvent = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid stream event in {}", path.display()))?;

    let handler = RelayHandler::from_settings(&settings, settings.aws.credentials_provider())?;
    let response = handler.handle(event).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn init_config(mut service: SettingsService, force: bool) -> Result<()> {
    if service.path().exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            service.path().display()
        );
    }
    *service.get_mut() = Settings::default();
    service.save()?;
    println!("Wrote {}", service.path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let service = SettingsService::new(cli.config).context("Failed to load settings")?;
    let _logging = infrastructure::logging::init_logger(&service.get().log_settings)?;
    info!("Settings loaded from {}", service.path().display());

    match cli.command {
        Command::Publish { duration } => publish(service.into_settings(), duration).await,
        Command::Relay => relay(service.into_settings()).await,
        Command::Replay { event } => replay(service.into_settings(), event).await,
        Command::InitConfig { force } => init_config(service, force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_publish_duration_flag() {
        let cli = Cli::try_parse_from(["hr-telemetry", "publish", "--duration", "30"]).unwrap();
        assert!(matches!(cli.command, Command::Publish { duration: Some(30) }));
    }
}
