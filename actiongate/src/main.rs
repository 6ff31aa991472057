use actiongate::{run, Settings};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Capability-token action dispatcher console", long_about = None)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Flowchart document loaded by the `flow` command"
    )]
    flowchart: Option<PathBuf>,

    #[arg(
        long,
        help = "OTLP endpoint for dispatch metrics (e.g., http://localhost:4318)"
    )]
    otlp_endpoint: Option<String>,

    #[arg(long, help = "Prefix for minted action ids")]
    action_prefix: Option<String>,

    #[arg(long, help = "Prefix for minted session ids")]
    session_prefix: Option<String>,
}

impl Cli {
    /// Settings file first, then flags on top.
    fn into_settings(self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => Settings::default(),
        };
        if let Some(path) = self.flowchart {
            settings.flowchart.path = Some(path);
        }
        if let Some(endpoint) = self.otlp_endpoint {
            settings.telemetry.otlp_endpoint = Some(endpoint);
        }
        if let Some(prefix) = self.action_prefix {
            settings.dispatcher.action_prefix = prefix;
        }
        if let Some(prefix) = self.session_prefix {
            settings.dispatcher.session_prefix = prefix;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    run(cli.into_settings()?).await
}
