use anyhow::Result;
use authkeeper::config::{Config, SigningKeySource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Registration, login and bearer-token service.
#[derive(Parser, Debug)]
#[command(name = "authkeeper", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Address to bind (overrides [gateway] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides [gateway] port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, then print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }

            tracing::info!(environment = %config.environment, "Starting authkeeper");
            let auth = Arc::new(authkeeper::build_auth_service(&config)?);
            authkeeper::gateway::run_gateway(&config, auth).await
        }
        Commands::CheckConfig => {
            config.validate()?;
            let (_, source) = config.signing_key()?;
            println!("{}", toml::to_string_pretty(&config)?);
            match source {
                SigningKeySource::Configured => println!("# signing key: configured"),
                SigningKeySource::DevelopmentDefault => {
                    println!("# signing key: INSECURE development default");
                }
            }
            Ok(())
        }
    }
}
