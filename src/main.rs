use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use train_gateway::bootstrap::build_state;
use train_gateway::config::{Config, DEFAULT_CONFIG_PATH};
use train_gateway::observability::{self, metrics};
use train_gateway::server;

#[derive(Parser)]
#[command(name = "train_gateway")]
#[command(about = "Collects uploaded training images and queues them for the training worker")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then print the non-secret settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command {
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK: {}", cli.config);
            println!("{}", toml::to_string_pretty(&config)?);
            println!("{:#?}", config.env);
        }
        Commands::Serve { port } => {
            let _guard = observability::init_logging(&config.server.log_dir);
            config.validate()?;

            let handle = if config.server.metrics_enabled {
                match metrics::init() {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!(error = %e, "Metrics disabled");
                        None
                    }
                }
            } else {
                None
            };

            let state = build_state(&config, handle)?;
            let port = port.unwrap_or(config.server.port);
            info!(port, policy = ?config.pipeline.failure_policy, "Starting train_gateway");
            server::start_server(state, &config.server.host, port).await?;
        }
    }

    Ok(())
}
