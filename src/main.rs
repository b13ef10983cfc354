//! Portcullis CLI binary entry point.

use clap::Parser;
use portcullis::cli::{Cli, Commands, DeveloperCommands};
use portcullis::config::PortcullisConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portcullis=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match PortcullisConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::SignIn => portcullis::cli::auth::handle_sign_in(&config).await,
        Commands::Token(args) => portcullis::cli::auth::handle_token(&config, args.reveal).await,
        Commands::Profile => portcullis::cli::auth::handle_profile(&config).await,
        Commands::Status => portcullis::cli::auth::handle_status(&config).await,
        Commands::SignOut => portcullis::cli::auth::handle_sign_out(&config).await,
        Commands::Developer(dev) => match dev.command {
            DeveloperCommands::Connect(args) => {
                portcullis::cli::auth::handle_developer_connect(&config, args.timeout).await
            }
            DeveloperCommands::Status => portcullis::cli::auth::handle_developer_status(&config).await,
            DeveloperCommands::Disconnect => {
                portcullis::cli::auth::handle_developer_disconnect(&config).await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
