//! CLI entry point for portcullis.

pub mod auth;

use clap::{Parser, Subcommand};

/// Portcullis sign-in CLI
#[derive(Parser, Debug)]
#[command(name = "portcullis", version, about = "Game sign-in and developer account CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in through the browser and mint a game session
    SignIn,
    /// Print a fresh game session token
    Token(TokenArgs),
    /// Show the signed-in profile
    Profile,
    /// Show cached account and developer connection status
    Status,
    /// Sign out and clear the cached account
    SignOut,
    /// Developer account (device flow)
    Developer(DeveloperArgs),
}

/// Arguments for `portcullis token`.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Print the bearer value instead of a masked summary
    #[arg(long)]
    pub reveal: bool,
}

/// Arguments for the `developer` subcommand group.
#[derive(Parser, Debug)]
pub struct DeveloperArgs {
    #[command(subcommand)]
    pub command: DeveloperCommands,
}

#[derive(Subcommand, Debug)]
pub enum DeveloperCommands {
    /// Connect a developer account with a device code
    Connect(ConnectArgs),
    /// Show the connected developer account
    Status,
    /// Forget the developer account
    Disconnect,
}

/// Arguments for `portcullis developer connect`.
#[derive(Parser, Debug)]
pub struct ConnectArgs {
    /// Give up after this many seconds (defaults to the configured value)
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
