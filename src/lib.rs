//! Portcullis: federated game sign-in
//!
//! Turns a delegated consumer-identity sign-in into a time-limited game
//! session token through a fixed three-hop exchange, and connects a separate
//! developer identity through the OAuth2 Device Authorization Grant.
//!
//! # Quick Start
//!
//! ```no_run
//! use portcullis::prelude::*;
//!
//! # async fn example() -> portcullis::error::Result<()> {
//! let config = PortcullisConfig::load()?;
//! let auth = AuthOrchestrator::from_config(&config);
//! let _background = auth.spawn_background_refresh(tokio_util::sync::CancellationToken::new());
//!
//! let profile = auth.sign_in().await?;
//! println!("Signed in as {}", profile.display_name);
//! let token = auth.ensure_valid_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod exchange;
pub mod orchestrator;
pub mod prelude;
pub mod profile;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
