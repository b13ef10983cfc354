//! Consumer identity sign-in, token cache persistence, and token types.

pub mod browser;
pub mod cache;
pub mod consumer;
pub mod loopback;
pub mod msa;
pub mod provider;
pub mod token;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use cache::TokenCache;
pub use consumer::InteractiveConsumerIdentityClient;
pub use msa::MsaIdentityProvider;
pub use provider::ConsumerIdentityProvider;
pub use token::{ConsumerAccount, ConsumerSignIn, ConsumerToken, GameSessionToken};
