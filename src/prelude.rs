//! Convenience re-exports for common use.

pub use crate::auth::{ConsumerAccount, GameSessionToken};
pub use crate::config::PortcullisConfig;
pub use crate::device::{DeveloperAccount, DeviceCodeIdentityClient};
pub use crate::error::{AuthError, Result, UserNotice};
pub use crate::orchestrator::{AuthEvent, AuthOrchestrator, AuthState};
pub use crate::profile::Profile;
