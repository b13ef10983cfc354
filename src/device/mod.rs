//! OAuth2 Device Authorization Grant for the developer identity.

pub mod client;
pub mod endpoint;
pub mod flow;
pub mod prefs;
pub mod session;

pub use client::DeviceCodeIdentityClient;
pub use endpoint::{DeviceAuthorizationEndpoint, HttpDeviceEndpoint};
pub use flow::{DeviceFlow, ShowUserCode};
pub use prefs::{FilePreferenceStore, PreferenceStore};
pub use session::{
    DeveloperAccount, DeveloperProfile, DeviceAuthSession, DeviceFlowState, DeviceToken,
    PollResponse,
};
