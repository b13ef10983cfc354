//! Configuration system (layered: defaults < TOML file < environment).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::util::timeout::clamp_timeout;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration for every portcullis component.
///
/// # Example
/// ```no_run
/// use portcullis::config::PortcullisConfig;
///
/// let config = PortcullisConfig::load()?;
/// println!("token cache at {}", config.token_cache_path().display());
/// # Ok::<(), portcullis::error::AuthError>(())
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortcullisConfig {
    /// Directory holding the token cache and preference files.
    pub home: Option<PathBuf>,
    pub consumer: ConsumerConfig,
    pub exchange: ExchangeConfig,
    pub profile: ProfileConfig,
    pub developer: DeveloperConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Consumer identity tenant (interactive sign-in + silent refresh).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Loopback port for the redirect listener; 0 picks a free port.
    pub redirect_port: u16,
    pub interactive_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authorize_url: "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize"
                .to_string(),
            token_url: "https://login.microsoftonline.com/consumers/oauth2/v2.0/token".to_string(),
            scopes: vec!["XboxLive.signin".to_string(), "offline_access".to_string()],
            redirect_port: 0,
            interactive_timeout_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

/// The three chained exchange hops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub regional_url: String,
    pub site_name: String,
    pub regional_relying_party: String,
    pub platform_url: String,
    pub sandbox_id: String,
    pub platform_relying_party: String,
    pub session_url: String,
    /// Scheme prefix of the identity string sent to the session hop.
    pub identity_scheme: String,
    pub hop_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            regional_url: "https://user.auth.xboxlive.com/user/authenticate".to_string(),
            site_name: "user.auth.xboxlive.com".to_string(),
            regional_relying_party: "http://auth.xboxlive.com".to_string(),
            platform_url: "https://xsts.auth.xboxlive.com/xsts/authorize".to_string(),
            sandbox_id: "RETAIL".to_string(),
            platform_relying_party: "rp://api.minecraftservices.com/".to_string(),
            session_url: "https://api.minecraftservices.com/authentication/login_with_xbox"
                .to_string(),
            identity_scheme: "XBL3.0".to_string(),
            hop_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            url: "https://api.minecraftservices.com/minecraft/profile".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Developer identity provider used by the device flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeveloperConfig {
    pub client_id: String,
    pub scope: String,
    pub device_code_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub default_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for DeveloperConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            scope: "read:user".to_string(),
            device_code_url: "https://github.com/login/device/code".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            profile_url: "https://api.github.com/user".to_string(),
            default_timeout_secs: 900,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub sign_in_attempts: u32,
    pub retry_delay_ms: u64,
    pub background_retry_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sign_in_attempts: 3,
            retry_delay_ms: 1000,
            background_retry_secs: 60,
        }
    }
}

impl PortcullisConfig {
    /// Load defaults, then `config.toml`, then environment overrides.
    pub fn load() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let env_home = std::env::var("PORTCULLIS_HOME").ok().map(PathBuf::from);
        let path = std::env::var("PORTCULLIS_CONFIG")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                env_home
                    .clone()
                    .unwrap_or_else(default_home_dir)
                    .join(CONFIG_FILE_NAME)
            });

        let mut config = Self::from_file(&path)?.unwrap_or_default();
        config.apply_env();
        Ok(config)
    }

    /// Read a TOML config file; `Ok(None)` when it does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, AuthError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        Ok(Some(toml::from_str(&raw)?))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AuthError> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        let env_mappings = [
            "PORTCULLIS_HOME",
            "PORTCULLIS_CONSUMER_CLIENT_ID",
            "PORTCULLIS_DEVELOPER_CLIENT_ID",
        ];

        for env_var in env_mappings {
            let Ok(value) = std::env::var(env_var) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            match env_var {
                "PORTCULLIS_HOME" => self.home = Some(PathBuf::from(value)),
                "PORTCULLIS_CONSUMER_CLIENT_ID" => self.consumer.client_id = value,
                _ => self.developer.client_id = value,
            }
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(default_home_dir)
    }

    /// File holding the serialized consumer-identity token cache.
    pub fn token_cache_path(&self) -> PathBuf {
        self.home_dir().join("consumer-cache.bin")
    }

    /// File holding opaque developer preferences.
    pub fn preferences_path(&self) -> PathBuf {
        self.home_dir().join("preferences.toml")
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        require("consumer.client_id", &self.client_id)
    }

    pub fn request_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn interactive_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.interactive_timeout_secs))
    }
}

impl ProfileConfig {
    pub fn timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.timeout_secs))
    }
}

impl ExchangeConfig {
    pub fn hop_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.hop_timeout_secs))
    }
}

impl DeveloperConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        require("developer.client_id", &self.client_id)
    }

    pub fn request_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn default_timeout(&self) -> Duration {
        clamp_timeout(Duration::from_secs(self.default_timeout_secs))
    }
}

fn require(name: &str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::Configuration(format!("{name} is not set")));
    }
    Ok(())
}

fn default_home_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".portcullis"))
        .unwrap_or_else(|| PathBuf::from(".portcullis"))
}
