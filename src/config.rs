//! Runtime settings resolved once by the caller and handed to the pipeline.
use crate::error::ConfigError;
use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://m2m.cr.usgs.gov/api/api/json/stable/";

pub const USERNAME_ENV: &str = "EARTHDATA_USER";
pub const TOKEN_ENV: &str = "EARTHDATA_TOKEN";

/// Username and application token used for `login-token`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let username = read_env(USERNAME_ENV)?;
        let token = read_env(TOKEN_ENV)?;
        Ok(Self { username, token })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn read_env(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Fixed-interval, bounded polling of `download-retrieve`.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub max_concurrency: usize,
    pub delete_archive: bool,
    /// Upper bound for a single transfer, including writing it to disk.
    pub item_timeout: Duration,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            delete_archive: true,
            item_timeout: Duration::from_secs(300),
        }
    }
}
