//! Configuration loading and validation for the secure-serve binary.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Where the listener's certificate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Generate a self-signed certificate for `TLS_HOST` at startup.
    Generate,
    /// Load `TLS_CERT_PATH` / `TLS_KEY_PATH`, decrypting the key with `TLS_KEY_PASSWORD`.
    Load,
    /// Serve plain HTTP. The token gate still applies.
    Plain,
}

impl TlsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsMode::Generate => "generate",
            TlsMode::Load => "load",
            TlsMode::Plain => "plain",
        }
    }
}

/// Validated secure-serve configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Shared token every non-excluded request must present. **Required.**
    #[serde(default)]
    pub auth_token: String,

    /// Header (and form field) carrying the token.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Comma-separated paths served without a token.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: String,

    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_tls_mode")]
    pub tls_mode: TlsMode,

    /// Host identity of the generated certificate.
    #[serde(default = "default_tls_host")]
    pub tls_host: String,

    /// PEM certificate chain. Required when `TLS_MODE=load`.
    #[serde(default)]
    pub tls_cert_path: String,

    /// PEM private key, optionally encrypted. Required when `TLS_MODE=load`.
    #[serde(default)]
    pub tls_key_path: String,

    /// Password for an encrypted `TLS_KEY_PATH`; ignored for plaintext keys.
    #[serde(default)]
    pub tls_key_password: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_auth_header() -> String {
    microauth::DEFAULT_HEADER.into()
}
fn default_excluded_paths() -> String {
    "/health".into()
}
fn default_listen_addr() -> String {
    "0.0.0.0:8443".into()
}
fn default_tls_mode() -> TlsMode {
    TlsMode::Generate
}
fn default_tls_host() -> String {
    microauth::server::DEFAULT_HOST.into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Socket address parsed from `LISTEN_ADDR`.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is not a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("LISTEN_ADDR is not a socket address: {}", self.listen_addr))
    }

    /// `EXCLUDED_PATHS` split on commas, blanks dropped.
    pub fn excluded_paths(&self) -> Vec<String> {
        self.excluded_paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.auth_token, "AUTH_TOKEN")?;
        ensure_non_empty(&self.auth_header, "AUTH_HEADER")?;
        self.listen_addr()?;

        match self.tls_mode {
            TlsMode::Load => {
                ensure_non_empty(&self.tls_cert_path, "TLS_CERT_PATH")?;
                ensure_non_empty(&self.tls_key_path, "TLS_KEY_PATH")?;
            }
            TlsMode::Generate => ensure_non_empty(&self.tls_host, "TLS_HOST")?,
            TlsMode::Plain => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("Config")
            .field("auth_header", &self.auth_header)
            .field("excluded_paths", &self.excluded_paths)
            .field("listen_addr", &self.listen_addr)
            .field("tls_mode", &self.tls_mode)
            .field("tls_host", &self.tls_host)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
