//! `secure-serve`: hosts a small router behind microauth's listener.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Obtain the certificate according to `TLS_MODE`.
//! 4. Build the Axum router.
//! 5. Serve it behind the token gate until the listener fails.

mod config;
mod handlers;
mod router;
mod telemetry;

use anyhow::{Context, Result};
use microauth::Microauth;
use tracing::info;

use config::{Config, TlsMode};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        tls_mode = cfg.tls_mode.as_str(),
        "secure-serve starting"
    );

    // -----------------------------------------------------------------------
    // 3. Certificate
    // -----------------------------------------------------------------------
    let server = match cfg.tls_mode {
        TlsMode::Generate => Microauth::generated(&cfg.tls_host)
            .context("failed to generate self-signed certificate")?,
        TlsMode::Load => {
            let cert = microauth::cert::load(
                &cfg.tls_cert_path,
                &cfg.tls_key_path,
                &cfg.tls_key_password,
            )
            .context("failed to load certificate and key")?;
            Microauth::new(cert)
        }
        TlsMode::Plain => Microauth::plain(),
    }
    .with_header(cfg.auth_header.as_str());

    // -----------------------------------------------------------------------
    // 4. Router
    // -----------------------------------------------------------------------
    let router = router::build();

    // -----------------------------------------------------------------------
    // 5. Listener
    // -----------------------------------------------------------------------
    let addr = cfg.listen_addr()?;
    let excluded = cfg.excluded_paths();
    let served = match cfg.tls_mode {
        TlsMode::Plain => {
            server
                .serve_plain(addr, &cfg.auth_token, Some(router), excluded)
                .await
        }
        TlsMode::Generate | TlsMode::Load => {
            server
                .serve_tls(addr, &cfg.auth_token, Some(router), excluded)
                .await
        }
    };
    served.context("listener stopped")?;

    Ok(())
}
