//! Secure serving for HTTP handlers.
//!
//! `microauth` wraps any `tower::Service<Request<Body>>` handler, such as an
//! [`axum::Router`], with two things:
//!
//! - **TLS** from a generated self-signed certificate ([`cert::generate`]) or a
//!   certificate and optionally password-encrypted key on disk ([`cert::load`]).
//! - **A shared-token gate** ([`gate::AuthLayer`]) that compares the token from a
//!   configurable header, or the form field of the same name, in constant time,
//!   and answers a bare `401` on mismatch. Excluded paths and `OPTIONS`
//!   requests pass without a token.
//!
//! ```no_run
//! # async fn run() -> Result<(), microauth::ServeError> {
//! let server = microauth::Microauth::generated("api.internal")?;
//! server
//!     .serve_tls("0.0.0.0:8443", "s3cret", None::<axum::Router>, ["/health"])
//!     .await
//! # }
//! ```

pub mod cert;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod server;

pub use cert::Certificate;
pub use error::{ConfigurationError, GenerationError, KeyPairError, LoadError, ServeError};
pub use gate::{AuthConfig, AuthLayer, AuthService, Verdict, DEFAULT_HEADER};
pub use server::{default_handler, default_instance, serve_plain, serve_tls, Microauth};
