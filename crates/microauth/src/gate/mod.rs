//! Shared-token request gate.
//!
//! Per request, in order:
//! 1. A path listed in the exclusions (exact, case-sensitive match) passes.
//! 2. An `OPTIONS` request passes (CORS preflight; the origin is not checked).
//! 3. The candidate token is read from the configured header, or, when that
//!    header is absent or empty, from the form value of the same name.
//! 4. The candidate is compared with the configured token in constant time.
//! 5. A mismatch is answered with a bare `401` and the wrapped handler is
//!    never called; otherwise the original request is forwarded unchanged.

pub mod form;
pub mod layer;
pub mod token;

pub use layer::{AuthLayer, AuthService};
pub use token::TokenVerifier;

use axum::http::{HeaderName, Method};

use crate::error::ConfigurationError;

/// Header (and form field) carrying the token unless configured otherwise.
pub const DEFAULT_HEADER: &str = "X-MICROBOX-TOKEN";

/// Outcome of gating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The path is excluded from authorisation.
    Excluded,
    /// CORS preflight request.
    Preflight,
    /// The presented token matched.
    Authorized,
    /// Missing or wrong token.
    Unauthorized,
}

impl Verdict {
    /// Whether the request is forwarded to the wrapped handler.
    pub fn allows(self) -> bool {
        !matches!(self, Verdict::Unauthorized)
    }
}

/// Immutable gate configuration, fixed before serving starts.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    header: HeaderName,
    field: String,
    token: TokenVerifier,
    excluded_paths: Vec<String>,
}

impl AuthConfig {
    /// Validate and build a gate configuration.
    ///
    /// `header` names both the request header and the form field the token
    /// may arrive in.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingToken`] if `token` is empty and
    /// [`ConfigurationError::InvalidHeaderName`] if `header` is not a valid
    /// HTTP header name.
    pub fn new<I, P>(header: &str, token: &str, excluded_paths: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let token = TokenVerifier::new(token)?;
        let header_name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| ConfigurationError::InvalidHeaderName(header.to_owned()))?;

        Ok(Self {
            header: header_name,
            field: header.to_owned(),
            token,
            excluded_paths: excluded_paths.into_iter().map(Into::into).collect(),
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Form field name, spelled exactly as configured.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn excluded_paths(&self) -> &[String] {
        &self.excluded_paths
    }

    /// Steps 1 and 2: requests that pass without presenting a token.
    pub fn exemption(&self, method: &Method, path: &str) -> Option<Verdict> {
        if self.excluded_paths.iter().any(|p| p == path) {
            return Some(Verdict::Excluded);
        }
        if method == Method::OPTIONS {
            return Some(Verdict::Preflight);
        }
        None
    }

    /// Step 4: constant-time comparison of a candidate token.
    pub fn verify(&self, candidate: &[u8]) -> Verdict {
        if self.token.verify(candidate) {
            Verdict::Authorized
        } else {
            Verdict::Unauthorized
        }
    }

    /// Full decision for a request whose candidate token is already known.
    pub fn decide(&self, method: &Method, path: &str, candidate: &[u8]) -> Verdict {
        self.exemption(method, path)
            .unwrap_or_else(|| self.verify(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(DEFAULT_HEADER, "abc123", ["/health"]).unwrap()
    }

    #[test]
    fn empty_token_is_a_configuration_error() {
        let err = AuthConfig::new(DEFAULT_HEADER, "", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingToken));
    }

    #[test]
    fn invalid_header_name_is_a_configuration_error() {
        let err = AuthConfig::new("bad header", "abc123", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidHeaderName(_)));
    }

    #[test]
    fn excluded_path_passes_without_token() {
        assert_eq!(config().decide(&Method::GET, "/health", b""), Verdict::Excluded);
        assert_eq!(config().decide(&Method::POST, "/health", b"wrong"), Verdict::Excluded);
    }

    #[test]
    fn exclusion_is_exact_and_case_sensitive() {
        let cfg = config();
        for path in ["/health/", "/healthz", "/HEALTH", "/health/live", "/"] {
            assert_eq!(cfg.decide(&Method::GET, path, b""), Verdict::Unauthorized, "{path}");
        }
    }

    #[test]
    fn options_passes_regardless_of_path_or_token() {
        let cfg = config();
        assert_eq!(cfg.decide(&Method::OPTIONS, "/status", b""), Verdict::Preflight);
        assert_eq!(cfg.decide(&Method::OPTIONS, "/status", b"wrong"), Verdict::Preflight);
    }

    #[test]
    fn exclusion_wins_over_preflight() {
        assert_eq!(config().decide(&Method::OPTIONS, "/health", b""), Verdict::Excluded);
    }

    #[test]
    fn token_must_match_exactly() {
        let cfg = config();
        assert_eq!(cfg.decide(&Method::GET, "/status", b"abc123"), Verdict::Authorized);
        assert_eq!(cfg.decide(&Method::GET, "/status", b"wrong"), Verdict::Unauthorized);
        assert_eq!(cfg.decide(&Method::GET, "/status", b""), Verdict::Unauthorized);
    }

    #[test]
    fn field_keeps_configured_spelling() {
        let cfg = AuthConfig::new("X-Custom-Token", "t", Vec::<String>::new()).unwrap();
        assert_eq!(cfg.field(), "X-Custom-Token");
        assert_eq!(cfg.header().as_str(), "x-custom-token");
    }

    #[test]
    fn verdicts_that_forward() {
        assert!(Verdict::Excluded.allows());
        assert!(Verdict::Preflight.allows());
        assert!(Verdict::Authorized.allows());
        assert!(!Verdict::Unauthorized.allows());
    }
}
