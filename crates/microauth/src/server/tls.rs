//! rustls server configuration for a [`Certificate`].

use std::sync::Arc;

use rustls::ServerConfig;

use crate::cert::Certificate;

/// Build a [`rustls::ServerConfig`] serving `certificate`, offering HTTP/2 and HTTP/1.1.
///
/// # Errors
///
/// Returns an error if rustls rejects the certificate chain or key.
pub fn build_server_config(certificate: &Certificate) -> Result<Arc<ServerConfig>, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certificate.chain().to_vec(), certificate.private_key())?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_loaded_certificate() {
        let cert = Certificate::from_pem(
            include_bytes!("../../tests/fixtures/cert.pem"),
            include_bytes!("../../tests/fixtures/key.pem"),
        )
        .unwrap();
        let config = build_server_config(&cert).unwrap();
        assert_eq!(config.alpn_protocols[0], b"h2");
    }
}
