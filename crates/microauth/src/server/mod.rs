//! Token-gated HTTP and HTTPS listeners.
//!
//! # Responsibilities
//! - Validate the gate configuration before anything is bound.
//! - Build the rustls config from the instance's [`Certificate`].
//! - Run the accept loop: one task per connection, HTTP/1.1 and HTTP/2.

pub mod defaults;
pub mod tls;

pub use defaults::{default_handler, default_instance, DEFAULT_HOST};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::cert::Certificate;
use crate::error::{ConfigurationError, GenerationError, ServeError};
use crate::gate::{AuthConfig, AuthLayer, AuthService, DEFAULT_HEADER};

/// A serving component: at most one certificate and one token header name.
///
/// The token and excluded paths are supplied when serving starts and stay
/// fixed for the life of the listener.
#[derive(Debug, Clone)]
pub struct Microauth {
    header: String,
    certificate: Option<Arc<Certificate>>,
}

impl Microauth {
    /// Serve `certificate`, reading the token from [`DEFAULT_HEADER`].
    pub fn new(certificate: Certificate) -> Self {
        Self {
            header: DEFAULT_HEADER.to_owned(),
            certificate: Some(Arc::new(certificate)),
        }
    }

    /// An instance without a certificate, usable only for plain listeners.
    pub fn plain() -> Self {
        Self {
            header: DEFAULT_HEADER.to_owned(),
            certificate: None,
        }
    }

    /// Serve a freshly generated self-signed certificate for `host`.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if the certificate cannot be generated.
    pub fn generated(host: &str) -> Result<Self, GenerationError> {
        Ok(Self::new(crate::cert::generate(host)?))
    }

    /// Read the token from `header` (and the form field of the same name).
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_deref()
    }

    /// Build the gate layer for `token` and `excluded_paths`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if `token` is empty or the header name
    /// is invalid.
    pub fn gate<I, P>(&self, token: &str, excluded_paths: I) -> Result<AuthLayer, ConfigurationError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        AuthConfig::new(&self.header, token, excluded_paths).map(AuthLayer::new)
    }

    /// Bind `addr` and serve `handler` over TLS behind the token gate.
    ///
    /// `None` serves [`default_handler`]. Runs until the listener fails.
    ///
    /// # Errors
    ///
    /// Fails before binding if the gate configuration is invalid, the instance
    /// has no certificate or rustls rejects it, and afterwards only if binding
    /// fails.
    pub async fn serve_tls<A, H, I, P>(
        &self,
        addr: A,
        token: &str,
        handler: Option<H>,
        excluded_paths: I,
    ) -> Result<(), ServeError>
    where
        A: ToSocketAddrs,
        H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
        H::Future: Send + 'static,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let gate = self.gate(token, excluded_paths)?;
        let acceptor = self.acceptor()?;
        let listener = TcpListener::bind(addr).await?;
        accept_loop(listener, Some(acceptor), gate.layer(handler_or_default(handler))).await
    }

    /// Like [`Microauth::serve_tls`] on an already bound listener.
    ///
    /// # Errors
    ///
    /// See [`Microauth::serve_tls`].
    pub async fn serve_tls_on<H, I, P>(
        &self,
        listener: TcpListener,
        token: &str,
        handler: Option<H>,
        excluded_paths: I,
    ) -> Result<(), ServeError>
    where
        H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
        H::Future: Send + 'static,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let gate = self.gate(token, excluded_paths)?;
        let acceptor = self.acceptor()?;
        accept_loop(listener, Some(acceptor), gate.layer(handler_or_default(handler))).await
    }

    /// Bind `addr` and serve `handler` over plain TCP, still behind the token gate.
    ///
    /// # Errors
    ///
    /// Fails before binding if the gate configuration is invalid, and
    /// afterwards only if binding fails.
    pub async fn serve_plain<A, H, I, P>(
        &self,
        addr: A,
        token: &str,
        handler: Option<H>,
        excluded_paths: I,
    ) -> Result<(), ServeError>
    where
        A: ToSocketAddrs,
        H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
        H::Future: Send + 'static,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let gate = self.gate(token, excluded_paths)?;
        let listener = TcpListener::bind(addr).await?;
        accept_loop(listener, None, gate.layer(handler_or_default(handler))).await
    }

    /// Like [`Microauth::serve_plain`] on an already bound listener.
    ///
    /// # Errors
    ///
    /// See [`Microauth::serve_plain`].
    pub async fn serve_plain_on<H, I, P>(
        &self,
        listener: TcpListener,
        token: &str,
        handler: Option<H>,
        excluded_paths: I,
    ) -> Result<(), ServeError>
    where
        H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
        H::Future: Send + 'static,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let gate = self.gate(token, excluded_paths)?;
        accept_loop(listener, None, gate.layer(handler_or_default(handler))).await
    }

    fn acceptor(&self) -> Result<TlsAcceptor, ServeError> {
        let certificate = self
            .certificate
            .as_deref()
            .ok_or(ConfigurationError::MissingCertificate)?;
        Ok(TlsAcceptor::from(tls::build_server_config(certificate)?))
    }
}

/// [`Microauth::serve_tls`] on the [`default_instance`].
///
/// # Errors
///
/// Fails immediately if `token` is empty; otherwise see [`Microauth::serve_tls`].
pub async fn serve_tls<A, H, I, P>(
    addr: A,
    token: &str,
    handler: Option<H>,
    excluded_paths: I,
) -> Result<(), ServeError>
where
    A: ToSocketAddrs,
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    H::Future: Send + 'static,
    I: IntoIterator<Item = P>,
    P: Into<String>,
{
    if token.is_empty() {
        return Err(ConfigurationError::MissingToken.into());
    }
    default_instance()?
        .serve_tls(addr, token, handler, excluded_paths)
        .await
}

/// [`Microauth::serve_plain`] on the [`default_instance`].
///
/// # Errors
///
/// Fails immediately if `token` is empty; otherwise see [`Microauth::serve_plain`].
pub async fn serve_plain<A, H, I, P>(
    addr: A,
    token: &str,
    handler: Option<H>,
    excluded_paths: I,
) -> Result<(), ServeError>
where
    A: ToSocketAddrs,
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    H::Future: Send + 'static,
    I: IntoIterator<Item = P>,
    P: Into<String>,
{
    if token.is_empty() {
        return Err(ConfigurationError::MissingToken.into());
    }
    default_instance()?
        .serve_plain(addr, token, handler, excluded_paths)
        .await
}

/// Handler behind the gate, type-erased so supplied services and the default
/// router share one accept loop.
type Handler = BoxCloneService<Request<Body>, Response, Infallible>;

fn handler_or_default<H>(handler: Option<H>) -> Handler
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    H::Future: Send + 'static,
{
    match handler {
        Some(handler) => BoxCloneService::new(handler),
        None => BoxCloneService::new(default_handler()),
    }
}

/// Accept connections until the listener fails, one task per connection.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    service: AuthService<Handler>,
) -> Result<(), ServeError> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, tls = tls.is_some(), "microauth listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept error");
                continue;
            }
        };
        debug!(%peer_addr, "accepted connection");

        let tls = tls.clone();
        let service = service.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, peer_addr, service).await,
                    Err(e) => debug!(%peer_addr, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(stream, peer_addr, service).await,
            }
        });
    }
}

async fn serve_connection<IO>(io: IO, peer_addr: SocketAddr, service: AuthService<Handler>)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let hyper_service = hyper::service::service_fn(move |req: Request<Incoming>| {
        service.clone().oneshot(req.map(Body::new))
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), hyper_service)
        .await
    {
        warn!(%peer_addr, error = %e, "connection error");
    }
}
