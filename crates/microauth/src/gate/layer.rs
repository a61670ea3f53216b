//! Tower middleware applying [`AuthConfig`] to every request of a wrapped service.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};
use zeroize::Zeroizing;

use super::form::{self, BufferedBody};
use super::AuthConfig;

/// [`Layer`] that wraps a service in an [`AuthService`].
#[derive(Debug, Clone)]
pub struct AuthLayer {
    config: Arc<AuthConfig>,
}

impl AuthLayer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Forwards authorised requests to `inner`; answers everything else with `401`.
///
/// Holds no per-request state: clones share the read-only configuration.
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let config = Arc::clone(&self.config);
        // Keep the instance that was driven to readiness for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match authorize(&config, req).await {
                Some(req) => inner.call(req).await,
                None => Ok(StatusCode::UNAUTHORIZED.into_response()),
            }
        })
    }
}

/// Returns the request to forward, or `None` when it must be rejected.
async fn authorize(config: &AuthConfig, req: Request<Body>) -> Option<Request<Body>> {
    if config
        .exemption(req.method(), req.uri().path())
        .is_some()
    {
        return Some(req);
    }

    let (candidate, req) = candidate_token(config, req).await;
    config.verify(&candidate).allows().then_some(req)
}

/// Extract the candidate token, handing back a request equivalent to the input.
///
/// A form body that is too large or cannot be read contributes no value; the
/// query string is still consulted.
async fn candidate_token(
    config: &AuthConfig,
    req: Request<Body>,
) -> (Zeroizing<Vec<u8>>, Request<Body>) {
    if let Some(value) = req
        .headers()
        .get(config.header())
        .filter(|v| !v.is_empty())
    {
        let candidate = Zeroizing::new(value.as_bytes().to_vec());
        return (candidate, req);
    }

    let (parts, body) = req.into_parts();

    let (from_body, body) = match form::form_kind(&parts) {
        Some(kind) => match form::buffer(body, form::MAX_FORM_BODY).await {
            BufferedBody::Complete(bytes) => (
                form::lookup_body(&kind, bytes.clone(), config.field()).await,
                Body::from(bytes),
            ),
            BufferedBody::Incomplete(body) => (None, body),
        },
        None => (None, body),
    };

    // Body fields take precedence over the query string.
    let candidate = from_body
        .or_else(|| {
            parts
                .uri
                .query()
                .and_then(|q| form::lookup(q.as_bytes(), config.field()))
        })
        .unwrap_or_default();

    (Zeroizing::new(candidate), Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::DEFAULT_HEADER;
    use axum::http::{header::CONTENT_TYPE, Method};
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    const TOKEN: &str = "abc123";

    fn app() -> Router {
        let config = AuthConfig::new(DEFAULT_HEADER, TOKEN, ["/health"]).unwrap();
        Router::new()
            .route("/health", get(|| async { "healthy" }))
            .route("/status", get(|| async { "ok" }).options(|| async { "preflight" }))
            .route("/echo", post(|body: String| async move { body }))
            .route(
                "/size",
                post(|body: Body| async move {
                    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                    bytes.len().to_string()
                }),
            )
            .layer(AuthLayer::new(config))
    }

    async fn send(req: Request<Body>) -> (StatusCode, String) {
        let resp = app().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> axum::http::request::Builder {
        Request::builder().method(Method::GET).uri(uri)
    }

    #[tokio::test]
    async fn excluded_path_without_token_is_forwarded() {
        let (status, body) = send(get_request("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "healthy");
    }

    #[tokio::test]
    async fn correct_header_is_forwarded() {
        let req = get_request("/status")
            .header(DEFAULT_HEADER, TOKEN)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn header_name_matches_case_insensitively() {
        let req = get_request("/status")
            .header("x-microbox-token", TOKEN)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_header_is_rejected_with_empty_body() {
        let req = get_request("/status")
            .header(DEFAULT_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (status, _) = send(get_request("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn options_without_token_is_forwarded() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "preflight");
    }

    #[tokio::test]
    async fn token_in_query_string_is_accepted() {
        let uri = format!("/status?{DEFAULT_HEADER}={TOKEN}");
        let (status, _) = send(get_request(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_header_falls_back_to_form_value() {
        let uri = format!("/status?{DEFAULT_HEADER}={TOKEN}");
        let req = get_request(&uri)
            .header(DEFAULT_HEADER, "")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn header_takes_precedence_over_form_value() {
        let uri = format!("/status?{DEFAULT_HEADER}={TOKEN}");
        let req = get_request(&uri)
            .header(DEFAULT_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn form_body_token_is_accepted_and_body_forwarded_intact() {
        let form = format!("note=hello&{DEFAULT_HEADER}={TOKEN}");
        let req = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.clone()))
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, form);
    }

    #[tokio::test]
    async fn form_body_overrides_query_string() {
        let uri = format!("/echo?{DEFAULT_HEADER}={TOKEN}");
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("{DEFAULT_HEADER}=wrong")))
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn multipart_token_is_accepted_and_body_forwarded_intact() {
        let form = format!(
            "--XyZ\r\nContent-Disposition: form-data; name=\"{DEFAULT_HEADER}\"\r\n\r\n{TOKEN}\r\n--XyZ--\r\n"
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
            .body(Body::from(form.clone()))
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, form);
    }

    #[tokio::test]
    async fn multipart_wrong_token_is_rejected() {
        let form = format!(
            "--XyZ\r\nContent-Disposition: form-data; name=\"{DEFAULT_HEADER}\"\r\n\r\nwrong\r\n--XyZ--\r\n"
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
            .body(Body::from(form))
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_form_body_falls_back_to_query_string() {
        let len = form::MAX_FORM_BODY + 1;
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/size?{DEFAULT_HEADER}={TOKEN}"))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(vec![b'a'; len]))
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, len.to_string());
    }

    #[tokio::test]
    async fn oversized_form_body_without_query_token_is_rejected() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/size")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(vec![b'a'; form::MAX_FORM_BODY + 1]))
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn json_body_is_not_searched() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(format!("{DEFAULT_HEADER}={TOKEN}")))
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejection_does_not_echo_the_token() {
        let req = get_request("/status")
            .header(DEFAULT_HEADER, "guess-me")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        for value in resp.headers().values() {
            assert!(!value.as_bytes().windows(8).any(|w| w == b"guess-me"));
        }
    }

    #[tokio::test]
    async fn concurrent_requests_are_independent() {
        let app = app();
        let mut handles = Vec::new();
        for i in 0..32 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                let token = if i % 2 == 0 { TOKEN } else { "wrong" };
                let req = Request::builder()
                    .uri("/status")
                    .header(DEFAULT_HEADER, token)
                    .body(Body::empty())
                    .unwrap();
                (i, app.oneshot(req).await.unwrap().status())
            }));
        }
        for handle in handles {
            let (i, status) = handle.await.unwrap();
            let expected = if i % 2 == 0 {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            assert_eq!(status, expected);
        }
    }
}
