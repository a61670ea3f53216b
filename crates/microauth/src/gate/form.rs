//! Form-value lookup for tokens submitted without the header.
//!
//! Bodies are only inspected for `POST`, `PUT` and `PATCH` requests carrying a
//! URL-encoded or multipart form. Whatever is read is handed back so the
//! wrapped service sees the same body bytes.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, request::Parts, Method};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use url::form_urlencoded;

/// Upper bound on a form body buffered for token lookup.
pub const MAX_FORM_BODY: usize = 10 << 20;

const URLENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Encoding of a request body that may carry the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormKind {
    UrlEncoded,
    Multipart { boundary: String },
}

/// Outcome of buffering a form body.
pub enum BufferedBody {
    /// The whole body, within [`MAX_FORM_BODY`].
    Complete(Bytes),
    /// The body was too large or failed mid-read. The replacement body yields
    /// the bytes already read followed by the rest of the original stream.
    Incomplete(Body),
}

/// The form encoding of the request body, if it is one the token is looked up in.
pub fn form_kind(parts: &Parts) -> Option<FormKind> {
    if !matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
        return None;
    }

    let content_type = parts.headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type.split(';').next()?.trim();

    if mime.eq_ignore_ascii_case(URLENCODED_CONTENT_TYPE) {
        Some(FormKind::UrlEncoded)
    } else if mime.eq_ignore_ascii_case(MULTIPART_CONTENT_TYPE) {
        multer::parse_boundary(content_type)
            .ok()
            .map(|boundary| FormKind::Multipart { boundary })
    } else {
        None
    }
}

/// Read `body` up to `limit` bytes without losing any of it.
pub async fn buffer(body: Body, limit: usize) -> BufferedBody {
    let mut data = body.into_data_stream();
    let mut read = BytesMut::new();

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                read.extend_from_slice(&chunk);
                if read.len() > limit {
                    let prefix = stream::once(async move { Ok(read.freeze()) });
                    return BufferedBody::Incomplete(Body::from_stream(prefix.chain(data)));
                }
            }
            Err(e) => {
                let replay = stream::iter([Ok(read.freeze()), Err(e)]);
                return BufferedBody::Incomplete(Body::from_stream(replay));
            }
        }
    }

    BufferedBody::Complete(read.freeze())
}

/// First value of `key` in a buffered form body of the given kind.
pub async fn lookup_body(kind: &FormKind, body: Bytes, key: &str) -> Option<Vec<u8>> {
    match kind {
        FormKind::UrlEncoded => lookup(&body, key),
        FormKind::Multipart { boundary } => lookup_multipart(body, boundary, key).await,
    }
}

/// First value of `key` in a URL-encoded sequence. Keys match case-sensitively.
pub fn lookup(encoded: &[u8], key: &str) -> Option<Vec<u8>> {
    form_urlencoded::parse(encoded)
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned().into_bytes())
}

/// First non-file field named `key` in a multipart body. A malformed body has no fields.
async fn lookup_multipart(body: Bytes, boundary: &str, key: &str) -> Option<Vec<u8>> {
    let source = stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(source, boundary);

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.file_name().is_some() || field.name() != Some(key) {
            continue;
        }
        return field.bytes().await.ok().map(|value| value.to_vec());
    }
    None
}
