//! Inbound HTTP request as handed over by the transport layer.
//!
//! Wire parsing happens before the pipeline sees a request; here a request is
//! assembled through [`RequestBuilder`] from already-decoded parts.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

use super::{Headers, Method};

/// Errors produced while reading a request body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("request body has already been consumed")]
    AlreadyConsumed,

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

enum BodyKind {
    Empty,
    Full(Bytes),
    Stream(mpsc::Receiver<Bytes>),
    Consumed,
}

/// A request body that can be read at most once.
///
/// The body is either empty, fully buffered, or a stream of chunks fed by the
/// transport through an mpsc channel (see [`Body::channel`]).
///
/// # Examples
///
/// ```
/// use onionpipe::http::Body;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut body = Body::from("hello");
/// assert_eq!(&body.collect().await.unwrap()[..], b"hello");
/// assert!(body.collect().await.is_err());
/// # }
/// ```
pub struct Body {
    kind: BodyKind,
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    /// Creates a streamed body and the sender the transport pushes chunks into.
    ///
    /// The stream ends when every sender is dropped.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            tx,
            Self {
                kind: BodyKind::Stream(rx),
            },
        )
    }

    /// Returns `true` once the body has been read.
    pub fn is_consumed(&self) -> bool {
        matches!(self.kind, BodyKind::Consumed)
    }

    /// Returns the next chunk, or `Ok(None)` at the end of the body.
    ///
    /// # Errors
    ///
    /// [`BodyError::AlreadyConsumed`] if the body was already read to the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, BodyError> {
        match std::mem::replace(&mut self.kind, BodyKind::Consumed) {
            BodyKind::Empty => Ok(None),
            BodyKind::Full(bytes) => {
                self.kind = BodyKind::Empty;
                Ok(Some(bytes))
            }
            BodyKind::Stream(mut rx) => match rx.recv().await {
                Some(chunk) => {
                    self.kind = BodyKind::Stream(rx);
                    Ok(Some(chunk))
                }
                None => Ok(None),
            },
            BodyKind::Consumed => Err(BodyError::AlreadyConsumed),
        }
    }

    /// Reads the whole body into a single buffer.
    ///
    /// # Errors
    ///
    /// [`BodyError::AlreadyConsumed`] on a second read.
    pub async fn collect(&mut self) -> Result<Bytes, BodyError> {
        self.collect_limited(usize::MAX).await
    }

    /// Reads the whole body, failing once more than `max_bytes` were received.
    ///
    /// # Errors
    ///
    /// - [`BodyError::AlreadyConsumed`] on a second read.
    /// - [`BodyError::TooLarge`] when the limit is exceeded.
    pub async fn collect_limited(&mut self, max_bytes: usize) -> Result<Bytes, BodyError> {
        if self.is_consumed() {
            return Err(BodyError::AlreadyConsumed);
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            if buf.len() + chunk.len() > max_bytes {
                self.kind = BodyKind::Consumed;
                return Err(BodyError::TooLarge { max_bytes });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::Full(_) => "full",
            BodyKind::Stream(_) => "stream",
            BodyKind::Consumed => "consumed",
        };
        f.debug_struct("Body").field("kind", &kind).finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            kind: BodyKind::Full(bytes),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

/// A parsed inbound HTTP request.
///
/// Owned by exactly one [`RequestContext`](crate::context::RequestContext) for
/// the duration of one execution.
///
/// # Examples
///
/// ```
/// use onionpipe::http::{Method, Request};
///
/// let request = Request::builder()
///     .method(Method::Get)
///     .uri("/hello?name=world")
///     .header("Host", "localhost")
///     .build();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: Headers,
    query: Option<String>,
    params: HashMap<String, String>,
    body: Body,
}

impl Request {
    /// Starts building a request; defaults to `GET /` with no headers and an empty body.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the body handle for reading in place.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Takes the body out of the request, leaving a consumed marker behind.
    ///
    /// A second call returns a body whose reads fail with
    /// [`BodyError::AlreadyConsumed`].
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(
            &mut self.body,
            Body {
                kind: BodyKind::Consumed,
            },
        )
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Builder for [`Request`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    query: Option<String>,
    headers: Headers,
    body: Body,
}

impl RequestBuilder {
    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets path and query from a request target such as `/search?q=rust`.
    #[must_use]
    pub fn uri(mut self, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        match target.split_once('?') {
            Some((path, query)) => {
                self.path = Some(path.to_owned());
                self.query = Some(query.to_owned());
            }
            None => {
                self.path = Some(target.to_owned());
                self.query = None;
            }
        }
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Finishes the request.
    pub fn build(self) -> Request {
        let path = match self.path {
            Some(p) if !p.is_empty() => p,
            _ => "/".to_owned(),
        };
        let params = self
            .query
            .as_deref()
            .map(parse_query_string)
            .unwrap_or_default();
        Request {
            method: self.method.unwrap_or(Method::Get),
            path,
            headers: self.headers,
            query: self.query,
            params,
            body: self.body,
        }
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space; the transport is responsible
/// for percent-decoding.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let req = Request::builder().build();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.query_string(), None);
    }

    #[test]
    fn query_string() {
        let req = Request::builder().uri("/search?q=rust+lang&page=2").build();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2"));
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
    }

    #[test]
    fn content_length() {
        let req = Request::builder()
            .method(Method::Post)
            .header("Content-Length", "5")
            .body("hello")
            .build();
        assert_eq!(req.content_length(), Some(5));
    }

    #[tokio::test]
    async fn body_is_consumed_at_most_once() {
        let mut req = Request::builder().body("payload").build();
        let mut body = req.take_body();
        assert_eq!(&body.collect().await.unwrap()[..], b"payload");
        assert_eq!(body.collect().await, Err(BodyError::AlreadyConsumed));

        let mut again = req.take_body();
        assert_eq!(again.collect().await, Err(BodyError::AlreadyConsumed));
    }

    #[tokio::test]
    async fn streamed_body() {
        let (tx, mut body) = Body::channel(4);
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"he")).await.unwrap();
            tx.send(Bytes::from_static(b"llo")).await.unwrap();
        });
        assert_eq!(&body.collect().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn body_limit() {
        let mut body = Body::from("0123456789");
        assert_eq!(
            body.collect_limited(4).await,
            Err(BodyError::TooLarge { max_bytes: 4 })
        );
        assert!(body.is_consumed());
    }
}
