//! Incrementally built HTTP response.
//!
//! A [`Response`] starts out with no status, no headers, and an empty body. It
//! is filled in by middleware and the terminal handler while the request travels
//! through the pipeline.
//!
//! ## Headers-sent invariant
//!
//! Writing the first streamed body chunk (or calling [`Response::start`])
//! flushes the status line and headers. From that moment on every mutation of
//! status, headers, or the buffered body fails with [`ResponseAlreadyStarted`]
//! and leaves the response untouched: HTTP cannot retract a response that is
//! already on the wire.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::{Bytes, BytesMut};

use super::{Headers, StatusCode};
use crate::error::{ResponseAlreadyStarted, ResponseCompleted};

/// An HTTP response under construction.
///
/// # Examples
///
/// ```
/// use onionpipe::http::{Response, StatusCode};
///
/// let mut response = Response::new();
/// response.set_status(StatusCode::Ok).unwrap();
/// response.insert_header("Content-Type", "application/json").unwrap();
/// response.set_body(r#"{"status":"ok"}"#).unwrap();
///
/// response.write("trailing chunk").unwrap();
/// assert!(response.has_started());
/// assert!(response.insert_header("X-Late", "1").is_err());
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
    // Chunks written after the headers were flushed.
    streamed: Vec<Bytes>,
    started: Arc<AtomicBool>,
    finished: bool,
}

impl Response {
    /// Creates an empty response with an unset status.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain-text response built outside the pipeline, for the executor's
    /// last-resort answers.
    pub(crate) fn plain(status: StatusCode, body: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain; charset=utf-8");
        Self {
            status: Some(status),
            headers,
            body: BytesMut::from(body.as_bytes()),
            ..Self::default()
        }
    }

    /// Returns the status, or `None` if nothing has set one yet.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the buffered body followed by every streamed chunk.
    pub fn body(&self) -> Bytes {
        if self.streamed.is_empty() {
            return Bytes::copy_from_slice(&self.body);
        }
        let mut all = BytesMut::from(&self.body[..]);
        for chunk in &self.streamed {
            all.extend_from_slice(chunk);
        }
        all.freeze()
    }

    /// Returns `true` once the headers have been flushed.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Sets the status code.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        self.status = Some(status);
        Ok(())
    }

    /// Sets a header, replacing any previous values.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn insert_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds a header value next to the existing ones.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn append_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Removes a header. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn remove_header(&mut self, name: &str) -> Result<bool, ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        Ok(self.headers.remove(name))
    }

    /// Replaces the buffered body. Buffered bodies can be rewritten freely until
    /// the response starts.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn set_body(&mut self, body: impl AsRef<[u8]>) -> Result<(), ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
        Ok(())
    }

    /// Convenience for handlers: status, `Content-Type: text/plain` and body in one call.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn text(
        &mut self,
        status: StatusCode,
        body: impl Into<String>,
    ) -> Result<(), ResponseAlreadyStarted> {
        self.set_status(status)?;
        self.insert_header("Content-Type", "text/plain; charset=utf-8")?;
        self.set_body(body.into())
    }

    /// Convenience for handlers: status, `Content-Type: application/json` and a
    /// serialized body.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn json(
        &mut self,
        status: StatusCode,
        value: &serde_json::Value,
    ) -> Result<(), ResponseAlreadyStarted> {
        self.set_status(status)?;
        self.insert_header("Content-Type", "application/json")?;
        self.set_body(value.to_string())
    }

    /// Flushes the status line and headers. Idempotent.
    ///
    /// An unset status is flushed as `200 OK`, matching what a transport would put
    /// on the wire.
    pub fn start(&mut self) {
        if self.has_started() {
            return;
        }
        if self.status.is_none() {
            self.status = Some(StatusCode::Ok);
        }
        self.started.store(true, Ordering::Release);
    }

    /// Streams a body chunk, starting the response if it has not started yet.
    ///
    /// # Errors
    ///
    /// [`ResponseCompleted`] once the response was marked final; the chunk is
    /// dropped.
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), ResponseCompleted> {
        if self.finished {
            return Err(ResponseCompleted);
        }
        self.start();
        self.streamed.push(chunk.into());
        Ok(())
    }

    /// Returns `true` once the response was marked final.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Starts the response and closes the body to further writes.
    pub(crate) fn finish(&mut self) {
        self.start();
        self.finished = true;
    }

    /// Clears status, headers, and the buffered body so an error boundary can
    /// produce a fresh response.
    ///
    /// # Errors
    ///
    /// [`ResponseAlreadyStarted`] once the headers were sent.
    pub fn reset(&mut self) -> Result<(), ResponseAlreadyStarted> {
        self.ensure_not_started()?;
        self.status = None;
        self.headers.clear();
        self.body.clear();
        Ok(())
    }

    /// A handle to the headers-sent flag that outlives the response itself.
    pub(crate) fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    fn ensure_not_started(&self) -> Result<(), ResponseAlreadyStarted> {
        if self.has_started() {
            Err(ResponseAlreadyStarted)
        } else {
            Ok(())
        }
    }
}
