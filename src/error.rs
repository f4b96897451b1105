//! Error taxonomy shared by middleware, the builder, and the executor.
//!
//! Errors fall into four families:
//!
//! - [`ProtocolViolation`]: a middleware broke the pipeline contract (called
//!   `next` twice, wrote after the headers were sent). These are bugs and are
//!   never turned into crafted HTTP responses.
//! - Application errors ([`PipelineError::Validation`], [`PipelineError::NotFound`],
//!   [`PipelineError::Internal`]): recoverable by an upstream
//!   [`ExceptionBoundary`](crate::middleware::ExceptionBoundary).
//! - Infrastructure errors ([`PipelineError::Unavailable`]): a downstream
//!   dependency failed; usually translated into `503`.
//! - [`PipelineError::Cancelled`]: the request's cancellation token fired.

use std::error::Error as StdError;

use thiserror::Error;

use crate::http::StatusCode;

/// Returned by any response mutation attempted after the headers were flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response headers have already been sent")]
pub struct ResponseAlreadyStarted;

/// Returned by [`Response::write`](crate::http::Response::write) once the
/// response was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response has already been completed")]
pub struct ResponseCompleted;

/// A middleware violated the pipeline contract.
///
/// The unattributed variants are what a bare response mutation returns;
/// [`Next::run`](crate::middleware::Next::run) replaces them with the attributed
/// ones naming the stage that raised them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("middleware `{middleware}` invoked next() more than once")]
    NextCalledTwice { middleware: &'static str },

    #[error("middleware `{middleware}` invoked next() after the response was completed")]
    NextAfterCompleted { middleware: &'static str },

    #[error("middleware `{middleware}` modified the response after its headers were sent")]
    HeadersAlreadySent { middleware: &'static str },

    #[error("middleware `{middleware}` wrote to the response after it was completed")]
    WriteAfterCompleted { middleware: &'static str },

    #[error(transparent)]
    ResponseAlreadyStarted(#[from] ResponseAlreadyStarted),

    #[error(transparent)]
    ResponseCompleted(#[from] ResponseCompleted),
}

impl ProtocolViolation {
    /// Names the middleware an unattributed violation came from. Attributed
    /// violations are returned unchanged.
    #[must_use]
    pub fn attribute(self, middleware: &'static str) -> Self {
        match self {
            Self::ResponseAlreadyStarted(_) => Self::HeadersAlreadySent { middleware },
            Self::ResponseCompleted(_) => Self::WriteAfterCompleted { middleware },
            attributed => attributed,
        }
    }

    /// The middleware responsible, if known.
    pub fn middleware(&self) -> Option<&'static str> {
        match self {
            Self::NextCalledTwice { middleware }
            | Self::NextAfterCompleted { middleware }
            | Self::HeadersAlreadySent { middleware }
            | Self::WriteAfterCompleted { middleware } => Some(middleware),
            Self::ResponseAlreadyStarted(_) | Self::ResponseCompleted(_) => None,
        }
    }
}

/// The error type every middleware and terminal handler returns.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn StdError + Send + Sync>),
}

impl PipelineError {
    /// Wraps an arbitrary error as [`PipelineError::Internal`].
    pub fn internal<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Internal(err.into())
    }

    /// Returns `true` for contract violations, which must never be swallowed.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if this error only signals cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The status code an error boundary should answer with, or `None` when the
    /// error is not mappable to a response at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Protocol(_) | Self::Cancelled => None,
            Self::Validation(_) => Some(StatusCode::BadRequest),
            Self::NotFound(_) => Some(StatusCode::NotFound),
            Self::Unavailable(_) => Some(StatusCode::ServiceUnavailable),
            Self::Internal(_) => Some(StatusCode::InternalServerError),
        }
    }
}

impl From<ResponseAlreadyStarted> for PipelineError {
    fn from(err: ResponseAlreadyStarted) -> Self {
        Self::Protocol(ProtocolViolation::ResponseAlreadyStarted(err))
    }
}

impl From<ResponseCompleted> for PipelineError {
    fn from(err: ResponseCompleted) -> Self {
        Self::Protocol(ProtocolViolation::ResponseCompleted(err))
    }
}

/// Errors raised by [`PipelineBuilder`](crate::pipeline::PipelineBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("pipeline builder has already been built")]
    AlreadyBuilt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            PipelineError::Validation("bad".into()).status(),
            Some(StatusCode::BadRequest)
        );
        assert_eq!(
            PipelineError::NotFound("user 7".into()).status(),
            Some(StatusCode::NotFound)
        );
        assert_eq!(
            PipelineError::Unavailable("db".into()).status(),
            Some(StatusCode::ServiceUnavailable)
        );
        assert_eq!(
            PipelineError::internal("boom").status(),
            Some(StatusCode::InternalServerError)
        );
        assert_eq!(PipelineError::Cancelled.status(), None);
    }

    #[test]
    fn headers_sent_is_a_protocol_violation() {
        let err: PipelineError = ResponseAlreadyStarted.into();
        assert!(err.is_protocol_violation());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn attribution_names_the_stage() {
        let late = ProtocolViolation::from(ResponseAlreadyStarted).attribute("cors");
        assert_eq!(late, ProtocolViolation::HeadersAlreadySent { middleware: "cors" });
        assert_eq!(late.middleware(), Some("cors"));

        let write = ProtocolViolation::from(ResponseCompleted).attribute("gzip");
        assert_eq!(write, ProtocolViolation::WriteAfterCompleted { middleware: "gzip" });

        // Already attributed violations keep the original offender.
        assert_eq!(late.clone().attribute("outer"), late);
    }

    #[test]
    fn violation_names_the_middleware() {
        let err = ProtocolViolation::NextCalledTwice { middleware: "audit" };
        assert_eq!(
            err.to_string(),
            "middleware `audit` invoked next() more than once"
        );
    }
}
