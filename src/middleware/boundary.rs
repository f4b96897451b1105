//! Application-level error boundary.

use serde_json::json;

use super::{BoxFuture, Middleware, Next, Outcome};
use crate::{context::RequestContext, error::PipelineError, http::StatusCode};

/// Converts errors bubbling out of the rest of the chain into responses.
///
/// | Error | Status |
/// |---|---|
/// | [`PipelineError::Validation`] | `400 Bad Request` |
/// | [`PipelineError::NotFound`] | `404 Not Found` |
/// | [`PipelineError::Unavailable`] | `503 Service Unavailable` |
/// | anything else | `500 Internal Server Error` |
///
/// The body is a JSON envelope `{"error": {"status": .., "message": ..}}`.
/// Messages of `5xx` errors are replaced with the canonical reason phrase
/// unless [`expose_details`](Self::expose_details) is enabled.
///
/// Protocol violations and cancellation pass through untouched: they are not
/// application failures. If the response already started streaming, the error
/// is passed on as well, since a second status line cannot be sent.
#[derive(Debug, Clone, Default)]
pub struct ExceptionBoundary {
    expose_details: bool,
}

impl ExceptionBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include internal error messages in `5xx` bodies.
    #[must_use]
    pub fn expose_details(mut self, expose: bool) -> Self {
        self.expose_details = expose;
        self
    }

    fn render(&self, ctx: &mut RequestContext, status: StatusCode, err: &PipelineError) -> Outcome {
        let message = if status.is_server_error() && !self.expose_details {
            status.canonical_reason().to_owned()
        } else {
            err.to_string()
        };
        let response = ctx.response_mut();
        response.reset()?;
        response.json(
            status,
            &json!({
                "error": {
                    "status": status.as_u16(),
                    "message": message,
                }
            }),
        )?;
        Ok(())
    }
}

impl Middleware for ExceptionBoundary {
    fn name(&self) -> &'static str {
        "exception_boundary"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let err = match next.run(ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let Some(status) = err.status() else {
                return Err(err);
            };

            if ctx.response().has_started() {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    "error after response started; cannot rewrite it"
                );
                return Err(err);
            }

            if status.is_server_error() {
                tracing::error!(request_id = %ctx.request_id(), error = %err, "request failed");
            } else {
                tracing::debug!(request_id = %ctx.request_id(), error = %err, "request rejected");
            }
            self.render(ctx, status, &err)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::ProtocolViolation,
        http::Request,
        middleware::{Handler, SharedMiddleware},
    };

    struct Fails(fn() -> PipelineError);

    impl Handler for Fails {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
            let err = (self.0)();
            Box::pin(async move { Err(err) })
        }
    }

    struct Streams;

    impl Handler for Streams {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                ctx.response_mut().write("partial")?;
                Err(PipelineError::internal("stream broke"))
            })
        }
    }

    async fn run(boundary: ExceptionBoundary, handler: &dyn Handler) -> (RequestContext, Outcome) {
        let stages: Vec<SharedMiddleware> = vec![Arc::new(boundary)];
        let mut ctx = RequestContext::new(Request::builder().build());
        let outcome = Next::new(&stages, handler).run(&mut ctx).await;
        (ctx, outcome)
    }

    fn body_json(ctx: &RequestContext) -> serde_json::Value {
        serde_json::from_slice(&ctx.response().body()).unwrap()
    }

    #[tokio::test]
    async fn maps_categories_to_statuses() {
        let cases: [(fn() -> PipelineError, StatusCode); 4] = [
            (|| PipelineError::Validation("name is required".into()), StatusCode::BadRequest),
            (|| PipelineError::NotFound("order 9".into()), StatusCode::NotFound),
            (|| PipelineError::Unavailable("db down".into()), StatusCode::ServiceUnavailable),
            (|| PipelineError::internal("null deref"), StatusCode::InternalServerError),
        ];
        for (make, expected) in cases {
            let (ctx, outcome) = run(ExceptionBoundary::new(), &Fails(make)).await;
            assert!(outcome.is_ok());
            assert_eq!(ctx.response().status(), Some(expected));
            assert_eq!(body_json(&ctx)["error"]["status"], expected.as_u16());
        }
    }

    #[tokio::test]
    async fn hides_internal_details_by_default() {
        let (ctx, _) = run(
            ExceptionBoundary::new(),
            &Fails(|| PipelineError::internal("secret table missing")),
        )
        .await;
        let body = body_json(&ctx);
        assert_eq!(body["error"]["message"], "Internal Server Error");

        let (ctx, _) = run(
            ExceptionBoundary::new().expose_details(true),
            &Fails(|| PipelineError::internal("secret table missing")),
        )
        .await;
        let body = body_json(&ctx);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("secret table missing"));
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let (ctx, _) = run(
            ExceptionBoundary::new(),
            &Fails(|| PipelineError::Validation("age must be positive".into())),
        )
        .await;
        assert_eq!(
            body_json(&ctx)["error"]["message"],
            "validation failed: age must be positive"
        );
    }

    #[tokio::test]
    async fn protocol_violations_pass_through() {
        let (ctx, outcome) = run(
            ExceptionBoundary::new(),
            &Fails(|| ProtocolViolation::NextCalledTwice { middleware: "x" }.into()),
        )
        .await;
        assert!(outcome.unwrap_err().is_protocol_violation());
        assert_eq!(ctx.response().status(), None);
    }

    #[tokio::test]
    async fn started_response_is_left_alone() {
        let (ctx, outcome) = run(ExceptionBoundary::new(), &Streams).await;
        assert!(outcome.is_err());
        assert_eq!(ctx.response().status(), Some(StatusCode::Ok));
        assert_eq!(&ctx.response().body()[..], b"partial");
    }
}
