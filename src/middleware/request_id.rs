//! Correlation id echo.

use super::{BoxFuture, Middleware, Next, Outcome};
use crate::context::{RequestContext, RequestId};

/// Echoes the request's correlation id in the `X-Request-Id` response header.
///
/// The id comes from [`RequestContext::request_id`]: the caller's own
/// `X-Request-Id` when it sent a usable one, a generated UUID otherwise.
/// Streaming responses that started before the chain unwound keep their
/// headers as sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdHeader;

impl Middleware for RequestIdHeader {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let outcome = next.run(ctx).await;
            if !ctx.response().has_started() {
                let id = ctx.request_id().to_string();
                ctx.response_mut().insert_header(RequestId::HEADER, id)?;
            }
            outcome
        })
    }
}
