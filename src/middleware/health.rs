//! Liveness check responder.

use super::{BoxFuture, Middleware, Next, Outcome};
use crate::{
    context::RequestContext,
    http::{Method, StatusCode},
};

/// Answers `GET`/`HEAD` requests to the health path (`/healthz` by default)
/// with `200 ok` without running the rest of the chain. Every other request is
/// passed straight through with no after-logic.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    path: String,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self::at("/healthz")
    }

    /// Health check on a custom path.
    pub fn at(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    fn matches(&self, ctx: &RequestContext) -> bool {
        let request = ctx.request();
        request.path() == self.path && matches!(request.method(), Method::Get | Method::Head)
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for HealthCheck {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if !self.matches(ctx) {
                return next.run(ctx).await;
            }
            tracing::trace!(request_id = %ctx.request_id(), "health check answered");
            ctx.response_mut().text(StatusCode::Ok, "ok")?;
            Ok(())
        })
    }
}
