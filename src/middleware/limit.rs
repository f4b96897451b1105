//! Load shedding by in-flight request count.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::{BoxFuture, Middleware, Next, Outcome};
use crate::{context::RequestContext, http::StatusCode};

/// Caps how many requests may be inside the rest of the chain at once.
///
/// A request that finds every permit taken is answered with
/// `503 Service Unavailable` and a `Retry-After` header instead of queueing:
/// the overload is translated into a response right where it is detected.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    permits: Arc<Semaphore>,
    retry_after_secs: u32,
}

impl ConcurrencyLimit {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            retry_after_secs: 1,
        }
    }

    #[must_use]
    pub fn retry_after(mut self, secs: u32) -> Self {
        self.retry_after_secs = secs;
        self
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Middleware for ConcurrencyLimit {
    fn name(&self) -> &'static str {
        "concurrency_limit"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Ok(_permit) = self.permits.try_acquire() else {
                tracing::warn!(request_id = %ctx.request_id(), "concurrency limit reached");
                let response = ctx.response_mut();
                response.text(StatusCode::ServiceUnavailable, "Service Unavailable")?;
                response.insert_header("Retry-After", self.retry_after_secs.to_string())?;
                return Ok(());
            };
            next.run(ctx).await
        })
    }
}
