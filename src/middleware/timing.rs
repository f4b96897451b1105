//! Downstream latency measurement.

use std::time::Duration;

use tokio::time::Instant;

use super::{BoxFuture, Middleware, Next, Outcome};
use crate::context::RequestContext;

/// Monotonic timestamp recorded in the item bag when [`Timing`] sees a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Measures how long the rest of the chain took.
///
/// Stores a [`RequestStart`] item before calling `next`. Afterwards, whether
/// the chain succeeded or not, the elapsed time is written to a response header
/// (`X-Response-Time` by default) if the headers are still mutable. When the
/// response has already started streaming the header can no longer be added, so
/// the measurement is emitted as a `tracing` record instead.
#[derive(Debug, Clone)]
pub struct Timing {
    header: &'static str,
}

impl Timing {
    pub fn new() -> Self {
        Self {
            header: "X-Response-Time",
        }
    }

    /// Use a different header name.
    #[must_use]
    pub fn header(mut self, header: &'static str) -> Self {
        self.header = header;
        self
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new()
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0)
}

impl Middleware for Timing {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let start = Instant::now();
            ctx.items_mut().insert(RequestStart(start));

            let outcome = next.run(ctx).await;

            let elapsed = start.elapsed();
            if ctx.response().has_started() {
                tracing::info!(
                    request_id = %ctx.request_id(),
                    method = %ctx.request().method(),
                    path = ctx.request().path(),
                    elapsed = ?elapsed,
                    "response already started; timing logged out of band"
                );
            } else {
                ctx.response_mut()
                    .insert_header(self.header, format_elapsed(elapsed))?;
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::PipelineError,
        http::{Request, StatusCode},
        middleware::{Handler, SharedMiddleware},
    };

    struct Slow {
        stream: bool,
    }

    impl Handler for Slow {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                assert!(ctx.items().contains::<RequestStart>());
                tokio::time::sleep(Duration::from_millis(5)).await;
                if self.stream {
                    ctx.response_mut().write("chunk")?;
                } else {
                    ctx.response_mut().text(StatusCode::Ok, "done")?;
                }
                Ok(())
            })
        }
    }

    struct Broken;

    impl Handler for Broken {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async { Err(PipelineError::Validation("nope".into())) })
        }
    }

    async fn run(timing: Timing, handler: &dyn Handler) -> (RequestContext, Outcome) {
        let stages: Vec<SharedMiddleware> = vec![Arc::new(timing)];
        let mut ctx = RequestContext::new(Request::builder().build());
        let outcome = Next::new(&stages, handler).run(&mut ctx).await;
        (ctx, outcome)
    }

    #[tokio::test]
    async fn sets_header_when_headers_mutable() {
        let (ctx, outcome) = run(Timing::new(), &Slow { stream: false }).await;
        outcome.unwrap();
        let value = ctx.response().headers().get("x-response-time").unwrap();
        assert!(value.ends_with("ms"));
        let millis: f64 = value.trim_end_matches("ms").parse().unwrap();
        assert!(millis >= 5.0);
    }

    #[tokio::test]
    async fn logs_instead_when_streaming() {
        let (ctx, outcome) = run(Timing::new(), &Slow { stream: true }).await;
        outcome.unwrap();
        assert!(!ctx.response().headers().contains("x-response-time"));
    }

    #[tokio::test]
    async fn records_even_when_downstream_fails() {
        let (ctx, outcome) = run(Timing::new().header("Server-Timing"), &Broken).await;
        assert!(matches!(outcome, Err(PipelineError::Validation(_))));
        assert!(ctx.response().headers().contains("server-timing"));
    }

    #[test]
    fn formats_milliseconds() {
        assert_eq!(format_elapsed(Duration::from_micros(1500)), "1.500ms");
    }
}
