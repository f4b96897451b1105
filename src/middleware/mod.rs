//! Middleware: composable before/after request handler logic.
//!
//! Each middleware wraps the remainder of the chain. It receives the shared
//! [`RequestContext`] and a [`Next`] cursor; whatever it does before calling
//! [`Next::run`] sees the request before downstream middleware touch it, and
//! whatever it does afterwards sees the response they produced.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; call [`Next::run`] at most once.
//! - [`Handler`] — the terminal handler at the centre of the chain.
//! - [`from_fn`] / [`handler_fn`] — adapt closures to the two traits.
//!
//! ## Built-ins
//!
//! - [`ExceptionBoundary`] — maps errors to status codes.
//! - [`Timing`] — measures downstream latency.
//! - [`HealthCheck`] — answers liveness checks without running the chain.
//! - [`RequestIdHeader`] — echoes the correlation id.
//! - [`ConcurrencyLimit`] — sheds load with `503` when saturated.
//! - [`Branch`] — the stage [`PipelineBuilder::use_when`] compiles to.
//!
//! [`PipelineBuilder::use_when`]: crate::pipeline::PipelineBuilder::use_when

mod boundary;
mod branch;
mod health;
mod limit;
mod request_id;
mod timing;

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    context::RequestContext,
    error::{PipelineError, ProtocolViolation},
};

pub use boundary::ExceptionBoundary;
pub use branch::Branch;
pub use health::HealthCheck;
pub use limit::ConcurrencyLimit;
pub use request_id::RequestIdHeader;
pub use timing::{RequestStart, Timing};

/// A boxed, `Send` future borrowing from the request it works on.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What every middleware and handler resolves to.
pub type Outcome = Result<(), PipelineError>;

/// A reference-counted, type-erased middleware as stored in a compiled pipeline.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// The core trait for all middleware.
///
/// Implementors receive the [`RequestContext`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: `next.run(ctx).await`.
/// - **Short-circuit**: write the response and return without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, then adjust the response while
///   its headers are still mutable.
///
/// # Contract
///
/// - `next.run` may be called at most once; a second call fails with
///   [`ProtocolViolation::NextCalledTwice`] and runs nothing downstream.
/// - A short-circuiting middleware is responsible for leaving a complete response.
/// - Implementations must be `Send + Sync`: one instance serves every concurrent
///   request through the pipeline.
/// - State that has to survive an `.await` lives in `ctx.items_mut()` or in the
///   future itself, never in thread-locals.
///
/// # Examples
///
/// ```rust
/// use onionpipe::{
///     context::RequestContext,
///     middleware::{BoxFuture, Middleware, Next, Outcome},
/// };
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle<'a>(
///         &'a self,
///         ctx: &'a mut RequestContext,
///         mut next: Next<'a>,
///     ) -> BoxFuture<'a, Outcome> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and protocol-violation reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Handle the request and optionally delegate to the rest of the chain.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome>;
}

/// The innermost handler of a pipeline, supplied by the router or application.
///
/// It runs at most once per request, and only if every middleware before it
/// called `next`.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome>;
}

enum Tail<'a> {
    Terminal(&'a dyn Handler),
    // The rest of an enclosing chain, resumed once a branch's stages run out.
    Resume(Box<Next<'a>>),
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` borrows the compiled stage slice of its pipeline and advances an
/// index into it instead of nesting closures. It owns the tail of the chain:
/// the first [`run`](Self::run) hands it on, so a second `run` has nothing left
/// to run and reports a protocol violation.
pub struct Next<'a> {
    stages: &'a [SharedMiddleware],
    tail: Option<Tail<'a>>,
    // The middleware this cursor was handed to, for violation reports.
    owner: &'static str,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [SharedMiddleware], terminal: &'a dyn Handler) -> Self {
        Self {
            stages,
            tail: Some(Tail::Terminal(terminal)),
            owner: "pipeline",
        }
    }

    /// Runs `stages` first and continues with `self` once they are exhausted.
    pub(crate) fn branch(self, stages: &'a [SharedMiddleware]) -> Self {
        let owner = self.owner;
        Self {
            stages,
            tail: Some(Tail::Resume(Box::new(self))),
            owner,
        }
    }

    /// Returns `true` until [`run`](Self::run) has been called.
    pub fn is_pending(&self) -> bool {
        self.tail.is_some()
    }

    /// Invokes the remainder of the chain.
    ///
    /// Resolves only after every downstream middleware (and the terminal
    /// handler, if reached) finished, including their post-processing.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::NextCalledTwice`] on a second call;
    /// - [`ProtocolViolation::NextAfterCompleted`] if the response was already
    ///   completed with [`RequestContext::complete`];
    /// - [`ProtocolViolation::HeadersAlreadySent`] or
    ///   [`ProtocolViolation::WriteAfterCompleted`] naming the stage that
    ///   touched the response out of turn;
    /// - anything a downstream middleware or the handler returned.
    pub fn run<'b>(&'b mut self, ctx: &'b mut RequestContext) -> BoxFuture<'b, Outcome> {
        Box::pin(async move {
            let owner = self.owner;
            let Some(tail) = self.tail.take() else {
                tracing::error!(middleware = owner, "next() invoked more than once");
                return Err(ProtocolViolation::NextCalledTwice { middleware: owner }.into());
            };
            if ctx.is_completed() {
                tracing::error!(middleware = owner, "next() invoked after completion");
                return Err(ProtocolViolation::NextAfterCompleted { middleware: owner }.into());
            }

            match self.stages.split_first() {
                Some((stage, rest)) => {
                    let next = Next {
                        stages: rest,
                        tail: Some(tail),
                        owner: stage.name(),
                    };
                    attribute(stage.handle(ctx, next).await, stage.name())
                }
                None => match tail {
                    Tail::Terminal(handler) => attribute(handler.call(ctx).await, TERMINAL),
                    Tail::Resume(mut outer) => outer.run(ctx).await,
                },
            }
        })
    }
}

// Name reported for violations raised by the terminal handler.
const TERMINAL: &str = "handler";

fn attribute(outcome: Outcome, middleware: &'static str) -> Outcome {
    match outcome {
        Err(PipelineError::Protocol(violation)) if violation.middleware().is_none() => {
            let violation = violation.attribute(middleware);
            tracing::error!(middleware, %violation, "response mutated out of turn");
            Err(violation.into())
        }
        other => other,
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stages.len())
            .field("pending", &self.is_pending())
            .field("owner", &self.owner)
            .finish()
    }
}

struct FnMiddleware<F> {
    name: &'static str,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        (self.f)(ctx, next)
    }
}

/// Wraps a closure as a named [`Middleware`].
///
/// # Examples
///
/// ```rust
/// use onionpipe::middleware::from_fn;
///
/// let tag = from_fn("tag", |ctx, mut next| {
///     Box::pin(async move {
///         next.run(ctx).await?;
///         ctx.response_mut().insert_header("X-Tagged", "1")?;
///         Ok(())
///     })
/// });
/// ```
pub fn from_fn<F>(name: &'static str, f: F) -> impl Middleware
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware { name, f }
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        (self.0)(ctx)
    }
}

/// Wraps a closure as a terminal [`Handler`].
///
/// # Examples
///
/// ```rust
/// use onionpipe::{http::StatusCode, middleware::handler_fn};
///
/// let echo = handler_fn(|ctx| {
///     Box::pin(async move {
///         ctx.response_mut().text(StatusCode::Ok, "ok")?;
///         Ok(())
///     })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> impl Handler
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
{
    FnHandler(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, StatusCode};

    struct Ok200;

    impl Handler for Ok200 {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                ctx.response_mut().text(StatusCode::Ok, "ok")?;
                Ok(())
            })
        }
    }

    struct Twice;

    impl Middleware for Twice {
        fn name(&self) -> &'static str {
            "twice"
        }

        fn handle<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            mut next: Next<'a>,
        ) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                next.run(ctx).await?;
                next.run(ctx).await
            })
        }
    }

    #[tokio::test]
    async fn empty_chain_reaches_the_handler() {
        let mut ctx = RequestContext::new(Request::builder().build());
        let mut next = Next::new(&[], &Ok200);
        next.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().status(), Some(StatusCode::Ok));
        assert!(!next.is_pending());
    }

    #[tokio::test]
    async fn second_run_names_the_offender() {
        let stages: Vec<SharedMiddleware> = vec![Arc::new(Twice)];
        let mut ctx = RequestContext::new(Request::builder().build());
        let err = Next::new(&stages, &Ok200).run(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolViolation::NextCalledTwice { middleware: "twice" })
        ));
    }

    #[tokio::test]
    async fn run_after_complete_is_rejected() {
        let complete_then_next = from_fn("eager", |ctx, mut next| {
            Box::pin(async move {
                ctx.response_mut().text(StatusCode::Accepted, "done")?;
                ctx.complete();
                next.run(ctx).await
            })
        });
        let stages: Vec<SharedMiddleware> = vec![Arc::new(complete_then_next)];
        let mut ctx = RequestContext::new(Request::builder().build());
        let err = Next::new(&stages, &Ok200).run(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolViolation::NextAfterCompleted { middleware: "eager" })
        ));
        assert_eq!(ctx.response().status(), Some(StatusCode::Accepted));
    }

    #[tokio::test]
    async fn late_header_names_the_stage() {
        let late_header = from_fn("late_header", |ctx, mut next| {
            Box::pin(async move {
                next.run(ctx).await?;
                ctx.response_mut().insert_header("X-Late", "1")?;
                Ok(())
            })
        });
        let streams = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().write("body")?;
                Ok(())
            })
        });
        let stages: Vec<SharedMiddleware> = vec![Arc::new(late_header)];
        let mut ctx = RequestContext::new(Request::builder().build());
        let err = Next::new(&stages, &streams).run(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolViolation::HeadersAlreadySent {
                middleware: "late_header"
            })
        ));
    }

    #[tokio::test]
    async fn terminal_violations_name_the_handler() {
        let writes_after_complete = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().text(StatusCode::Ok, "done")?;
                ctx.complete();
                ctx.response_mut().write("more")?;
                Ok(())
            })
        });
        let mut ctx = RequestContext::new(Request::builder().build());
        let err = Next::new(&[], &writes_after_complete)
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolViolation::WriteAfterCompleted {
                middleware: "handler"
            })
        ));
        assert_eq!(&ctx.response().body()[..], b"done");
    }

    #[tokio::test]
    async fn handler_fn_runs() {
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().text(StatusCode::Created, "made")?;
                Ok(())
            })
        });
        let mut ctx = RequestContext::new(Request::builder().build());
        handler.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().status(), Some(StatusCode::Created));
    }
}
