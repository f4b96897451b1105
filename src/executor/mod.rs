//! Request executor: the outermost boundary between a transport and a
//! [`Pipeline`].
//!
//! For every request the executor
//!
//! 1. builds a fresh [`RequestContext`] linked to the caller's cancellation
//!    token and to the executor's own shutdown signal,
//! 2. runs the pipeline on its own task inside a `request` tracing span,
//! 3. turns whatever comes back into either a [`Response`] or an
//!    [`ExecuteError`].
//!
//! Failures nobody handled become a generic `500`, unless the headers were
//! already sent, in which case the connection is reported as aborted. Protocol
//! violations and cancellations never produce a crafted response.

mod config;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::Notify, task::JoinError, time::Instant};
use tracing::Instrument;

pub use config::ExecutorConfig;

use crate::{
    context::{
        RequestContext,
        cancel::{CancellationSource, CancellationToken},
    },
    error::{PipelineError, ProtocolViolation},
    http::{Request, Response, StatusCode},
    middleware::Outcome,
    pipeline::Pipeline,
};

/// Why an execution produced no response.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// A middleware broke the pipeline contract. This is a bug in the
    /// middleware, not in the request.
    #[error("protocol violation: {0}")]
    Protocol(ProtocolViolation),

    /// The request was cancelled; no response should be delivered.
    #[error("request abandoned after cancellation")]
    Abandoned,

    /// The request ran longer than the configured timeout and was cancelled.
    #[error("request exceeded its {0:?} timeout")]
    TimedOut(Duration),

    /// The pipeline failed after the headers were sent. The transport should
    /// drop the connection.
    #[error("response failed after headers were sent: {reason}")]
    ConnectionAborted { reason: String },

    /// [`Executor::shutdown`] was called; new requests are refused.
    #[error("executor is shutting down")]
    ShuttingDown,
}

/// What [`Executor::shutdown`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Requests still running when the grace period ran out. They were
    /// cancelled.
    pub forced: usize,
}

impl ShutdownReport {
    /// `true` if every in-flight request finished on its own.
    pub fn is_clean(&self) -> bool {
        self.forced == 0
    }
}

#[derive(Debug)]
struct State {
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    force: CancellationSource,
}

impl State {
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlight(Arc<State>);

impl InFlight {
    fn enter(state: &Arc<State>) -> Option<Self> {
        state.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = Self(Arc::clone(state));
        // Checked after the increment so shutdown can never observe zero while
        // a request is slipping in.
        state.accepting.load(Ordering::SeqCst).then_some(guard)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs requests through pipelines and owns their lifecycle.
///
/// Cloning is cheap; clones share in-flight accounting and shutdown state.
///
/// # Examples
///
/// ```rust
/// use onionpipe::{
///     executor::Executor,
///     http::{Request, StatusCode},
///     middleware::handler_fn,
///     pipeline::PipelineBuilder,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = PipelineBuilder::new().build(handler_fn(|ctx| {
///     Box::pin(async move {
///         ctx.response_mut().text(StatusCode::Ok, "hello")?;
///         Ok(())
///     })
/// }))?;
///
/// let executor = Executor::default();
/// let response = executor.execute(&pipeline, Request::builder().uri("/").build()).await?;
/// assert_eq!(response.status(), Some(StatusCode::Ok));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Executor {
    config: Arc<ExecutorConfig>,
    state: Arc<State>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(State {
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                force: CancellationSource::new(),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Requests currently running.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// `false` once [`shutdown`](Self::shutdown) was called.
    pub fn is_accepting(&self) -> bool {
        self.state.accepting.load(Ordering::SeqCst)
    }

    /// Executes `request` with no external cancellation.
    ///
    /// # Errors
    ///
    /// See [`execute_with`](Self::execute_with).
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        request: Request,
    ) -> Result<Response, ExecuteError> {
        self.execute_with(pipeline, request, CancellationToken::never())
            .await
    }

    /// Executes `request`, abandoning it if `cancellation` fires.
    ///
    /// The pipeline runs on its own task, so a panicking middleware never takes
    /// the caller down. When the request is abandoned or times out the task is
    /// detached rather than aborted: middleware observe the fired token and
    /// unwind at their next await point.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::ShuttingDown`] after [`shutdown`](Self::shutdown);
    /// - [`ExecuteError::Abandoned`] if the request was cancelled, including a
    ///   token that had already fired, in which case no middleware runs;
    /// - [`ExecuteError::TimedOut`] if the configured timeout elapsed;
    /// - [`ExecuteError::Protocol`] if a middleware broke the pipeline contract;
    /// - [`ExecuteError::ConnectionAborted`] if the pipeline failed after the
    ///   headers were sent.
    pub async fn execute_with(
        &self,
        pipeline: &Pipeline,
        request: Request,
        cancellation: CancellationToken,
    ) -> Result<Response, ExecuteError> {
        let Some(guard) = InFlight::enter(&self.state) else {
            tracing::debug!(path = request.path(), "request refused during shutdown");
            return Err(ExecuteError::ShuttingDown);
        };

        let source = CancellationSource::linked([cancellation, self.state.force.token()]);
        let token = source.token();
        if token.is_cancelled() {
            tracing::debug!(path = request.path(), "request cancelled before dispatch");
            return Err(ExecuteError::Abandoned);
        }
        let ctx = RequestContext::with_cancellation(request, source.token());
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.request().method(),
            path = ctx.request().path(),
        );
        let started = ctx.response().started_flag();
        let begun = Instant::now();

        let pipeline = pipeline.clone();
        let mut task = tokio::spawn(
            async move {
                let _guard = guard;
                let mut ctx = ctx;
                let outcome = pipeline.dispatch(&mut ctx).await;
                (ctx, outcome)
            }
            .instrument(span.clone()),
        );

        let joined = async {
            tokio::select! {
                biased;
                joined = &mut task => Some(joined),
                () = token.cancelled() => None,
            }
        };
        let joined = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, joined).await {
                Ok(joined) => joined,
                Err(_) => {
                    source.cancel();
                    span.in_scope(|| tracing::warn!(timeout = ?limit, "request timed out"));
                    return Err(ExecuteError::TimedOut(limit));
                }
            },
            None => joined.await,
        };

        span.in_scope(|| {
            let Some(joined) = joined else {
                tracing::info!("request cancelled; response abandoned");
                return Err(ExecuteError::Abandoned);
            };

            let result = self.settle(joined, started.load(Ordering::Acquire));
            match &result {
                Ok(response) => tracing::info!(
                    status = response.status().map(StatusCode::as_u16),
                    elapsed = ?begun.elapsed(),
                    "request completed"
                ),
                Err(err) => {
                    tracing::warn!(error = %err, elapsed = ?begun.elapsed(), "request failed");
                }
            }
            result
        })
    }

    /// Stops accepting requests and waits for in-flight ones to finish.
    ///
    /// Requests still running after the configured grace period are
    /// cancelled; the report says how many.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.state.accepting.store(false, Ordering::SeqCst);
        let grace = self.config.shutdown_grace();
        tracing::info!(in_flight = self.in_flight(), ?grace, "executor shutting down");

        if tokio::time::timeout(grace, self.state.wait_idle()).await.is_ok() {
            tracing::info!("all in-flight requests drained");
            return ShutdownReport { forced: 0 };
        }

        let forced = self.in_flight();
        tracing::warn!(forced, "grace period elapsed; cancelling in-flight requests");
        self.state.force.cancel();
        ShutdownReport { forced }
    }

    fn settle(
        &self,
        joined: Result<(RequestContext, Outcome), JoinError>,
        headers_sent: bool,
    ) -> Result<Response, ExecuteError> {
        let (mut ctx, outcome) = match joined {
            Ok(parts) => parts,
            Err(err) if err.is_panic() => {
                tracing::error!("pipeline panicked");
                if headers_sent {
                    return Err(ExecuteError::ConnectionAborted {
                        reason: "pipeline panicked".to_owned(),
                    });
                }
                return Ok(self.internal_error("pipeline panicked"));
            }
            Err(_) => return Err(ExecuteError::Abandoned),
        };

        match outcome {
            Ok(()) if ctx.is_cancelled() => Err(ExecuteError::Abandoned),
            Ok(()) if ctx.response().status().is_none() => {
                tracing::error!("pipeline finished without setting a response status");
                Ok(self.internal_error("no response status was set"))
            }
            Ok(()) => {
                ctx.complete();
                Ok(ctx.into_response())
            }
            Err(PipelineError::Protocol(violation)) => {
                tracing::error!(%violation, "middleware protocol violation");
                Err(ExecuteError::Protocol(violation))
            }
            Err(PipelineError::Cancelled) => Err(ExecuteError::Abandoned),
            Err(_) if ctx.is_cancelled() => Err(ExecuteError::Abandoned),
            Err(err) if ctx.response().has_started() => {
                tracing::error!(error = %err, "pipeline failed after headers were sent");
                Err(ExecuteError::ConnectionAborted {
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                tracing::error!(error = %err, "unhandled pipeline error");
                Ok(self.internal_error(&err.to_string()))
            }
        }
    }

    fn internal_error(&self, detail: &str) -> Response {
        let body = if self.config.expose_error_details {
            format!("Internal Server Error: {detail}")
        } else {
            "Internal Server Error".to_owned()
        };
        Response::plain(StatusCode::InternalServerError, &body)
    }
}
