//! Pipeline builder and the compiled, immutable pipeline.
//!
//! [`PipelineBuilder`] records registrations in order. [`PipelineBuilder::build`]
//! freezes them, together with a terminal [`Handler`], into a [`Pipeline`]:
//! a flat slice of stages that a [`Next`] cursor walks by index. Conditional
//! registrations become a single [`Branch`] stage carrying its own sub-slice.
//!
//! Once built, a pipeline is never mutated: clones share the same stages and
//! any number of requests may run through it concurrently.

use std::sync::Arc;

use crate::{
    context::RequestContext,
    error::BuilderError,
    middleware::{Branch, BoxFuture, Handler, Middleware, Next, Outcome, SharedMiddleware},
};

/// Accumulates middleware registrations and compiles them into a [`Pipeline`].
///
/// # Examples
///
/// ```rust
/// use onionpipe::{
///     http::StatusCode,
///     middleware::{ExceptionBoundary, HealthCheck, Timing, handler_fn},
///     pipeline::PipelineBuilder,
/// };
///
/// # fn main() -> Result<(), onionpipe::error::BuilderError> {
/// let mut builder = PipelineBuilder::new();
/// builder
///     .use_middleware(Timing::new())?
///     .use_middleware(ExceptionBoundary::new())?
///     .use_when(
///         |ctx| ctx.request().path().starts_with("/internal"),
///         |internal| {
///             internal.use_middleware(HealthCheck::at("/internal/health"))?;
///             Ok(())
///         },
///     )?;
///
/// let pipeline = builder.build(handler_fn(|ctx| {
///     Box::pin(async move {
///         ctx.response_mut().text(StatusCode::Ok, "ok")?;
///         Ok(())
///     })
/// }))?;
/// assert_eq!(pipeline.len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<SharedMiddleware>,
    built: bool,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the registration sequence.
    ///
    /// # Errors
    ///
    /// [`BuilderError::AlreadyBuilt`] once [`build`](Self::build) was called.
    pub fn use_middleware<M>(&mut self, middleware: M) -> Result<&mut Self, BuilderError>
    where
        M: Middleware,
    {
        self.use_shared(Arc::new(middleware))
    }

    /// Appends an already shared middleware, e.g. one instance used by several
    /// pipelines.
    ///
    /// # Errors
    ///
    /// [`BuilderError::AlreadyBuilt`] once [`build`](Self::build) was called.
    pub fn use_shared(&mut self, middleware: SharedMiddleware) -> Result<&mut Self, BuilderError> {
        self.ensure_open()?;
        tracing::trace!(middleware = middleware.name(), "registered middleware");
        self.stages.push(middleware);
        Ok(self)
    }

    /// Registers a conditional branch.
    ///
    /// `configure` receives a fresh builder; the middleware it registers run,
    /// in order, only for requests matching `predicate`, and then continue into
    /// whatever is registered after this branch. Non-matching requests skip the
    /// branch entirely.
    ///
    /// `predicate` must be a pure function of the context: it may be evaluated
    /// any number of times.
    ///
    /// # Errors
    ///
    /// - [`BuilderError::AlreadyBuilt`] once [`build`](Self::build) was called;
    /// - whatever `configure` returns.
    pub fn use_when<P, F>(&mut self, predicate: P, configure: F) -> Result<&mut Self, BuilderError>
    where
        P: Fn(&RequestContext) -> bool + Send + Sync + 'static,
        F: FnOnce(&mut PipelineBuilder) -> Result<(), BuilderError>,
    {
        self.ensure_open()?;
        let mut sub = PipelineBuilder::new();
        configure(&mut sub)?;
        let branch = Branch::new(Arc::new(predicate), sub.stages);
        tracing::trace!(stages = ?branch.stage_names(), "registered conditional branch");
        self.stages.push(Arc::new(branch));
        Ok(self)
    }

    /// Number of top-level registrations so far (a branch counts as one).
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns `true` once [`build`](Self::build) was called.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Compiles the registrations around `terminal` into a [`Pipeline`].
    ///
    /// The builder is sealed afterwards, whether or not more registrations are
    /// attempted; pipelines it already produced are never affected.
    ///
    /// # Errors
    ///
    /// [`BuilderError::AlreadyBuilt`] on a second call.
    pub fn build<H>(&mut self, terminal: H) -> Result<Pipeline, BuilderError>
    where
        H: Handler,
    {
        self.ensure_open()?;
        self.built = true;
        let stages: Arc<[SharedMiddleware]> = std::mem::take(&mut self.stages).into();
        tracing::debug!(stages = stages.len(), "pipeline built");
        Ok(Pipeline {
            inner: Arc::new(Compiled {
                stages,
                terminal: Box::new(terminal),
            }),
        })
    }

    fn ensure_open(&self) -> Result<(), BuilderError> {
        if self.built {
            Err(BuilderError::AlreadyBuilt)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.stages.iter().map(|stage| stage.name()).collect();
        f.debug_struct("PipelineBuilder")
            .field("stages", &names)
            .field("built", &self.built)
            .finish()
    }
}

struct Compiled {
    stages: Arc<[SharedMiddleware]>,
    terminal: Box<dyn Handler>,
}

/// A compiled, immutable middleware chain anchored by a terminal handler.
///
/// Cloning is cheap and every clone runs the same stages.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Compiled>,
}

impl Pipeline {
    /// Runs `ctx` through every stage and the terminal handler.
    ///
    /// This is the raw entry continuation: it neither contains panics nor maps
    /// errors to responses. [`Executor`](crate::executor::Executor) adds those.
    pub fn dispatch<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let mut entry = Next::new(&self.inner.stages, self.inner.terminal.as_ref());
            entry.run(ctx).await
        })
    }

    /// Number of top-level stages.
    pub fn len(&self) -> usize {
        self.inner.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stages.is_empty()
    }

    /// Names of the top-level stages in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
