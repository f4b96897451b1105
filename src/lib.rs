//! # onionpipe
//!
//! A composable async middleware pipeline and request-dispatch engine for HTTP
//! services.
//!
//! Middleware are registered in order on a [`PipelineBuilder`], compiled
//! around a terminal [`Handler`] into an immutable [`Pipeline`], and run per
//! request by an [`Executor`]. Each middleware sees the request on the way in
//! and the response on the way out, and may short-circuit by not calling
//! [`Next::run`].
//!
//! ## Quick Start
//!
//! ```rust
//! use onionpipe::{
//!     Executor, PipelineBuilder, Request, StatusCode,
//!     middleware::{ExceptionBoundary, HealthCheck, Timing, handler_fn},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = PipelineBuilder::new();
//!     builder
//!         .use_middleware(Timing::new())?
//!         .use_middleware(ExceptionBoundary::new())?
//!         .use_middleware(HealthCheck::new())?;
//!
//!     let pipeline = builder.build(handler_fn(|ctx| {
//!         Box::pin(async move {
//!             let greeting = format!("Hello from {}", ctx.request().path());
//!             ctx.response_mut().text(StatusCode::Ok, greeting)?;
//!             Ok(())
//!         })
//!     }))?;
//!
//!     let executor = Executor::default();
//!     let response = executor
//!         .execute(&pipeline, Request::builder().uri("/world").build())
//!         .await?;
//!
//!     assert_eq!(response.status(), Some(StatusCode::Ok));
//!     assert!(response.headers().contains("X-Response-Time"));
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod executor;
pub mod http;
pub mod middleware;
pub mod pipeline;
pub mod security;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::RequestContext;
pub use error::{BuilderError, PipelineError};
pub use executor::{ExecuteError, Executor, ExecutorConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Handler, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
