//! Builds a small API pipeline and drives a handful of requests through it.
//!
//! ```text
//! RUST_LOG=onionpipe=debug cargo run --example pipeline_demo
//! ```

use std::time::Duration;

use onionpipe::{
    Executor, ExecutorConfig, PipelineBuilder, PipelineError, Request, StatusCode,
    middleware::{
        ConcurrencyLimit, ExceptionBoundary, HealthCheck, RequestIdHeader, Timing, handler_fn,
    },
    security::{AuthMiddleware, Principal, StaticTokenAuthenticator},
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut builder = PipelineBuilder::new();
    builder
        .use_middleware(Timing::new())?
        .use_middleware(RequestIdHeader)?
        .use_middleware(ExceptionBoundary::new())?
        .use_middleware(HealthCheck::new())?
        .use_when(
            |ctx| ctx.request().path().starts_with("/api"),
            |api| {
                api.use_middleware(ConcurrencyLimit::new(64))?
                    .use_middleware(AuthMiddleware::new(
                        StaticTokenAuthenticator::new().token("demo-token", "demo-client"),
                    ))?;
                Ok(())
            },
        )?;

    let pipeline = builder.build(handler_fn(|ctx| {
        Box::pin(async move {
            let path = ctx.request().path().to_owned();
            match path.as_str() {
                "/api/whoami" => {
                    let subject = ctx
                        .items()
                        .get::<Principal>()
                        .map(|p| p.subject.clone())
                        .unwrap_or_default();
                    ctx.response_mut()
                        .json(StatusCode::Ok, &json!({ "subject": subject }))?;
                    Ok(())
                }
                "/api/orders" => Err(PipelineError::Validation("missing `customer` field".into())),
                _ => Err(PipelineError::NotFound(path.clone())),
            }
        })
    }))?;

    let executor = Executor::new(
        ExecutorConfig::default()
            .with_request_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_secs(2)),
    );

    let requests = [
        Request::builder().uri("/healthz").build(),
        Request::builder().uri("/api/whoami").build(),
        Request::builder()
            .uri("/api/whoami")
            .header("Authorization", "Bearer demo-token")
            .build(),
        Request::builder()
            .method(onionpipe::Method::Post)
            .uri("/api/orders")
            .header("Authorization", "Bearer demo-token")
            .body("{}")
            .build(),
        Request::builder().uri("/nowhere").build(),
    ];

    for request in requests {
        let line = format!("{} {}", request.method(), request.path());
        match executor.execute(&pipeline, request).await {
            Ok(response) => {
                let status = response.status().unwrap_or(StatusCode::InternalServerError);
                println!(
                    "{line} -> {status} ({}) {}",
                    response.headers().get("X-Response-Time").unwrap_or("-"),
                    String::from_utf8_lossy(&response.body())
                );
            }
            Err(err) => println!("{line} -> no response: {err}"),
        }
    }

    let report = executor.shutdown().await;
    println!("shutdown complete, forced = {}", report.forced);
    Ok(())
}
