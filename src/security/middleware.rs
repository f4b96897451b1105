//! Authentication middleware built on a pluggable [`Authenticator`].
//!
//! The pipeline does not decide who a caller is; it only fixes the shape of
//! that decision. An [`Authenticator`] inspects the request and yields a
//! [`Principal`] or nothing. [`AuthMiddleware`] turns "nothing" into a
//! `401 Unauthorized` short-circuit and otherwise stores the principal in the
//! item bag for downstream middleware and the handler.

use std::sync::Arc;

use crate::{
    context::RequestContext,
    error::PipelineError,
    http::{Request, StatusCode},
    middleware::{BoxFuture, Middleware, Next, Outcome},
};

/// An authenticated caller, stored in the request items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Decides who the caller is.
///
/// Returning `Ok(None)` means "not authenticated" and leads to a `401`.
/// Errors (for example an unreachable identity provider) propagate like any
/// other pipeline error.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Principal>, PipelineError>>;
}

impl<A: Authenticator> Authenticator for Arc<A> {
    fn authenticate<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Principal>, PipelineError>> {
        (**self).authenticate(request)
    }
}

/// Rejects unauthenticated requests with `401` and a `WWW-Authenticate` challenge.
///
/// # Examples
///
/// ```rust
/// use onionpipe::security::{AuthMiddleware, StaticTokenAuthenticator};
///
/// let auth = AuthMiddleware::new(
///     StaticTokenAuthenticator::new().token("s3cret", "service-a"),
/// )
/// .realm("internal");
/// ```
pub struct AuthMiddleware<A> {
    authenticator: A,
    realm: String,
}

impl<A: Authenticator> AuthMiddleware<A> {
    pub fn new(authenticator: A) -> Self {
        Self {
            authenticator,
            realm: "api".to_owned(),
        }
    }

    /// Realm advertised in the `WWW-Authenticate` challenge.
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }
}

impl<A: Authenticator> Middleware for AuthMiddleware<A> {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let principal = self.authenticator.authenticate(ctx.request()).await?;
            let Some(principal) = principal else {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    path = ctx.request().path(),
                    "unauthenticated request rejected"
                );
                let response = ctx.response_mut();
                response.text(StatusCode::Unauthorized, "Unauthorized")?;
                response.insert_header(
                    "WWW-Authenticate",
                    format!("Bearer realm=\"{}\"", self.realm),
                )?;
                return Ok(());
            };

            ctx.items_mut().insert(principal);
            next.run(ctx).await
        })
    }
}

/// Bearer-token authenticator backed by a fixed token table.
///
/// Meant for service-to-service calls and tests; anything user-facing plugs in
/// its own [`Authenticator`].
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: Vec<(String, Principal)>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as the given subject.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        self.tokens.push((token.into(), Principal::new(subject)));
        self
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Principal>, PipelineError>> {
        let presented = request
            .headers()
            .get("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);
        let principal = presented.and_then(|token| {
            self.tokens
                .iter()
                .find(|(known, _)| known == token)
                .map(|(_, principal)| principal.clone())
        });
        Box::pin(async move { Ok(principal) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{SharedMiddleware, handler_fn};

    fn stages() -> Vec<SharedMiddleware> {
        vec![Arc::new(AuthMiddleware::new(
            StaticTokenAuthenticator::new().token("t0ken", "svc-billing"),
        ))]
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let handler = handler_fn(|_ctx| {
            Box::pin(async { Err(PipelineError::internal("handler must not run")) })
        });
        let stages = stages();
        let mut ctx = RequestContext::new(Request::builder().build());
        Next::new(&stages, &handler).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), Some(StatusCode::Unauthorized));
        assert_eq!(
            ctx.response().headers().get("www-authenticate"),
            Some("Bearer realm=\"api\"")
        );
    }

    #[tokio::test]
    async fn valid_token_stores_principal() {
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                let subject = ctx
                    .items()
                    .get::<Principal>()
                    .map(|p| p.subject.clone())
                    .unwrap_or_default();
                ctx.response_mut().text(StatusCode::Ok, subject)?;
                Ok(())
            })
        });
        let stages = stages();
        let request = Request::builder()
            .header("Authorization", "Bearer t0ken")
            .build();
        let mut ctx = RequestContext::new(request);
        Next::new(&stages, &handler).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), Some(StatusCode::Ok));
        assert_eq!(&ctx.response().body()[..], b"svc-billing");
    }
}
