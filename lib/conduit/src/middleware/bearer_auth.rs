//! Bearer token authentication middleware.
//!
//! Adds an `Authorization: Bearer <token>` header to outgoing requests that do
//! not carry an `Authorization` header yet.

use std::sync::Arc;

use conduit_core::{BoxFuture, Context, Middleware, Next, Result};

/// Middleware that adds bearer token authentication to requests.
#[derive(Clone)]
pub struct BearerAuth {
    token: Arc<str>,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl BearerAuth {
    /// Create a bearer auth middleware with the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }
}

impl Middleware<Context> for BearerAuth {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a, Context>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let has_auth = ctx
                .request
                .headers()
                .keys()
                .any(|name| name.eq_ignore_ascii_case("authorization"));

            if !has_auth {
                let request = std::mem::take(&mut ctx.request);
                ctx.request = request
                    .into_builder()
                    .header("Authorization", format!("Bearer {}", self.token))
                    .build();
            }

            next.run(ctx).await
        })
    }
}
