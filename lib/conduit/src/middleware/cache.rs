//! In-memory response cache for GET requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use conduit_core::{BoxFuture, Context, Method, Middleware, Next, Response, Result};
use tokio::time::Instant;

struct Entry {
    response: Response,
    expires_at: Instant,
}

/// Middleware serving repeated GET requests from memory.
///
/// The key is the method plus the resolved URL with its query. Only 2xx
/// responses are stored, and an entry is served until `ttl` elapses. A hit
/// short-circuits the rest of the pipeline; the cached response is
/// re-attached to the current request.
#[derive(Clone)]
pub struct Cache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl Cache {
    /// Create a cache keeping entries for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::default(),
        }
    }

    /// Number of stored entries.
    ///
    /// Expired entries are dropped on the next store, so this may still count
    /// some that can no longer be served.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<Response> {
        let mut entries = self.lock();
        let fresh = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now());
        if fresh {
            entries.get(key).map(|entry| entry.response.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    fn store(&self, key: String, response: Response) {
        let now = Instant::now();
        let entry = Entry {
            response,
            expires_at: now + self.ttl,
        };
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key, entry);
    }
}

impl Middleware<Context> for Cache {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a, Context>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.request.method() != Method::Get {
                return next.run(ctx).await;
            }

            let key = ctx.request.cache_key();
            if let Some(cached) = self.lookup(&key) {
                tracing::debug!(%key, "cache hit");
                ctx.response = Some(Response::new(
                    cached.status(),
                    cached.status_text(),
                    cached.headers().clone(),
                    cached.body().clone(),
                    Arc::new(ctx.request.clone()),
                ));
                return Ok(());
            }

            next.run(ctx).await?;

            if let Some(response) = &ctx.response
                && response.is_success()
            {
                tracing::trace!(%key, "cache store");
                self.store(key, response.clone());
            }
            Ok(())
        })
    }
}
