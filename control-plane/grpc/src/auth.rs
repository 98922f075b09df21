//! Authenticates every request by its bearer token.

use crate::error;
use dashmap::DashMap;
use futures::future::BoxFuture;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderMap, HeaderValue, Request, Response,
};
use loco_control_plane_core::identity::IdentityProvider;
use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Procedures served without a bearer token.
const PUBLIC_PREFIXES: &[&str] = &["/loco.v1.OAuthService/", "/grpc.reflection."];

/// Cached identities expire this long before the platform stops honoring
/// their tokens.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Expired entries are pruned once the cache grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// The authenticated caller, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User(pub String);

/// Maps bearer tokens to the users they were issued to.
///
/// Entries are sharded so concurrent requests with different tokens don't
/// contend on one lock.
#[derive(Debug)]
pub struct IdentityCache {
    ttl: Duration,
    entries: DashMap<String, Entry, ahash::RandomState>,
}

#[derive(Debug)]
struct Entry {
    username: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct AuthLayer<P> {
    provider: Arc<P>,
    cache: Arc<IdentityCache>,
}

#[derive(Debug)]
pub struct Auth<S, P> {
    inner: S,
    provider: Arc<P>,
    cache: Arc<IdentityCache>,
}

// === impl IdentityCache ===

impl IdentityCache {
    /// Caches identities for tokens the platform honors for `token_ttl`.
    pub fn new(token_ttl: Duration) -> Self {
        Self {
            ttl: token_ttl.saturating_sub(SAFETY_MARGIN),
            entries: Default::default(),
        }
    }

    pub fn get(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(token) {
            Some(entry) if entry.expires_at > now => return Some(entry.username.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // A concurrent insert may have refreshed the entry.
            self.entries.remove_if(token, |_, e| e.expires_at <= now);
        }
        None
    }

    /// Caches `username` for the shorter of the cache's TTL and the
    /// provider's own expiry.
    pub fn insert(&self, token: &str, username: &str, expires_in: Option<Duration>) {
        let ttl = expires_in.map_or(self.ttl, |e| e.min(self.ttl));
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        if self.entries.len() >= PRUNE_THRESHOLD {
            self.entries.retain(|_, e| e.expires_at > now);
        }
        self.entries.insert(
            token.to_string(),
            Entry {
                username: username.to_string(),
                expires_at: now + ttl,
            },
        );
    }
}

// === impl AuthLayer ===

impl<P> AuthLayer<P> {
    pub fn new(provider: Arc<P>, cache: Arc<IdentityCache>) -> Self {
        Self { provider, cache }
    }
}

impl<P> Clone for AuthLayer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S, P> tower::Layer<S> for AuthLayer<P> {
    type Service = Auth<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        Auth {
            inner,
            provider: self.provider.clone(),
            cache: self.cache.clone(),
        }
    }
}

// === impl Auth ===

impl<S: Clone, P> Clone for Auth<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            provider: self.provider.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S, P, B, RB> tower::Service<Request<B>> for Auth<S, P>
where
    S: tower::Service<Request<B>, Response = Response<RB>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    P: IdentityProvider,
    B: Send + 'static,
    RB: Default + Send + 'static,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<RB>, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Use the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if is_public(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let Some(token) = bearer(req.headers()).map(str::to_string) else {
            return Box::pin(futures::future::ok(reject(tonic::Status::unauthenticated(
                "missing or malformed bearer token",
            ))));
        };

        let provider = self.provider.clone();
        let cache = self.cache.clone();
        Box::pin(async move {
            let username = match cache.get(&token) {
                Some(username) => username,
                None => match provider.identify(&token).await {
                    Ok(identity) => {
                        cache.insert(&token, &identity.username, identity.expires_in);
                        identity.username
                    }
                    Err(error) => return Ok(reject(error::identity_status(error))),
                },
            };

            tracing::Span::current().record("user", username.as_str());
            req.extensions_mut().insert(User(username));
            inner.call(req).await
        })
    }
}

fn is_public(path: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// A trailers-only gRPC response carrying `status`.
fn reject<B: Default>(status: tonic::Status) -> Response<B> {
    let mut rsp = Response::new(B::default());
    rsp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if let Err(error) = status.add_header(rsp.headers_mut()) {
        tracing::warn!(%error, "Failed to encode status");
    }
    rsp
}
