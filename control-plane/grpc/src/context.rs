//! Tags every request with an id and a span that carries it.

use futures::{future::BoxFuture, FutureExt};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug, Default)]
pub struct ContextLayer(());

#[derive(Clone, Debug)]
pub struct RequestContext<S> {
    inner: S,
}

/// The id assigned to a request, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

// === impl ContextLayer ===

impl ContextLayer {
    pub fn new() -> Self {
        Self(())
    }
}

impl<S> tower::Layer<S> for ContextLayer {
    type Service = RequestContext<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContext { inner }
    }
}

// === impl RequestContext ===

impl<S, B, RB> tower::Service<Request<B>> for RequestContext<S>
where
    S: tower::Service<Request<B>, Response = Response<RB>>,
    S::Future: Send + 'static,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<RB>, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let id = uuid::Uuid::new_v4().to_string();
        let source_ip = req
            .extensions()
            .get::<tonic::transport::server::TcpConnectInfo>()
            .and_then(|info| info.remote_addr())
            .map(|addr| addr.ip());
        let span = tracing::info_span!(
            "rpc",
            request_id = %id,
            source_ip = ?source_ip,
            method = %req.method(),
            path = %req.uri().path(),
            user = tracing::field::Empty,
        );
        req.extensions_mut().insert(RequestId(id.clone()));

        let header = HeaderValue::try_from(id).ok();
        let call = span.in_scope(|| self.inner.call(req));
        call.map(move |res| {
            res.map(|mut rsp| {
                if let Some(id) = header {
                    rsp.headers_mut().insert(REQUEST_ID_HEADER, id);
                }
                rsp
            })
        })
        .instrument(span)
        .boxed()
    }
}
