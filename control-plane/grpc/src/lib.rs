#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod app;
mod auth;
mod context;
mod convert;
mod deploy;
mod error;
pub mod metrics;
mod oauth;
mod registry;

pub use self::{
    app::AppServer,
    auth::{AuthLayer, IdentityCache, User},
    context::{ContextLayer, REQUEST_ID_HEADER},
    deploy::DeployServer,
    oauth::OAuthServer,
    registry::RegistryServer,
};

/// Generated protobuf types and service stubs.
pub mod api {
    #![allow(clippy::all)]
    tonic::include_proto!("loco.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("loco_descriptor");
}

use self::metrics::Rpc;
use std::{future::Future, time::Duration};

/// Settings shared by every service.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Deadline applied to unary handlers.
    pub unary_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            unary_timeout: Duration::from_secs(30),
        }
    }
}

/// Serves gRPC reflection for the platform's services.
pub fn reflection() -> Result<
    tonic_reflection::server::v1::ServerReflectionServer<
        impl tonic_reflection::server::v1::ServerReflection,
    >,
    tonic_reflection::server::Error,
> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(api::FILE_DESCRIPTOR_SET)
        .build_v1()
}

/// The authenticated caller of `req`.
pub(crate) fn caller<T>(req: &tonic::Request<T>) -> Result<String, tonic::Status> {
    req.extensions()
        .get::<User>()
        .map(|User(name)| name.clone())
        .ok_or_else(|| tonic::Status::unauthenticated("request is not authenticated"))
}

/// Runs a unary handler under the request deadline and records its outcome.
pub(crate) async fn unary<T>(
    rpc: Rpc,
    timeout: Duration,
    handle: impl Future<Output = Result<T, tonic::Status>>,
) -> Result<tonic::Response<T>, tonic::Status> {
    let call = rpc.start();
    let res = tokio::time::timeout(timeout, handle)
        .await
        .unwrap_or_else(|_| Err(error::deadline_exceeded()));
    call.end_with(&res);
    res.map(tonic::Response::new)
}
