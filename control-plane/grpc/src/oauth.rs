use crate::{
    api::{
        self,
        o_auth_service_server::{OAuthService, OAuthServiceServer},
    },
    metrics::RpcMetrics,
    unary, ServerConfig,
};
use std::time::Duration;

const SERVICE: &str = "loco.v1.OAuthService";

/// Tells clients which OAuth app to log in with. Served without
/// authentication.
#[derive(Clone, Debug)]
pub struct OAuthServer {
    client_id: String,
    token_ttl: Duration,
    metrics: RpcMetrics,
    config: ServerConfig,
}

// === impl OAuthServer ===

impl OAuthServer {
    pub fn new(
        client_id: String,
        token_ttl: Duration,
        metrics: RpcMetrics,
        config: ServerConfig,
    ) -> Self {
        Self {
            client_id,
            token_ttl,
            metrics,
            config,
        }
    }

    pub fn svc(self) -> OAuthServiceServer<Self> {
        OAuthServiceServer::new(self)
    }
}

#[async_trait::async_trait]
impl OAuthService for OAuthServer {
    async fn discover(
        &self,
        _req: tonic::Request<api::DiscoverRequest>,
    ) -> Result<tonic::Response<api::DiscoverResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "Discover"),
            self.config.unary_timeout,
            async move {
                Ok(api::DiscoverResponse {
                    client_id: self.client_id.clone(),
                    token_ttl_seconds: self.token_ttl.as_secs() as i64,
                })
            },
        )
        .await
    }
}
