use crate::{
    api::{
        self,
        registry_service_server::{RegistryService, RegistryServiceServer},
    },
    caller, convert, error,
    metrics::RpcMetrics,
    unary, ServerConfig,
};
use loco_control_plane_core::registry::RegistryTokens;
use loco_control_plane_deploy::Deployer;
use loco_control_plane_k8s_api::Cluster;

const SERVICE: &str = "loco.v1.RegistryService";

/// Hands clients short-lived credentials for pushing to the registry.
#[derive(Debug)]
pub struct RegistryServer<C, R> {
    deployer: Deployer<C, R>,
    metrics: RpcMetrics,
    config: ServerConfig,
}

// === impl RegistryServer ===

impl<C, R> RegistryServer<C, R>
where
    C: Cluster,
    R: RegistryTokens,
{
    pub fn new(deployer: Deployer<C, R>, metrics: RpcMetrics, config: ServerConfig) -> Self {
        Self {
            deployer,
            metrics,
            config,
        }
    }

    pub fn svc(self) -> RegistryServiceServer<Self> {
        RegistryServiceServer::new(self)
    }
}

#[async_trait::async_trait]
impl<C, R> RegistryService for RegistryServer<C, R>
where
    C: Cluster,
    R: RegistryTokens,
{
    async fn registry_token(
        &self,
        req: tonic::Request<api::RegistryTokenRequest>,
    ) -> Result<tonic::Response<api::RegistryTokenResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "RegistryToken"),
            self.config.unary_timeout,
            async move {
                let owner = caller(&req)?;
                let token = self
                    .deployer
                    .registry_token(&owner)
                    .await
                    .map_err(error::status)?;
                tracing::debug!(username = %token.username, "Minted registry token");
                Ok(convert::registry_token(self.deployer.registry_url(), token))
            },
        )
        .await
    }
}
