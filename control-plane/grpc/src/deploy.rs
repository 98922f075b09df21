use crate::{
    api::{
        self,
        deploy_service_server::{DeployService, DeployServiceServer},
    },
    caller, convert, error, metrics::RpcMetrics, unary, ServerConfig,
};
use loco_control_plane_core::registry::RegistryTokens;
use loco_control_plane_deploy::Deployer;
use loco_control_plane_k8s_api::Cluster;

const SERVICE: &str = "loco.v1.DeployService";

#[derive(Debug)]
pub struct DeployServer<C, R> {
    deployer: Deployer<C, R>,
    metrics: RpcMetrics,
    config: ServerConfig,
}

// === impl DeployServer ===

impl<C, R> DeployServer<C, R>
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

    pub fn svc(self) -> DeployServiceServer<Self> {
        DeployServiceServer::new(self)
    }
}

#[async_trait::async_trait]
impl<C, R> DeployService for DeployServer<C, R>
where
    C: Cluster,
    R: RegistryTokens,
{
    async fn deploy(
        &self,
        req: tonic::Request<api::DeployRequest>,
    ) -> Result<tonic::Response<api::DeployResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "Deploy"),
            self.config.unary_timeout,
            async move {
                let owner = caller(&req)?;
                let intent = convert::intent(req.into_inner())?;
                tracing::info!(app = %intent.name, image = %intent.image, "Deploying");
                let deployed = self
                    .deployer
                    .deploy(intent, &owner)
                    .await
                    .map_err(error::status)?;
                Ok(api::DeployResponse {
                    message: deployed.message.to_string(),
                    created: deployed.created,
                })
            },
        )
        .await
    }
}
