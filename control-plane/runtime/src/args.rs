use crate::{
    core::Platform,
    deploy::{self, Deployer},
    grpc::{self, metrics::RpcMetrics},
    k8s::KubeCluster,
    log,
    logs::KubeLogSource,
    upstream::{GithubIdentity, GitlabRegistry, GitlabRegistryConfig},
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio::time::Duration;
use tonic::transport::Server;
use tracing::{info, instrument};

/// Bounds populating a new app's namespace; slower creates are rolled back.
const CREATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounds the namespace deletion that undoes a failed create.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[clap(name = "loco", about = "A multi-tenant deployment control plane")]
pub struct Args {
    /// Integer log level; lower is more verbose.
    #[clap(long, default_value = "0", env = "LOG_LEVEL", allow_hyphen_values = true)]
    log_level: i32,

    /// Defaults to json in production and plain otherwise.
    #[clap(long, env = "LOG_FORMAT")]
    log_format: Option<kubert::LogFormat>,

    #[clap(long, default_value = "DEVELOPMENT", env = "APP_ENV")]
    app_env: String,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The gRPC server listens on this port on all interfaces.
    #[clap(long, default_value = "8000", env = "PORT")]
    port: u16,

    #[clap(long, default_value = "loco", env = "LOCO_PLATFORM_NAME")]
    platform_name: String,

    #[clap(long, default_value = "deploy-app.com", env = "LOCO_PLATFORM_DOMAIN")]
    platform_domain: String,

    #[clap(long, default_value = "loco-gateway", env = "LOCO_GATEWAY_NAME")]
    gateway_name: String,

    #[clap(long, default_value = "loco-system", env = "LOCO_GATEWAY_NAMESPACE")]
    gateway_namespace: String,

    #[clap(long, default_value = "10", env = "LOCO_MAX_REPLICAS")]
    max_replicas: i32,

    #[clap(long, default_value = "30", env = "LOCO_UNARY_TIMEOUT_SECS")]
    unary_timeout_secs: u64,

    #[clap(long, env = "GH_OAUTH_CLIENT_ID")]
    github_client_id: String,

    #[clap(long, default_value = "https://api.github.com", env = "GH_API_URL")]
    github_api_url: String,

    /// How long a client's identity is trusted once confirmed.
    #[clap(long, default_value = "28800", env = "LOCO_IDENTITY_TTL_SECS")]
    identity_ttl_secs: u64,

    #[clap(long, default_value = "https://gitlab.com", env = "GITLAB_URL")]
    gitlab_url: String,

    #[clap(long, env = "GITLAB_PROJECT_ID")]
    gitlab_project_id: String,

    #[clap(long, default_value = "registry.gitlab.com", env = "GITLAB_REGISTRY_URL")]
    gitlab_registry_url: String,

    #[clap(
        long,
        default_value = "loco-deploy-token",
        env = "GITLAB_DEPLOY_TOKEN_NAME"
    )]
    gitlab_deploy_token_name: String,

    #[clap(long, env = "GITLAB_PAT", hide_env_values = true)]
    gitlab_pat: String,

    #[clap(long, default_value = "2592000", env = "LOCO_PULL_TOKEN_TTL_SECS")]
    pull_token_ttl_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            app_env,
            client,
            admin,
            port,
            platform_name,
            platform_domain,
            gateway_name,
            gateway_namespace,
            max_replicas,
            unary_timeout_secs,
            github_client_id,
            github_api_url,
            identity_ttl_secs,
            gitlab_url,
            gitlab_project_id,
            gitlab_registry_url,
            gitlab_deploy_token_name,
            gitlab_pat,
            pull_token_ttl_secs,
        } = self;

        let mut prom = <Registry>::default();
        let rpc_metrics = RpcMetrics::register(prom.sub_registry_with_prefix("grpc_server"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log::filter(log_level)?, log::format(log_format, &app_env))
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let registry = GitlabRegistry::new(GitlabRegistryConfig {
            url: gitlab_url,
            project_id: gitlab_project_id,
            registry_url: gitlab_registry_url,
            personal_access_token: gitlab_pat,
        })?;
        let deployer = Deployer::new(
            KubeCluster::new(runtime.client()),
            Arc::new(registry),
            deploy::Config {
                platform: Platform {
                    name: platform_name,
                    domain: platform_domain,
                    gateway_name,
                    gateway_namespace,
                    max_replicas,
                },
                token_name: gitlab_deploy_token_name,
                pull_token_ttl: Duration::from_secs(pull_token_ttl_secs),
                create_timeout: CREATE_TIMEOUT,
                rollback_timeout: ROLLBACK_TIMEOUT,
            },
        );
        let identity = Arc::new(GithubIdentity::new(&github_api_url)?);
        let identity_ttl = Duration::from_secs(identity_ttl_secs);

        tokio::spawn(grpc(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            Services {
                deployer,
                logs: KubeLogSource::new(runtime.client()),
                identity,
                identity_ttl,
                client_id: github_client_id,
                metrics: rpc_metrics,
                config: grpc::ServerConfig {
                    unary_timeout: Duration::from_secs(unary_timeout_secs),
                },
            },
            runtime.shutdown_handle(),
        ));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

struct Services {
    deployer: Deployer<KubeCluster, GitlabRegistry>,
    logs: KubeLogSource,
    identity: Arc<GithubIdentity>,
    identity_ttl: Duration,
    client_id: String,
    metrics: RpcMetrics,
    config: grpc::ServerConfig,
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(addr: SocketAddr, services: Services, drain: drain::Watch) -> Result<()> {
    let Services {
        deployer,
        logs,
        identity,
        identity_ttl,
        client_id,
        metrics,
        config,
    } = services;

    let deploy_svc =
        grpc::DeployServer::new(deployer.clone(), metrics.clone(), config.clone()).svc();
    let app_svc = grpc::AppServer::new(
        deployer.clone(),
        logs,
        metrics.clone(),
        config.clone(),
        drain.clone(),
    )
    .svc();
    let registry_svc = grpc::RegistryServer::new(deployer, metrics.clone(), config.clone()).svc();
    let oauth_svc = grpc::OAuthServer::new(client_id, identity_ttl, metrics, config).svc();
    let reflection_svc = grpc::reflection()?;

    let cache = Arc::new(grpc::IdentityCache::new(identity_ttl));

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .layer(grpc::ContextLayer::new())
            .layer(grpc::AuthLayer::new(identity, cache))
            .add_service(deploy_svc)
            .add_service(app_svc)
            .add_service(registry_svc)
            .add_service(oauth_svc)
            .add_service(reflection_svc)
            .serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "loco",
        "--github-client-id",
        "Iv1.abc123",
        "--gitlab-project-id",
        "42",
        "--gitlab-pat",
        "glpat-s3cret",
    ];

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(REQUIRED).expect("args must parse");
        assert_eq!(args.log_level, 0);
        assert_eq!(args.port, 8000);
        assert_eq!(args.platform_name, "loco");
        assert_eq!(args.platform_domain, "deploy-app.com");
        assert_eq!(args.gateway_name, "loco-gateway");
        assert_eq!(args.gateway_namespace, "loco-system");
        assert_eq!(args.max_replicas, 10);
        assert_eq!(args.identity_ttl_secs, 28800);
        assert_eq!(args.gitlab_deploy_token_name, "loco-deploy-token");
        assert_eq!(args.pull_token_ttl_secs, 30 * 24 * 60 * 60);
    }

    #[test]
    fn negative_log_levels() {
        let args = Args::try_parse_from(REQUIRED.into_iter().chain(["--log-level", "-4"]))
            .expect("args must parse");
        assert_eq!(args.log_level, -4);
    }

    #[test]
    fn requires_upstream_credentials() {
        assert!(Args::try_parse_from(["loco", "--github-client-id", "Iv1.abc123"]).is_err());
    }
}
