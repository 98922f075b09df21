//! Projects deployment intents onto the cluster.
//!
//! A deploy either creates every object an app needs, in order, or updates the
//! image, env and pull credentials of an app that already exists. A failed
//! create deletes the app namespace so nothing is left behind; a failed update
//! leaves the existing objects as they were. Creates run on a task of their own
//! and finish (or roll back) even when the caller stops waiting.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod status;


use chrono::Utc;
use loco_control_plane_core::{
    registry::{DeployToken, RegistryError, RegistryTokens, Scope, TokenRequest},
    validate_cpu, validate_env, validate_memory, validate_replica_count, AppRef,
    DeploymentContext, DeploymentIntent, Platform, ValidationError,
};
use loco_control_plane_k8s_api::{
    self as k8s,
    resources::{self, RegistryCredentials},
    Cluster, Deployment, Secret, Service,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::Instrument;

pub const CREATED_MESSAGE: &str = "Deployment and service created successfully";
pub const UPDATED_MESSAGE: &str = "Deployment updated successfully";

/// Lifetime of tokens minted for clients.
pub const CLIENT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
pub struct Config {
    pub platform: Platform,

    /// Name given to deploy tokens minted for pull secrets.
    pub token_name: String,

    /// Lifetime of tokens stored in pull secrets.
    pub pull_token_ttl: Duration,

    /// Bounds populating a new app's namespace. A create that runs longer is
    /// rolled back.
    pub create_timeout: Duration,

    /// Bounds the namespace deletion that undoes a failed create.
    pub rollback_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("at least one of replicas, cpu or memory must be set")]
    MissingScaleArguments,

    #[error(transparent)]
    Kube(#[from] k8s::Error),

    #[error("failed to mint registry token: {0}")]
    Registry(#[from] RegistryError),

    #[error("creating the app timed out after {0:?}")]
    CreateTimedOut(Duration),

    #[error("the create task was cancelled")]
    Interrupted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployed {
    pub created: bool,
    pub message: &'static str,
}

/// Changes to an app's scale. At least one field must be set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scale {
    pub replicas: Option<i32>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

pub use loco_control_plane_core::status::AppStatus;

#[derive(Debug)]
pub struct Deployer<C, R> {
    cluster: C,
    registry: Arc<R>,
    config: Arc<Config>,
}

// === impl Deployer ===

impl<C, R> Clone for Deployer<C, R>
where
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            cluster: self.cluster.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, R> Deployer<C, R>
where
    C: Cluster,
    R: RegistryTokens,
{
    pub fn new(cluster: C, registry: Arc<R>, config: Config) -> Self {
        Self {
            cluster,
            registry,
            config: Arc::new(config),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.config.platform
    }

    /// Creates the app if its service doesn't exist yet, otherwise rolls out
    /// the new image and env.
    pub async fn deploy(&self, intent: DeploymentIntent, owner: &str) -> Result<Deployed, Error> {
        let ctx = DeploymentContext::new(intent, owner, &self.config.platform, Utc::now())?;

        let exists = self
            .cluster
            .exists::<Service>(ctx.namespace(), ctx.name())
            .await?;
        if exists {
            tracing::info!(namespace = %ctx.namespace(), image = %ctx.intent.image, "Updating app");
            self.update(&ctx).await?;
            return Ok(Deployed {
                created: false,
                message: UPDATED_MESSAGE,
            });
        }

        tracing::info!(namespace = %ctx.namespace(), image = %ctx.intent.image, "Creating app");
        // Detached: dropping this future must not strand a half-built namespace.
        let this = self.clone();
        let task = tokio::spawn(
            async move { this.create_or_roll_back(ctx).await }.in_current_span(),
        );
        match task.await {
            Ok(res) => res?,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(_) => return Err(Error::Interrupted),
        }

        Ok(Deployed {
            created: true,
            message: CREATED_MESSAGE,
        })
    }

    /// Creates the app namespace and populates it, deleting the namespace
    /// again if anything fails or the create outlives its timeout.
    async fn create_or_roll_back(&self, ctx: DeploymentContext) -> Result<(), Error> {
        self.cluster
            .create_namespace(&resources::namespace(&ctx))
            .await?;

        let timeout = self.config.create_timeout;
        let error = match tokio::time::timeout(timeout, self.create(&ctx)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => error,
            Err(_) => Error::CreateTimedOut(timeout),
        };
        tracing::warn!(namespace = %ctx.namespace(), %error, "Create failed; rolling back");
        self.rollback(ctx.namespace()).await;
        Err(error)
    }

    /// Populates a freshly created namespace.
    async fn create(&self, ctx: &DeploymentContext) -> Result<(), Error> {
        let ns = ctx.namespace();
        let creds = self.pull_credentials(ctx).await?;

        self.cluster.create(ns, &resources::env_secret(ctx)).await?;
        self.cluster
            .create(ns, &resources::registry_secret(ctx, &creds))
            .await?;
        self.cluster
            .create(ns, &resources::service_account(ctx))
            .await?;
        self.cluster.create(ns, &resources::role(ctx)).await?;
        self.cluster.create(ns, &resources::role_binding(ctx)).await?;
        self.cluster.create(ns, &resources::service(ctx)).await?;
        self.cluster.create(ns, &resources::deployment(ctx)).await?;
        self.cluster
            .create(ns, &resources::http_route(ctx, &self.config.platform))
            .await?;
        if let Some(autoscaler) = resources::autoscaler(ctx) {
            self.cluster.create(ns, &autoscaler).await?;
        }
        Ok(())
    }

    async fn update(&self, ctx: &DeploymentContext) -> Result<(), Error> {
        let ns = ctx.namespace();
        let creds = self.pull_credentials(ctx).await?;

        self.cluster
            .upsert(ns, resources::registry_secret(ctx, &creds))
            .await?;
        self.cluster.upsert(ns, resources::env_secret(ctx)).await?;

        let mut deployment = self.cluster.get::<Deployment>(ns, ctx.name()).await?;
        resources::set_image(&mut deployment, &ctx.intent.image);
        resources::set_restarted_at(&mut deployment, ctx.created_at);
        self.cluster.replace(ns, &deployment).await?;
        Ok(())
    }

    /// Deletes `namespace`. Errors are logged and dropped.
    async fn rollback(&self, namespace: &str) {
        let timeout = self.config.rollback_timeout;
        match tokio::time::timeout(timeout, self.cluster.delete_namespace(namespace)).await {
            Ok(Ok(())) => tracing::info!(%namespace, "Rolled back"),
            Ok(Err(error)) => tracing::error!(%namespace, %error, "Rollback failed"),
            Err(_) => tracing::error!(%namespace, ?timeout, "Rollback timed out"),
        }
    }

    async fn pull_credentials(&self, ctx: &DeploymentContext) -> Result<RegistryCredentials, Error> {
        let ttl = chrono::Duration::from_std(self.config.pull_token_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let token = self
            .registry
            .mint(TokenRequest {
                name: format!("{}-{}", self.config.token_name, ctx.namespace()),
                scopes: vec![Scope::ReadRegistry],
                expires_at: ctx.created_at + ttl,
            })
            .await?;
        Ok(RegistryCredentials {
            registry: self.registry.registry_url().to_string(),
            username: token.username,
            password: token.token,
            email: format!("{}@{}", ctx.owner, self.config.platform.domain),
        })
    }

    /// Deletes the app. Every object goes with its namespace.
    pub async fn destroy(&self, app: &AppRef) -> Result<(), Error> {
        tracing::info!(namespace = %app.namespace, "Destroying app");
        self.cluster.delete_namespace(&app.namespace).await?;
        Ok(())
    }

    pub async fn scale(&self, app: &AppRef, scale: Scale) -> Result<(), Error> {
        let Scale {
            replicas,
            cpu,
            memory,
        } = scale;
        if replicas.is_none() && cpu.is_none() && memory.is_none() {
            return Err(Error::MissingScaleArguments);
        }
        if let Some(replicas) = replicas {
            validate_replica_count(replicas, &self.config.platform)?;
        }
        if let Some(cpu) = cpu.as_deref() {
            validate_cpu(cpu)?;
        }
        if let Some(memory) = memory.as_deref() {
            validate_memory(memory)?;
        }

        let mut deployment = self
            .cluster
            .get::<Deployment>(&app.namespace, &app.name)
            .await?;
        if let Some(replicas) = replicas {
            resources::set_replicas(&mut deployment, replicas);
        }
        if cpu.is_some() || memory.is_some() {
            resources::set_resources(&mut deployment, cpu.as_deref(), memory.as_deref());
        }
        self.cluster.replace(&app.namespace, &deployment).await?;
        tracing::info!(namespace = %app.namespace, ?replicas, ?cpu, ?memory, "Scaled app");
        Ok(())
    }

    /// Merges `env` into the app's env secret, optionally restarting its pods
    /// so they pick the change up.
    pub async fn update_env(
        &self,
        app: &AppRef,
        env: BTreeMap<String, String>,
        restart: bool,
    ) -> Result<(), Error> {
        validate_env(env.keys().map(String::as_str))?;

        let mut secret = self.cluster.get::<Secret>(&app.namespace, &app.name).await?;
        resources::merge_env(&mut secret, &env);
        self.cluster.replace(&app.namespace, &secret).await?;

        if restart {
            let mut deployment = self
                .cluster
                .get::<Deployment>(&app.namespace, &app.name)
                .await?;
            resources::set_restarted_at(&mut deployment, Utc::now());
            self.cluster.replace(&app.namespace, &deployment).await?;
        }
        tracing::info!(namespace = %app.namespace, vars = env.len(), restart, "Updated env");
        Ok(())
    }

    pub async fn status(&self, app: &AppRef) -> Result<AppStatus, Error> {
        status::get(&self.cluster, app).await
    }

    /// Mints a short-lived read token for `owner`.
    pub async fn registry_token(&self, owner: &str) -> Result<DeployToken, Error> {
        let ttl = chrono::Duration::from_std(CLIENT_TOKEN_TTL)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let token = self
            .registry
            .mint(TokenRequest {
                name: format!("{}-{}", self.config.token_name, owner.trim().to_lowercase()),
                scopes: vec![Scope::ReadRegistry],
                expires_at: Utc::now() + ttl,
            })
            .await?;
        Ok(token)
    }

    pub fn registry_url(&self) -> &str {
        self.registry.registry_url()
    }
}
