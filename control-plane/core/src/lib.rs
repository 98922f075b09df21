#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod identity;
pub mod intent;
pub mod labels;
pub mod naming;
pub mod quantity;
pub mod registry;
pub mod status;
mod validation;

pub use self::{
    intent::DeploymentIntent,
    naming::{AppRef, DeploymentContext},
    validation::{
        is_reserved_subdomain, validate_app_name, validate_cpu, validate_env, validate_memory,
        validate_replica_count, ValidationError,
    },
};

/// Platform-wide settings that shape every deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    /// The platform's own name. Subdomains using it as a label are reserved.
    pub name: String,

    /// Apps are exposed at `<subdomain>.<domain>`.
    pub domain: String,

    /// The shared gateway that every ingress route attaches to.
    pub gateway_name: String,
    pub gateway_namespace: String,

    /// Upper bound on the replica count of any app.
    pub max_replicas: i32,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            name: "loco".to_string(),
            domain: "deploy-app.com".to_string(),
            gateway_name: "loco-gateway".to_string(),
            gateway_namespace: "loco-system".to_string(),
            max_replicas: 10,
        }
    }
}
