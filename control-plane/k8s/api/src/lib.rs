#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod certificate;
mod client;
mod error;
pub mod resources;

pub use self::{
    certificate::Certificate,
    client::{Cluster, KubeCluster, Object, FIELD_MANAGER},
    error::{Error, ObjectKind, Verb},
};
pub use gateway_api::apis::standard::httproutes::{self as gateway, HTTPRoute};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec},
        autoscaling::v2::HorizontalPodAutoscaler,
        core::v1::{
            Container, Namespace, Pod, PodSpec, PodStatus, Secret, Service, ServiceAccount,
        },
        rbac::v1::{Role, RoleBinding},
    },
    apimachinery::pkg::apis::meta::v1::Time,
    NamespaceResourceScope,
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    runtime::watcher,
    Client, Resource,
};

/// Reads an API timestamp through its RFC3339 wire form.
pub fn to_datetime(time: &Time) -> Option<chrono::DateTime<chrono::Utc>> {
    let value = serde_json::to_value(time).ok()?;
    chrono::DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc))
}
