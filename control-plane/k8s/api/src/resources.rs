//! Builders for every object an app is made of.
//!
//! Each builder is a pure function of the [`DeploymentContext`]; all objects
//! but the namespace itself are placed in the app namespace and named after
//! the app.

use crate::{
    api::{
        apps::v1::{DeploymentStrategy, RollingUpdateDeployment},
        autoscaling::v2::{
            CrossVersionObjectReference, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
            ResourceMetricSource,
        },
        core::v1::{
            Capabilities, ContainerPort, EnvFromSource, HTTPGetAction, LocalObjectReference, NamespaceSpec,
            PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource, SecurityContext,
            ServicePort, ServiceSpec,
        },
        rbac::v1::{PolicyRule, RoleRef, Subject},
    },
    gateway, Container, Deployment, DeploymentSpec, HTTPRoute, HorizontalPodAutoscaler,
    Namespace, ObjectMeta, PodSpec, Role, RoleBinding, Secret, Service, ServiceAccount,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use k8s_openapi::{
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
    ByteString,
};
use loco_control_plane_core::{labels, DeploymentContext, Platform};
use std::collections::BTreeMap;

pub const SERVICE_PORT: i32 = 80;
pub const ROUTE_REQUEST_TIMEOUT: &str = "30s";
pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 60;
pub const REVISION_HISTORY_LIMIT: i32 = 2;
pub const DEFAULT_AUTOSCALING_CPU_TARGET: i32 = 70;

const ROLLING_UPDATE_BUDGET: &str = "25%";
const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Credentials stored in the app's image pull secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
    pub email: String,
}

fn meta(ctx: &DeploymentContext, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ctx.namespace().to_string()),
        labels: Some(ctx.labels.clone()),
        ..Default::default()
    }
}

pub fn namespace(ctx: &DeploymentContext) -> Namespace {
    let mut labels = ctx.labels.clone();
    labels.insert(labels::EXPOSE_VIA_GATEWAY.to_string(), "true".to_string());
    Namespace {
        metadata: ObjectMeta {
            name: Some(ctx.namespace().to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NamespaceSpec::default()),
        ..Default::default()
    }
}

pub fn env_secret(ctx: &DeploymentContext) -> Secret {
    Secret {
        metadata: meta(ctx, ctx.name()),
        type_: Some("Opaque".to_string()),
        data: Some(encode_env(&ctx.intent.env)),
        ..Default::default()
    }
}

/// Merges `env` into the secret's data. Existing keys are overwritten and keys
/// absent from `env` are preserved.
pub fn merge_env(secret: &mut Secret, env: &BTreeMap<String, String>) {
    secret
        .data
        .get_or_insert_with(Default::default)
        .extend(encode_env(env));
}

fn encode_env(env: &BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    env.iter()
        .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

pub fn registry_secret(ctx: &DeploymentContext, creds: &RegistryCredentials) -> Secret {
    Secret {
        metadata: meta(ctx, &ctx.registry_secret_name()),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(docker_config_json(creds)),
        )])),
        ..Default::default()
    }
}

fn docker_config_json(creds: &RegistryCredentials) -> Vec<u8> {
    let auth = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", creds.username, creds.password));
    serde_json::json!({
        "auths": {
            creds.registry.as_str(): {
                "username": creds.username,
                "password": creds.password,
                "email": creds.email,
                "auth": auth,
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn service_account(ctx: &DeploymentContext) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(ctx, ctx.name()),
        ..Default::default()
    }
}

/// Grants read access to the app's env secret and nothing else.
pub fn role(ctx: &DeploymentContext) -> Role {
    Role {
        metadata: meta(ctx, ctx.name()),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string()]),
            resource_names: Some(vec![ctx.name().to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn role_binding(ctx: &DeploymentContext) -> RoleBinding {
    RoleBinding {
        metadata: meta(ctx, ctx.name()),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: ctx.name().to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: ctx.name().to_string(),
            namespace: Some(ctx.namespace().to_string()),
            ..Default::default()
        }]),
    }
}

pub fn service(ctx: &DeploymentContext) -> Service {
    Service {
        metadata: meta(ctx, ctx.name()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(
                labels::NAME.to_string(),
                ctx.name().to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(ctx.intent.container_port())),
                ..Default::default()
            }]),
            session_affinity: Some("None".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn deployment(ctx: &DeploymentContext) -> Deployment {
    let intent = &ctx.intent;

    let mut annotations = BTreeMap::new();
    let metrics = &intent.observability.metrics;
    if metrics.enabled {
        annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
        annotations.insert("prometheus.io/path".to_string(), metrics.path.clone());
        annotations.insert("prometheus.io/port".to_string(), metrics.port.to_string());
    }

    let container = Container {
        name: ctx.name().to_string(),
        image: Some(intent.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: intent.container_port(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: ctx.name().to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(
            &intent.resources.cpu,
            &intent.resources.memory,
        )),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(intent.health.path.clone()),
                port: IntOrString::Int(intent.container_port()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(intent.health.grace_period_seconds),
            period_seconds: Some(intent.health.interval_seconds),
            timeout_seconds: Some(intent.health.timeout_seconds),
            failure_threshold: Some(intent.health.failure_threshold()),
            success_threshold: Some(1),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: meta(ctx, ctx.name()),
        spec: Some(DeploymentSpec {
            replicas: Some(intent.replicas.min),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            selector: LabelSelector {
                match_labels: Some(ctx.selector()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::String(ROLLING_UPDATE_BUDGET.to_string())),
                    max_unavailable: Some(IntOrString::String(
                        ROLLING_UPDATE_BUDGET.to_string(),
                    )),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(ctx.labels.clone()),
                    annotations: Some(annotations).filter(|a| !a.is_empty()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Always".to_string()),
                    service_account_name: Some(ctx.name().to_string()),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: ctx.registry_secret_name(),
                    }]),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn http_route(ctx: &DeploymentContext, platform: &Platform) -> HTTPRoute {
    HTTPRoute {
        metadata: meta(ctx, ctx.name()),
        spec: gateway::HTTPRouteSpec {
            parent_refs: Some(vec![gateway::HTTPRouteParentRefs {
                group: None,
                kind: None,
                name: platform.gateway_name.clone(),
                namespace: Some(platform.gateway_namespace.clone()),
                port: None,
                section_name: None,
            }]),
            hostnames: Some(vec![ctx.hostname.clone()]),
            rules: Some(vec![gateway::HTTPRouteRules {
                matches: Some(vec![gateway::HTTPRouteRulesMatches {
                    path: Some(gateway::HTTPRouteRulesMatchesPath {
                        r#type: Some(gateway::HTTPRouteRulesMatchesPathType::PathPrefix),
                        value: Some(ctx.intent.routing.path_prefix.clone()),
                    }),
                    ..Default::default()
                }]),
                backend_refs: Some(vec![gateway::HTTPRouteRulesBackendRefs {
                    filters: None,
                    group: None,
                    kind: None,
                    name: ctx.name().to_string(),
                    namespace: None,
                    port: Some(SERVICE_PORT),
                    weight: None,
                }]),
                timeouts: Some(gateway::HTTPRouteRulesTimeouts {
                    backend_request: None,
                    request: Some(ROUTE_REQUEST_TIMEOUT.to_string()),
                }),
                ..Default::default()
            }]),
        },
        status: None,
    }
}

/// Returns an autoscaler only when the intent enables one.
pub fn autoscaler(ctx: &DeploymentContext) -> Option<HorizontalPodAutoscaler> {
    let intent = &ctx.intent;
    if !intent.autoscaling.enabled {
        return None;
    }

    let (resource, target) = match (
        intent.autoscaling.cpu_target,
        intent.autoscaling.memory_target,
    ) {
        (_, Some(memory)) => ("memory", memory),
        (Some(cpu), None) => ("cpu", cpu),
        (None, None) => ("cpu", DEFAULT_AUTOSCALING_CPU_TARGET),
    };

    Some(HorizontalPodAutoscaler {
        metadata: meta(ctx, ctx.name()),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: ctx.name().to_string(),
            },
            min_replicas: Some(intent.replicas.min),
            max_replicas: intent.replicas.max,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: resource.to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(target),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Requests and limits are always equal.
pub fn resource_requirements(cpu: &str, memory: &str) -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ]);
    ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    }
}

// === Deployment mutations ===

fn containers_mut(deployment: &mut Deployment) -> impl Iterator<Item = &mut Container> {
    deployment
        .spec
        .iter_mut()
        .filter_map(|s| s.template.spec.as_mut())
        .flat_map(|s| s.containers.iter_mut())
}

fn template_meta_mut(deployment: &mut Deployment) -> &mut ObjectMeta {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
}

/// Points the app container at a new image and refreshes the version label.
pub fn set_image(deployment: &mut Deployment, image: &str) {
    for container in containers_mut(deployment) {
        container.image = Some(image.to_string());
    }

    let version = labels::image_version(image);
    deployment
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(labels::VERSION.to_string(), version.clone());
    template_meta_mut(deployment)
        .labels
        .get_or_insert_with(Default::default)
        .insert(labels::VERSION.to_string(), version);
}

/// Annotates the pod template so the workload rolls out new pods.
pub fn set_restarted_at(deployment: &mut Deployment, now: DateTime<Utc>) {
    template_meta_mut(deployment)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(labels::RESTARTED_AT.to_string(), now.to_rfc3339());
}

pub fn set_replicas(deployment: &mut Deployment, replicas: i32) {
    deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
}

/// Sets the cpu and/or memory of every container, keeping requests equal to
/// limits.
pub fn set_resources(deployment: &mut Deployment, cpu: Option<&str>, memory: Option<&str>) {
    for container in containers_mut(deployment) {
        let resources = container.resources.get_or_insert_with(Default::default);
        for map in [&mut resources.requests, &mut resources.limits] {
            let map = map.get_or_insert_with(Default::default);
            if let Some(cpu) = cpu {
                map.insert("cpu".to_string(), Quantity(cpu.to_string()));
            }
            if let Some(memory) = memory {
                map.insert("memory".to_string(), Quantity(memory.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests;
