//! Conversions between protobuf messages and domain types.
//!
//! Zero-valued fields in optional policy messages take the platform defaults.

use crate::api;
use chrono::{DateTime, Utc};
use loco_control_plane_core::{
    intent::{
        Autoscaling, HealthCheck, Metrics, Observability, Replicas, Resources, Routing, Tracing,
    },
    registry::DeployToken,
    status::AppStatus,
    DeploymentIntent,
};
use loco_control_plane_k8s_logs::LogEntry;
use std::collections::BTreeMap;

pub(crate) fn intent(req: api::DeployRequest) -> Result<DeploymentIntent, tonic::Status> {
    let api::DeployRequest { app, image, env } = req;
    let app = app.ok_or_else(|| tonic::Status::invalid_argument("app is required"))?;
    let api::App {
        name,
        subdomain,
        resources,
        replicas,
        autoscaling,
        health,
        routing,
        observability,
    } = app;

    Ok(DeploymentIntent {
        name,
        subdomain,
        image,
        env: env.into_iter().collect::<BTreeMap<_, _>>(),
        resources: resources
            .map(|r| Resources {
                cpu: r.cpu,
                memory: r.memory,
            })
            .unwrap_or_default(),
        replicas: replicas
            .map(|r| Replicas {
                min: r.min,
                max: r.max,
            })
            .unwrap_or_default(),
        autoscaling: autoscaling
            .map(|a| Autoscaling {
                enabled: a.enabled,
                cpu_target: a.cpu_target,
                memory_target: a.memory_target,
            })
            .unwrap_or_default(),
        health: health.map(health_check).unwrap_or_default(),
        routing: routing.map(route).unwrap_or_default(),
        observability: observability.map(observability_policy).unwrap_or_default(),
    })
}

fn health_check(h: api::HealthCheck) -> HealthCheck {
    let default = HealthCheck::default();
    HealthCheck {
        path: or_default(h.path, default.path),
        interval_seconds: nonzero_or(h.interval_seconds, default.interval_seconds),
        timeout_seconds: nonzero_or(h.timeout_seconds, default.timeout_seconds),
        grace_period_seconds: h.grace_period_seconds,
        failure_threshold: nonzero_or(h.failure_threshold, default.failure_threshold),
    }
}

fn route(r: api::Routing) -> Routing {
    let default = Routing::default();
    Routing {
        path_prefix: or_default(r.path_prefix, default.path_prefix),
        port: if r.port == 0 { default.port } else { r.port },
        idle_timeout_seconds: r.idle_timeout_seconds,
    }
}

fn observability_policy(o: api::Observability) -> Observability {
    Observability {
        logging_enabled: o.logging_enabled,
        metrics: o
            .metrics
            .map(|m| Metrics {
                enabled: m.enabled,
                path: m.path,
                port: m.port,
            })
            .unwrap_or_default(),
        tracing: o
            .tracing
            .map(|t| Tracing {
                enabled: t.enabled,
                sample_rate: t.sample_rate,
            })
            .unwrap_or_default(),
    }
}

fn or_default(value: String, default: String) -> String {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn nonzero_or(value: i32, default: i32) -> i32 {
    if value == 0 {
        default
    } else {
        value
    }
}

pub(crate) fn status(s: AppStatus) -> api::StatusResponse {
    api::StatusResponse {
        status: s.phase.to_string(),
        pods: s.pods,
        health: s.health.to_string(),
        hostname: s.hostname,
        certificate_expiry: s.certificate_expiry,
        autoscaling_enabled: s.autoscaling_enabled,
        cpu_target: s.cpu_target,
        memory_target: s.memory_target,
        min_replicas: s.min_replicas,
        max_replicas: s.max_replicas,
        desired_replicas: s.desired_replicas,
        ready_replicas: s.ready_replicas,
        deployed_at: s.deployed_at.map(timestamp),
        deployed_by: s.deployed_by,
    }
}

pub(crate) fn log_entry(e: LogEntry) -> api::LogEntry {
    api::LogEntry {
        timestamp: Some(timestamp(e.timestamp)),
        pod: e.pod,
        container: e.container,
        message: e.message,
        is_error: e.is_error,
    }
}

pub(crate) fn registry_token(registry: &str, t: DeployToken) -> api::RegistryTokenResponse {
    api::RegistryTokenResponse {
        registry: registry.to_string(),
        username: t.username,
        token: t.token,
        expires_at: t.expires_at.map(timestamp),
    }
}

pub(crate) fn timestamp(t: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: t.timestamp(),
        nanos: t.timestamp_subsec_nanos() as i32,
    }
}

pub(crate) fn datetime(t: prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(t.seconds, u32::try_from(t.nanos).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use loco_control_plane_core::status::{Health, Phase};

    #[test]
    fn fills_defaults() {
        let intent = intent(api::DeployRequest {
            app: Some(api::App {
                name: "hello".to_string(),
                subdomain: "hello".to_string(),
                resources: Some(api::Resources {
                    cpu: "100m".to_string(),
                    memory: "128Mi".to_string(),
                }),
                health: Some(api::HealthCheck {
                    path: "/health".to_string(),
                    ..Default::default()
                }),
                routing: Some(api::Routing::default()),
                ..Default::default()
            }),
            image: "registry.example.com/hello:v1".to_string(),
            env: maplit::hashmap! { "A".to_string() => "1".to_string() },
        })
        .expect("intent must convert");

        assert_eq!(intent.health.path, "/health");
        assert_eq!(intent.health.interval_seconds, 30);
        assert_eq!(intent.health.timeout_seconds, 5);
        assert_eq!(intent.health.failure_threshold, 3);
        assert_eq!(intent.routing.port, 8080);
        assert_eq!(intent.routing.path_prefix, "/");
        assert_eq!(intent.replicas, Replicas { min: 1, max: 1 });
        assert_eq!(intent.env.get("A").map(String::as_str), Some("1"));
        assert!(intent
            .validate(&loco_control_plane_core::Platform::default())
            .is_ok());
    }

    #[test]
    fn requires_app() {
        let err = intent(api::DeployRequest::default()).expect_err("app is required");
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn converts_status() {
        let deployed_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let rsp = status(AppStatus {
            phase: Phase::Running,
            pods: 2,
            health: Health::Passing,
            hostname: "hello.deploy-app.com".to_string(),
            certificate_expiry: "Unknown".to_string(),
            autoscaling_enabled: false,
            cpu_target: None,
            memory_target: None,
            min_replicas: 2,
            max_replicas: 2,
            desired_replicas: 2,
            ready_replicas: 2,
            deployed_at: Some(deployed_at),
            deployed_by: "alice".to_string(),
        });
        assert_eq!(rsp.status, "Running");
        assert_eq!(rsp.health, "Passing");
        assert_eq!(
            rsp.deployed_at.and_then(datetime),
            Some(deployed_at)
        );
    }
}
