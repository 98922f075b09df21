use crate::Error;
use loco_control_plane_core::{
    labels,
    status::{self, AppStatus, Health, Phase},
    AppRef,
};
use loco_control_plane_k8s_api::{
    self as k8s, Certificate, Cluster, Deployment, HTTPRoute, HorizontalPodAutoscaler, Pod,
    ResourceExt,
};

pub(crate) async fn get<C: Cluster>(cluster: &C, app: &AppRef) -> Result<AppStatus, Error> {
    let ns = app.namespace.as_str();
    let deployment = cluster.get::<Deployment>(ns, &app.name).await?;
    let pods = cluster.list::<Pod>(ns, &app.instance_selector()).await?;
    let autoscaler = optional(cluster.get::<HorizontalPodAutoscaler>(ns, &app.name).await)?;
    let route = optional(cluster.get::<HTTPRoute>(ns, &app.name).await)?;

    let certificate_expiry = match cluster.get::<Certificate>(ns, &app.name).await {
        Ok(cert) => cert
            .not_after()
            .map(status::format_expiry)
            .unwrap_or_else(|| status::UNKNOWN.to_string()),
        Err(error) => {
            if !error.is_not_found() {
                tracing::warn!(%error, "Failed to read certificate");
            }
            status::UNKNOWN.to_string()
        }
    };

    let desired_replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let (min_replicas, max_replicas, cpu_target, memory_target) = match &autoscaler {
        Some(hpa) => {
            let spec = hpa.spec.as_ref();
            (
                spec.and_then(|s| s.min_replicas).unwrap_or(1),
                spec.map(|s| s.max_replicas).unwrap_or(desired_replicas),
                utilization_target(hpa, "cpu"),
                utilization_target(hpa, "memory"),
            )
        }
        None => (desired_replicas, desired_replicas, None, None),
    };

    let hostname = route
        .and_then(|r| r.spec.hostnames)
        .and_then(|h| h.into_iter().next())
        .unwrap_or_else(|| status::UNKNOWN.to_string());

    let deployment_labels = deployment.labels();
    let deployed_at = deployment_labels
        .get(labels::CREATED_AT)
        .and_then(|t| labels::parse_timestamp(t))
        .or_else(|| {
            deployment
                .metadata
                .creation_timestamp
                .as_ref()
                .and_then(k8s::to_datetime)
        });
    let deployed_by = deployment_labels
        .get(labels::CREATED_FOR)
        .cloned()
        .unwrap_or_else(|| status::UNKNOWN.to_string());

    Ok(AppStatus {
        phase: Phase::from_replicas(desired_replicas, ready_replicas),
        pods: pods.len() as i32,
        health: Health::from_pods(pods.iter().map(is_ready)),
        hostname,
        certificate_expiry,
        autoscaling_enabled: autoscaler.is_some(),
        cpu_target,
        memory_target,
        min_replicas,
        max_replicas,
        desired_replicas,
        ready_replicas,
        deployed_at,
        deployed_by,
    })
}

fn optional<T>(res: Result<T, k8s::Error>) -> Result<Option<T>, k8s::Error> {
    match res {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

fn utilization_target(hpa: &HorizontalPodAutoscaler, resource: &str) -> Option<i32> {
    hpa.spec
        .as_ref()?
        .metrics
        .as_ref()?
        .iter()
        .filter_map(|m| m.resource.as_ref())
        .find(|r| r.name == resource)
        .and_then(|r| r.target.average_utilization)
}
