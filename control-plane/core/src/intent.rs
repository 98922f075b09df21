use std::collections::BTreeMap;

/// Everything a client asks for when it deploys an app.
///
/// An intent is immutable for the lifetime of the request that carries it and
/// must pass [`DeploymentIntent::validate`] before any cluster object is
/// written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentIntent {
    pub name: String,
    pub subdomain: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    pub replicas: Replicas,
    pub autoscaling: Autoscaling,
    pub health: HealthCheck,
    pub routing: Routing,
    pub observability: Observability,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu: String,
    pub memory: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Replicas {
    pub min: i32,
    pub max: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Autoscaling {
    pub enabled: bool,
    pub cpu_target: Option<i32>,
    pub memory_target: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub grace_period_seconds: i32,
    pub failure_threshold: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routing {
    pub path_prefix: String,
    pub port: u32,
    pub idle_timeout_seconds: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observability {
    pub logging_enabled: bool,
    pub metrics: Metrics,
    pub tracing: Tracing,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    pub enabled: bool,
    pub path: String,
    pub port: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tracing {
    pub enabled: bool,
    pub sample_rate: f64,
}

/// Failure threshold used when a health check leaves it unset.
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 3;

// === impl DeploymentIntent ===

impl DeploymentIntent {
    /// The container port traffic is routed to.
    pub fn container_port(&self) -> i32 {
        // Validation bounds the port to [1024, 65535].
        self.routing.port as i32
    }
}

// === impl Replicas ===

impl Default for Replicas {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

// === impl HealthCheck ===

impl HealthCheck {
    pub fn failure_threshold(&self) -> i32 {
        if self.failure_threshold > 0 {
            self.failure_threshold
        } else {
            DEFAULT_FAILURE_THRESHOLD
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            grace_period_seconds: 0,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

// === impl Routing ===

impl Default for Routing {
    fn default() -> Self {
        Self {
            path_prefix: "/".to_string(),
            port: 8080,
            idle_timeout_seconds: 0,
        }
    }
}
