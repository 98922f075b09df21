use crate::{
    intent::{Autoscaling, HealthCheck, Observability, Replicas, Resources, Routing},
    quantity, DeploymentIntent, Platform,
};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const DNS_LABEL_REGEX: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";
const ENV_NAME_REGEX: &str = r"^[-._a-zA-Z][-._a-zA-Z0-9]*$";
const MAX_DNS_LABEL_LEN: usize = 63;
const MAX_GRACE_PERIOD_SECONDS: i32 = 300;
const MIN_PORT: u32 = 1024;
const MAX_PORT: u32 = 65535;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DNS_LABEL_REGEX).expect("DNS label regex must compile"));
static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ENV_NAME_REGEX).expect("env name regex must compile"));

/// Subdomains that are never handed out to apps.
const RESERVED_SUBDOMAINS: &[&str] = &[
    "api",
    "admin",
    "dashboard",
    "console",
    "login",
    "auth",
    "user",
    "users",
    "support",
    "help",
    "loco",
    "monitoring",
    "metrics",
    "stats",
    "status",
    "health",
    "system",
    "service",
    "services",
    "config",
    "configuration",
    "settings",
    "setup",
    "install",
    "uninstall",
];

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error(
        "app name {0:?} must be a DNS label of at most 63 characters matching {re}",
        re = DNS_LABEL_REGEX
    )]
    InvalidAppName(String),

    #[error(
        "subdomain {0:?} must be a DNS label of at most 63 characters matching {re}",
        re = DNS_LABEL_REGEX
    )]
    InvalidSubdomain(String),

    #[error("subdomain {0:?} is reserved")]
    ReservedSubdomain(String),

    #[error("namespace {0:?} derived from the app and user names is longer than 63 characters")]
    NamespaceTooLong(String),

    #[error("user name {0:?} cannot be used to derive a namespace")]
    InvalidUser(String),

    #[error("an image reference is required")]
    MissingImage,

    #[error("cpu {0:?} is not a valid quantity")]
    InvalidCpu(String),

    #[error("cpu {0:?} exceeds the limit of {max}m", max = quantity::MAX_CPU_MILLIS)]
    CpuAboveLimit(String),

    #[error("memory {0:?} is not a valid quantity")]
    InvalidMemory(String),

    #[error("memory {0:?} exceeds the limit of 1Gi")]
    MemoryAboveLimit(String),

    #[error("minimum replicas must be at least 1, got {0}")]
    MinReplicasTooLow(i32),

    #[error("maximum replicas {max} is less than minimum replicas {min}")]
    MaxReplicasBelowMin { min: i32, max: i32 },

    #[error("replicas {count} exceed the platform limit of {limit}")]
    ReplicasAboveLimit { count: i32, limit: i32 },

    #[error("autoscaling may target cpu or memory utilization, not both")]
    ConflictingAutoscalingTargets,

    #[error("autoscaling target {0} must be between 1 and 100")]
    AutoscalingTargetOutOfRange(i32),

    #[error("health check path {0:?} must begin with '/'")]
    InvalidHealthPath(String),

    #[error("health check interval must be positive, got {0}")]
    InvalidHealthInterval(i32),

    #[error("health check timeout must be positive, got {0}")]
    InvalidHealthTimeout(i32),

    #[error("health check grace period must be between 0 and 300 seconds, got {0}")]
    InvalidGracePeriod(i32),

    #[error("health check failure threshold must not be negative, got {0}")]
    InvalidFailureThreshold(i32),

    #[error("routing path prefix {0:?} must begin with '/'")]
    InvalidPathPrefix(String),

    #[error("port {0} must be between 1024 and 65535")]
    PortOutOfRange(u32),

    #[error("idle timeout must not be negative, got {0}")]
    InvalidIdleTimeout(i32),

    #[error("metrics path {0:?} must begin with '/'")]
    InvalidMetricsPath(String),

    #[error("tracing sample rate {0} must be between 0 and 1")]
    InvalidSampleRate(f64),

    #[error("environment variable name {0:?} must match {re}", re = ENV_NAME_REGEX)]
    InvalidEnvName(String),
}

/// Returns true if apps may not claim `subdomain`.
///
/// The fixed reserved set is matched case-insensitively. A subdomain is also
/// reserved when any of its `-`-separated labels is the platform name, so
/// `loco-app` is rejected while `locofoo-app` is not.
pub fn is_reserved_subdomain(subdomain: &str, platform_name: &str) -> bool {
    let subdomain = subdomain.trim().to_ascii_lowercase();
    if RESERVED_SUBDOMAINS.contains(&subdomain.as_str()) {
        return true;
    }

    let platform_name = platform_name.trim().to_ascii_lowercase();
    !platform_name.is_empty() && subdomain.split('-').any(|label| label == platform_name)
}

pub(crate) fn validate_dns_label(s: &str) -> bool {
    s.len() <= MAX_DNS_LABEL_LEN && DNS_LABEL.is_match(s)
}

// === impl DeploymentIntent ===

impl DeploymentIntent {
    /// Checks every field of the intent against the platform's rules.
    pub fn validate(&self, platform: &Platform) -> Result<(), ValidationError> {
        validate_app_name(&self.name)?;
        validate_subdomain(&self.subdomain, platform)?;
        if self.image.trim().is_empty() {
            return Err(ValidationError::MissingImage);
        }
        validate_env(self.env.keys().map(String::as_str))?;
        self.resources.validate()?;
        self.replicas.validate(platform)?;
        self.autoscaling.validate()?;
        self.health.validate()?;
        self.routing.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

pub fn validate_app_name(name: &str) -> Result<(), ValidationError> {
    if validate_dns_label(name.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAppName(name.to_string()))
    }
}

fn validate_subdomain(subdomain: &str, platform: &Platform) -> Result<(), ValidationError> {
    if !validate_dns_label(subdomain) {
        return Err(ValidationError::InvalidSubdomain(subdomain.to_string()));
    }
    if is_reserved_subdomain(subdomain, &platform.name) {
        return Err(ValidationError::ReservedSubdomain(subdomain.to_string()));
    }
    Ok(())
}

pub fn validate_env<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), ValidationError> {
    for name in names {
        if !ENV_NAME.is_match(name) {
            return Err(ValidationError::InvalidEnvName(name.to_string()));
        }
    }
    Ok(())
}

pub fn validate_cpu(cpu: &str) -> Result<(), ValidationError> {
    let millis =
        quantity::cpu_millis(cpu).ok_or_else(|| ValidationError::InvalidCpu(cpu.to_string()))?;
    if millis == 0 {
        return Err(ValidationError::InvalidCpu(cpu.to_string()));
    }
    if millis > quantity::MAX_CPU_MILLIS {
        return Err(ValidationError::CpuAboveLimit(cpu.to_string()));
    }
    Ok(())
}

pub fn validate_memory(memory: &str) -> Result<(), ValidationError> {
    let bytes = quantity::memory_bytes(memory)
        .ok_or_else(|| ValidationError::InvalidMemory(memory.to_string()))?;
    if bytes == 0 {
        return Err(ValidationError::InvalidMemory(memory.to_string()));
    }
    if bytes > quantity::MAX_MEMORY_BYTES {
        return Err(ValidationError::MemoryAboveLimit(memory.to_string()));
    }
    Ok(())
}

pub fn validate_replica_count(count: i32, platform: &Platform) -> Result<(), ValidationError> {
    if count < 1 {
        return Err(ValidationError::MinReplicasTooLow(count));
    }
    if count > platform.max_replicas {
        return Err(ValidationError::ReplicasAboveLimit {
            count,
            limit: platform.max_replicas,
        });
    }
    Ok(())
}

impl Resources {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_cpu(&self.cpu)?;
        validate_memory(&self.memory)
    }
}

impl Replicas {
    fn validate(&self, platform: &Platform) -> Result<(), ValidationError> {
        let Self { min, max } = *self;
        if min < 1 {
            return Err(ValidationError::MinReplicasTooLow(min));
        }
        if max < min {
            return Err(ValidationError::MaxReplicasBelowMin { min, max });
        }
        validate_replica_count(max, platform)
    }
}

impl Autoscaling {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.cpu_target.is_some() && self.memory_target.is_some() {
            return Err(ValidationError::ConflictingAutoscalingTargets);
        }
        for target in self.cpu_target.iter().chain(&self.memory_target) {
            if !(1..=100).contains(target) {
                return Err(ValidationError::AutoscalingTargetOutOfRange(*target));
            }
        }
        Ok(())
    }
}

impl HealthCheck {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidHealthPath(self.path.clone()));
        }
        if self.interval_seconds <= 0 {
            return Err(ValidationError::InvalidHealthInterval(
                self.interval_seconds,
            ));
        }
        if self.timeout_seconds <= 0 {
            return Err(ValidationError::InvalidHealthTimeout(self.timeout_seconds));
        }
        if !(0..=MAX_GRACE_PERIOD_SECONDS).contains(&self.grace_period_seconds) {
            return Err(ValidationError::InvalidGracePeriod(
                self.grace_period_seconds,
            ));
        }
        if self.failure_threshold < 0 {
            return Err(ValidationError::InvalidFailureThreshold(
                self.failure_threshold,
            ));
        }
        Ok(())
    }
}

impl Routing {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.path_prefix.starts_with('/') {
            return Err(ValidationError::InvalidPathPrefix(self.path_prefix.clone()));
        }
        validate_port(self.port)?;
        if self.idle_timeout_seconds < 0 {
            return Err(ValidationError::InvalidIdleTimeout(
                self.idle_timeout_seconds,
            ));
        }
        Ok(())
    }
}

impl Observability {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.metrics.enabled {
            if !self.metrics.path.starts_with('/') {
                return Err(ValidationError::InvalidMetricsPath(
                    self.metrics.path.clone(),
                ));
            }
            validate_port(self.metrics.port)?;
        }
        if self.tracing.enabled && !(0.0..=1.0).contains(&self.tracing.sample_rate) {
            return Err(ValidationError::InvalidSampleRate(self.tracing.sample_rate));
        }
        Ok(())
    }
}

fn validate_port(port: u32) -> Result<(), ValidationError> {
    if (MIN_PORT..=MAX_PORT).contains(&port) {
        Ok(())
    } else {
        Err(ValidationError::PortOutOfRange(port))
    }
}
