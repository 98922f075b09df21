use chrono::{DateTime, Utc};

pub const UNKNOWN: &str = "Unknown";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    Pending,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Health {
    Passing,
    Degraded,
}

/// A point-in-time view of a deployed app.
#[derive(Clone, Debug, PartialEq)]
pub struct AppStatus {
    pub phase: Phase,
    pub pods: i32,
    pub health: Health,
    pub hostname: String,

    /// Formatted expiry of the app's certificate, or [`UNKNOWN`].
    pub certificate_expiry: String,

    pub autoscaling_enabled: bool,
    pub cpu_target: Option<i32>,
    pub memory_target: Option<i32>,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub deployed_at: Option<DateTime<Utc>>,
    pub deployed_by: String,
}

// === impl Phase ===

impl Phase {
    pub fn from_replicas(desired: i32, ready: i32) -> Self {
        if ready == desired {
            Self::Running
        } else {
            Self::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Pending => "Pending",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Health ===

impl Health {
    /// Degraded if any pod is not ready.
    pub fn from_pods(ready: impl IntoIterator<Item = bool>) -> Self {
        if ready.into_iter().all(|r| r) {
            Self::Passing
        } else {
            Self::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "Passing",
            Self::Degraded => "Degraded",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

pub fn format_expiry(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d").to_string()
}
