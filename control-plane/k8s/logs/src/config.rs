use crate::{Error, LogEntry};
use chrono::{DateTime, Utc};
use kube::api::LogParams;
use std::{fmt, sync::Arc};

/// Output capacity used when none is configured.
pub const DEFAULT_BUFFER: usize = 100;

/// An entry is only emitted if every filter accepts it.
pub type Filter = Arc<dyn Fn(&LogEntry) -> bool + Send + Sync>;

/// Transforms are applied in order to every accepted entry.
pub type Transform = Arc<dyn Fn(LogEntry) -> LogEntry + Send + Sync>;

#[derive(Clone)]
pub struct Config {
    /// Watches all namespaces when unset.
    pub namespace: Option<String>,
    pub selector: Option<String>,

    /// Only these containers are followed. Empty means all of them.
    pub containers: Vec<String>,

    pub follow: bool,
    pub previous: bool,
    pub tail_lines: Option<i64>,
    pub since: Option<DateTime<Utc>>,

    /// Requests an RFC3339 timestamp prefix on every line and parses it off.
    pub timestamps: bool,

    pub filters: Vec<Filter>,
    pub transforms: Vec<Transform>,

    /// Capacity of the entries channel.
    pub buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            selector: None,
            containers: Vec::new(),
            follow: true,
            previous: false,
            tail_lines: None,
            since: None,
            timestamps: false,
            filters: Vec::new(),
            transforms: Vec::new(),
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("namespace", &self.namespace)
            .field("selector", &self.selector)
            .field("containers", &self.containers)
            .field("follow", &self.follow)
            .field("previous", &self.previous)
            .field("tail_lines", &self.tail_lines)
            .field("since", &self.since)
            .field("timestamps", &self.timestamps)
            .field("filters", &self.filters.len())
            .field("transforms", &self.transforms.len())
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.buffer == 0 {
            return Err(Error::InvalidConfig("buffer must be positive"));
        }
        if self.tail_lines.is_some_and(|n| n < 0) {
            return Err(Error::InvalidConfig("tail lines must not be negative"));
        }
        if self.containers.iter().any(String::is_empty) {
            return Err(Error::InvalidConfig("container names must not be empty"));
        }
        Ok(())
    }

    pub(crate) fn wants_container(&self, name: &str) -> bool {
        self.containers.is_empty() || self.containers.iter().any(|c| c == name)
    }

    pub(crate) fn log_params(&self, container: &str, now: DateTime<Utc>) -> LogParams {
        LogParams {
            container: Some(container.to_string()),
            follow: self.follow,
            previous: self.previous,
            tail_lines: self.tail_lines,
            // The API rejects non-positive values.
            since_seconds: self.since.map(|t| (now - t).num_seconds().max(1)),
            timestamps: self.timestamps,
            ..Default::default()
        }
    }

    /// Runs the filters then the transforms. Returns `None` if a filter
    /// rejects the entry.
    pub(crate) fn process(&self, entry: LogEntry) -> Option<LogEntry> {
        if !self.filters.iter().all(|accept| accept(&entry)) {
            return None;
        }
        Some(self.transforms.iter().fold(entry, |entry, f| f(entry)))
    }
}
