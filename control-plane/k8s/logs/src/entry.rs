use crate::ContainerRef;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static ERROR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)error|fatal|panic").expect("error pattern must compile"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub message: String,
    pub is_error: bool,
}

impl LogEntry {
    /// Builds an entry from a raw log line.
    ///
    /// With `timestamps`, the RFC3339 prefix before the first space becomes the
    /// entry's timestamp. Otherwise, or if the prefix doesn't parse, the
    /// receive time is used and the line is kept whole.
    pub fn parse(
        target: &ContainerRef,
        line: &str,
        timestamps: bool,
        received: DateTime<Utc>,
    ) -> Self {
        let (timestamp, message) = timestamps
            .then(|| line.split_once(' '))
            .flatten()
            .and_then(|(prefix, rest)| {
                DateTime::parse_from_rfc3339(prefix)
                    .ok()
                    .map(|t| (t.with_timezone(&Utc), rest))
            })
            .unwrap_or((received, line));

        Self {
            timestamp,
            namespace: target.namespace.clone(),
            pod: target.pod.clone(),
            container: target.container.clone(),
            message: message.to_string(),
            is_error: ERROR_PATTERN.is_match(message),
        }
    }
}
