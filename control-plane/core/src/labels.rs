//! Label and annotation keys applied to every object the platform creates.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

pub const NAME: &str = "app.loco.io/name";
pub const INSTANCE: &str = "app.loco.io/instance";
pub const VERSION: &str = "app.loco.io/version";
pub const COMPONENT: &str = "app.loco.io/component";
pub const PART_OF: &str = "app.loco.io/part-of";
pub const MANAGED_BY: &str = "app.loco.io/managed-by";
pub const CREATED_FOR: &str = "app.loco.io/created-for";
pub const CREATED_AT: &str = "app.loco.io/created-at";

/// Namespaces without this label are not routed to by the shared gateway.
pub const EXPOSE_VIA_GATEWAY: &str = "app.loco.io/expose-via-gateway";

/// Pod template annotation bumped to force a rollout.
pub const RESTARTED_AT: &str = "app.loco.io/restarted-at";

pub const COMPONENT_VALUE: &str = "application";
pub const PART_OF_VALUE: &str = "loco-platform";
pub const MANAGED_BY_VALUE: &str = "loco";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MAX_VALUE_LEN: usize = 63;

pub type Labels = BTreeMap<String, String>;

/// Formats a time as a label-safe `YYYYMMDDTHHMMSSZ` value.
pub fn timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Derives the version label from an image reference's tag.
///
/// Digests and missing tags yield `latest`. The tag is reduced to characters
/// permitted in a label value.
pub fn image_version(image: &str) -> String {
    let image = image.split('@').next().unwrap_or_default();
    // A colon before the last slash belongs to a registry port.
    let tag = match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag,
        _ => "",
    };

    let sanitized = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_VALUE_LEN)
        .collect::<String>();
    let sanitized = sanitized.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if sanitized.is_empty() {
        "latest".to_string()
    } else {
        sanitized.to_string()
    }
}

/// The label selector matching every pod of the app deployed into `namespace`.
pub fn instance_selector(namespace: &str) -> String {
    format!("{INSTANCE}={namespace}")
}
