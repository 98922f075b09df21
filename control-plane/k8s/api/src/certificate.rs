//! The subset of cert-manager's `Certificate` that status reporting reads.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    status = "CertificateStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    pub not_after: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub renewal_time: Option<DateTime<Utc>>,
}

impl Certificate {
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.not_after)
    }
}
