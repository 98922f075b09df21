use crate::{
    labels::{self, Labels},
    validation::{validate_app_name, validate_dns_label},
    DeploymentIntent, Platform, ValidationError,
};
use chrono::{DateTime, Utc};

const REGISTRY_SECRET_SUFFIX: &str = "-registry-credentials";

/// Identifies one user's app: the name of every app-scoped object and the
/// namespace that holds them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppRef {
    pub name: String,
    pub namespace: String,
}

/// Everything derived from an intent and its authenticated owner.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentContext {
    pub app: AppRef,
    pub owner: String,
    pub intent: DeploymentIntent,
    pub labels: Labels,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

/// `lowercase(trim(app)) + "-" + lowercase(trim(user))`
pub fn namespace(app: &str, user: &str) -> String {
    format!(
        "{}-{}",
        app.trim().to_lowercase(),
        user.trim().to_lowercase()
    )
}

pub fn registry_secret_name(app: &str) -> String {
    format!("{app}{REGISTRY_SECRET_SUFFIX}")
}

// === impl AppRef ===

impl AppRef {
    /// Resolves the app `name` owned by `user`.
    ///
    /// Callers never name a namespace directly.
    pub fn new(name: &str, user: &str) -> Result<Self, ValidationError> {
        validate_app_name(name)?;
        let namespace = namespace(name, user);
        if user.trim().is_empty() {
            return Err(ValidationError::InvalidUser(user.to_string()));
        }
        if !validate_dns_label(&namespace) {
            if namespace.len() > 63 {
                return Err(ValidationError::NamespaceTooLong(namespace));
            }
            return Err(ValidationError::InvalidUser(user.to_string()));
        }
        Ok(Self {
            name: name.trim().to_lowercase(),
            namespace,
        })
    }

    pub fn registry_secret_name(&self) -> String {
        registry_secret_name(&self.name)
    }

    pub fn instance_selector(&self) -> String {
        labels::instance_selector(&self.namespace)
    }
}

impl std::fmt::Display for AppRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl DeploymentContext ===

impl DeploymentContext {
    /// Validates `intent` and derives every name, label and hostname the
    /// deployment needs.
    pub fn new(
        intent: DeploymentIntent,
        owner: &str,
        platform: &Platform,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        intent.validate(platform)?;
        let app = AppRef::new(&intent.name, owner)?;
        let owner = owner.trim().to_string();

        let labels = Labels::from([
            (labels::NAME.to_string(), app.name.clone()),
            (labels::INSTANCE.to_string(), app.namespace.clone()),
            (labels::VERSION.to_string(), labels::image_version(&intent.image)),
            (
                labels::COMPONENT.to_string(),
                labels::COMPONENT_VALUE.to_string(),
            ),
            (labels::PART_OF.to_string(), labels::PART_OF_VALUE.to_string()),
            (
                labels::MANAGED_BY.to_string(),
                labels::MANAGED_BY_VALUE.to_string(),
            ),
            (labels::CREATED_FOR.to_string(), owner.clone()),
            (labels::CREATED_AT.to_string(), labels::timestamp(now)),
        ]);
        let hostname = format!("{}.{}", intent.subdomain, platform.domain);

        Ok(Self {
            app,
            owner,
            intent,
            labels,
            hostname,
            created_at: now,
        })
    }

    pub fn name(&self) -> &str {
        &self.app.name
    }

    pub fn namespace(&self) -> &str {
        &self.app.namespace
    }

    pub fn registry_secret_name(&self) -> String {
        self.app.registry_secret_name()
    }

    /// Labels that select the app's pods. A subset of [`Self::labels`].
    pub fn selector(&self) -> Labels {
        Labels::from([
            (labels::NAME.to_string(), self.app.name.clone()),
            (labels::INSTANCE.to_string(), self.app.namespace.clone()),
        ])
    }
}
