use std::fmt;

/// The kinds of object the platform manages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    Secret,
    ServiceAccount,
    Role,
    RoleBinding,
    Service,
    Deployment,
    HttpRoute,
    Autoscaler,
    Certificate,
    Pod,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Get,
    Replace,
    Delete,
    List,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    #[error("failed to {verb} {kind} {name}: {source}")]
    Api {
        verb: Verb,
        kind: ObjectKind,
        name: String,
        #[source]
        source: kube::Error,
    },
}

// === impl Error ===

impl Error {
    /// Classifies a kube error by the API status it carries.
    pub(crate) fn from_kube(verb: Verb, kind: ObjectKind, name: &str, source: kube::Error) -> Self {
        let name = name.to_string();
        match &source {
            kube::Error::Api(rsp) if rsp.code == 404 => Self::NotFound { kind, name },
            kube::Error::Api(rsp) if rsp.code == 409 && verb == Verb::Create => {
                Self::AlreadyExists { kind, name }
            }
            _ => Self::Api {
                verb,
                kind,
                name,
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::NotFound { kind, .. }
            | Self::AlreadyExists { kind, .. }
            | Self::Api { kind, .. } => *kind,
        }
    }
}

// === impl ObjectKind ===

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Secret => "secret",
            Self::ServiceAccount => "service account",
            Self::Role => "role",
            Self::RoleBinding => "role binding",
            Self::Service => "service",
            Self::Deployment => "deployment",
            Self::HttpRoute => "http route",
            Self::Autoscaler => "horizontal pod autoscaler",
            Self::Certificate => "certificate",
            Self::Pod => "pod",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Verb ===

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Replace => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
        .fmt(f)
    }
}
