use loco_control_plane_core::{identity::IdentityError, ValidationError};
use loco_control_plane_deploy::Error;
use loco_control_plane_k8s_api as k8s;

pub(crate) fn status(error: Error) -> tonic::Status {
    match error {
        Error::Invalid(error) => invalid(error),
        Error::MissingScaleArguments => tonic::Status::invalid_argument(error.to_string()),
        Error::Kube(error) => kube_status(error),
        Error::Registry(error) => {
            tracing::warn!(%error, "Registry request failed");
            tonic::Status::internal(format!("failed to mint registry token: {error}"))
        }
        Error::CreateTimedOut(_) => tonic::Status::deadline_exceeded(error.to_string()),
        Error::Interrupted => tonic::Status::aborted(error.to_string()),
    }
}

pub(crate) fn invalid(error: ValidationError) -> tonic::Status {
    tonic::Status::invalid_argument(error.to_string())
}

fn kube_status(error: k8s::Error) -> tonic::Status {
    match error {
        k8s::Error::NotFound { .. } => tonic::Status::not_found(error.to_string()),
        k8s::Error::AlreadyExists { .. } => tonic::Status::already_exists(error.to_string()),
        k8s::Error::Api { .. } => {
            tracing::warn!(%error, "Cluster request failed");
            tonic::Status::internal(error.to_string())
        }
    }
}

pub(crate) fn identity_status(error: IdentityError) -> tonic::Status {
    match error {
        IdentityError::Rejected(_) => tonic::Status::unauthenticated("could not confirm identity"),
        error => {
            tracing::warn!(%error, "Identity lookup failed");
            tonic::Status::internal("failed to confirm identity")
        }
    }
}

pub(crate) fn deadline_exceeded() -> tonic::Status {
    tonic::Status::deadline_exceeded("request deadline exceeded")
}
