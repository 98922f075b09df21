//! HTTP clients for the services the control plane depends on: the OAuth
//! identity provider that vouches for client tokens and the container
//! registry that mints image pull tokens.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod github;
mod gitlab;

#[cfg(test)]
mod test_server;

pub use self::{
    github::GithubIdentity,
    gitlab::{GitlabRegistry, GitlabRegistryConfig},
};
pub use loco_control_plane_core::{identity::IdentityError, registry::RegistryError};

use std::time::Duration;

/// Bounds every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("loco-control-plane/", env!("CARGO_PKG_VERSION"));

fn client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
}
