use chrono::{NaiveDateTime, Utc};
use loco_control_plane_core::identity::{Identity, IdentityError, IdentityProvider};
use reqwest::header::{HeaderMap, ACCEPT};
use serde::Deserialize;
use std::time::Duration;

const MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Set on responses to requests made with an expiring token.
const TOKEN_EXPIRATION_HEADER: &str = "github-authentication-token-expiration";

/// Resolves bearer tokens to GitHub logins.
#[derive(Clone, Debug)]
pub struct GithubIdentity {
    client: reqwest::Client,
    user_url: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

// === impl GithubIdentity ===

impl GithubIdentity {
    pub fn new(api_url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            client: super::client()?,
            user_url: format!("{}/user", api_url.trim_end_matches('/')),
        })
    }

    fn request(&self, token: &str) -> reqwest::Result<reqwest::Request> {
        self.client
            .get(&self.user_url)
            .bearer_auth(token)
            .header(ACCEPT, MEDIA_TYPE)
            .header(API_VERSION_HEADER, API_VERSION)
            .build()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GithubIdentity {
    async fn identify(&self, token: &str) -> Result<Identity, IdentityError> {
        let req = self
            .request(token)
            .map_err(|e| IdentityError::Transport(e.into()))?;
        let rsp = self
            .client
            .execute(req)
            .await
            .map_err(|e| IdentityError::Transport(e.into()))?;

        let status = rsp.status();
        if !status.is_success() {
            tracing::debug!(%status, "Identity provider rejected token");
            return Err(IdentityError::Rejected(status.as_u16()));
        }

        let expires_in = expires_in(rsp.headers());
        let user = rsp.json::<User>().await.map_err(|e| {
            if e.is_decode() {
                IdentityError::Decode(e.into())
            } else {
                IdentityError::Transport(e.into())
            }
        })?;
        identity(user, expires_in)
    }
}

fn identity(user: User, expires_in: Option<Duration>) -> Result<Identity, IdentityError> {
    let username = user.login.trim();
    if username.is_empty() {
        return Err(IdentityError::Decode("response has an empty login".into()));
    }
    Ok(Identity {
        username: username.to_string(),
        expires_in,
    })
}

fn expires_in(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(TOKEN_EXPIRATION_HEADER)?.to_str().ok()?;
    let at = NaiveDateTime::parse_from_str(value.trim_end_matches(" UTC"), "%Y-%m-%d %H:%M:%S")
        .ok()?
        .and_utc();
    (at - Utc::now()).to_std().ok()
}
