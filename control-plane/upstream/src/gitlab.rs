use loco_control_plane_core::registry::{DeployToken, RegistryError, RegistryTokens, TokenRequest};

const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Clone)]
pub struct GitlabRegistryConfig {
    /// Base URL of the GitLab API host, e.g. `https://gitlab.com`.
    pub url: String,
    pub project_id: String,

    /// The registry host that minted tokens authenticate against.
    pub registry_url: String,

    /// Personal access token allowed to create deploy tokens.
    pub personal_access_token: String,
}

/// Mints project deploy tokens.
#[derive(Clone)]
pub struct GitlabRegistry {
    client: reqwest::Client,
    tokens_url: String,
    registry_url: String,
    personal_access_token: String,
}

// === impl GitlabRegistryConfig ===

impl std::fmt::Debug for GitlabRegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabRegistryConfig")
            .field("url", &self.url)
            .field("project_id", &self.project_id)
            .field("registry_url", &self.registry_url)
            .finish_non_exhaustive()
    }
}

// === impl GitlabRegistry ===

impl GitlabRegistry {
    pub fn new(config: GitlabRegistryConfig) -> reqwest::Result<Self> {
        let GitlabRegistryConfig {
            url,
            project_id,
            registry_url,
            personal_access_token,
        } = config;
        Ok(Self {
            client: super::client()?,
            tokens_url: format!(
                "{}/api/v4/projects/{}/deploy_tokens",
                url.trim_end_matches('/'),
                project_id
            ),
            registry_url,
            personal_access_token,
        })
    }

    fn request(&self, req: &TokenRequest) -> reqwest::Result<reqwest::Request> {
        self.client
            .post(&self.tokens_url)
            .header(PRIVATE_TOKEN_HEADER, &self.personal_access_token)
            .json(req)
            .build()
    }
}

impl std::fmt::Debug for GitlabRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabRegistry")
            .field("tokens_url", &self.tokens_url)
            .field("registry_url", &self.registry_url)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RegistryTokens for GitlabRegistry {
    fn registry_url(&self) -> &str {
        &self.registry_url
    }

    async fn mint(&self, req: TokenRequest) -> Result<DeployToken, RegistryError> {
        tracing::debug!(name = %req.name, expires_at = %req.expires_at, "Minting deploy token");
        let http = self
            .request(&req)
            .map_err(|e| RegistryError::Transport(e.into()))?;
        let rsp = self
            .client
            .execute(http)
            .await
            .map_err(|e| RegistryError::Transport(e.into()))?;

        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        rsp.json::<DeployToken>().await.map_err(|e| {
            if e.is_decode() {
                RegistryError::Decode(e.into())
            } else {
                RegistryError::Transport(e.into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{self, Response};
    use chrono::{TimeZone, Utc};
    use loco_control_plane_core::registry::Scope;

    fn registry() -> GitlabRegistry {
        registry_at("https://gitlab.com/")
    }

    fn registry_at(url: &str) -> GitlabRegistry {
        GitlabRegistry::new(GitlabRegistryConfig {
            url: url.to_string(),
            project_id: "42".to_string(),
            registry_url: "registry.gitlab.com".to_string(),
            personal_access_token: "glpat-xyz".to_string(),
        })
        .expect("client must build")
    }

    fn pull_token() -> TokenRequest {
        TokenRequest {
            name: "loco-deploy-token-hello-alice".to_string(),
            scopes: vec![Scope::ReadRegistry],
            expires_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn builds_token_request() {
        let registry = registry();
        let req = registry
            .request(&pull_token())
            .expect("request must build");

        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(
            req.url().as_str(),
            "https://gitlab.com/api/v4/projects/42/deploy_tokens"
        );
        assert_eq!(
            req.headers()
                .get(PRIVATE_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("glpat-xyz")
        );

        let body = req
            .body()
            .and_then(|b| b.as_bytes())
            .expect("body must be buffered");
        let body: serde_json::Value = serde_json::from_slice(body).expect("body must be json");
        assert_eq!(
            body,
            serde_json::json!({
                "name": "loco-deploy-token-hello-alice",
                "scopes": ["read_registry"],
                "expires_at": "2024-02-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn decodes_deploy_token() {
        let token: DeployToken = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "loco-deploy-token-hello-alice",
            "username": "gitlab+deploy-token-7",
            "token": "s3cret",
            "expires_at": "2024-02-01T00:00:00.000Z",
            "revoked": false,
            "expired": false,
            "scopes": ["read_registry"],
        }))
        .expect("token must parse");
        assert_eq!(token.username, "gitlab+deploy-token-7");
        assert_eq!(token.scopes, vec![Scope::ReadRegistry]);
        assert!(token.expires_at.is_some());
    }

    #[test]
    fn debug_omits_secrets() {
        let registry = registry();
        assert!(!format!("{registry:?}").contains("glpat"));
    }

    #[tokio::test]
    async fn mints_tokens() {
        let srv = test_server::serve(Response::new(
            201,
            r#"{"id":7,"username":"gitlab+deploy-token-7","token":"s3cret","scopes":["read_registry"]}"#,
        ))
        .await;
        let registry = registry_at(&srv.url);

        let token = registry.mint(pull_token()).await.expect("token must be minted");
        assert_eq!(token.username, "gitlab+deploy-token-7");
        assert_eq!(token.token, "s3cret");

        let heads = srv.heads();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].starts_with("post /api/v4/projects/42/deploy_tokens http/1.1"));
        assert!(heads[0].contains("private-token: glpat-xyz"));
    }

    #[tokio::test]
    async fn error_statuses_carry_the_body() {
        let srv = test_server::serve(Response::new(500, r#"{"message":"boom"}"#)).await;
        let registry = registry_at(&srv.url);

        match registry.mint(pull_token()).await {
            Err(RegistryError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, r#"{"message":"boom"}"#);
            }
            res => panic!("unexpected result: {res:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_responses_fail_to_decode() {
        let srv = test_server::serve(Response::new(201, "[1, 2")).await;
        let registry = registry_at(&srv.url);

        assert!(matches!(
            registry.mint(pull_token()).await,
            Err(RegistryError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_registry_is_a_transport_error() {
        let registry = registry_at(&test_server::closed().await);

        assert!(matches!(
            registry.mint(pull_token()).await,
            Err(RegistryError::Transport(_))
        ));
    }
}
