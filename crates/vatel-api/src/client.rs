use crate::{
    error::ApiError,
    models::{Agent, SessionToken, SessionTokenResponse},
};
use reqwest::{Response, StatusCode, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.vatel.ai";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SESSION_TOKEN_PATH: &str = "/v1/session-token";
const AGENTS_PATH: &str = "/v1/agents";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Client for the Vatel REST API. Every request carries the API key as a
/// bearer token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        match Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ApiError::InvalidBaseUrl(config.base_url)),
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
        })
    }

    /// Issues a session token for `agent_id`.
    #[instrument(skip(self))]
    pub async fn session_token(&self, agent_id: &str) -> Result<SessionToken, ApiError> {
        let response = self
            .http
            .post(self.url(SESSION_TOKEN_PATH))
            .query(&[("agentId", agent_id)])
            .bearer_auth(self.api_key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let response: SessionTokenResponse = check_status(response).await?.json().await?;
        debug!("Session token issued.");
        Ok(response.into())
    }

    /// Lists the agents visible to the API key.
    #[instrument(skip(self))]
    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        let response = self
            .http
            .get(self.url(AGENTS_PATH))
            .bearer_auth(self.api_key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let agents: Vec<Agent> = check_status(response).await?.json().await?;
        debug!(count = agents.len(), "Agents listed.");
        Ok(agents)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth { status, body },
        _ => ApiError::Status { status, body },
    })
}
