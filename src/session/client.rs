//! HTTP client for the auth API as used by the session manager.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::auth::dto::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest, UserResponse};
use crate::auth::repo_types::{Role, SafeUser};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach auth service: {0}")]
    Connectivity(#[from] reqwest::Error),

    /// The service answered with a failure envelope.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response from auth service: {0}")]
    Malformed(String),
}

impl ClientError {
    /// The service no longer accepts the token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ClientError::Rejected { status, .. } if *status == StatusCode::UNAUTHORIZED.as_u16()
        )
    }
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str, role: Role)
        -> Result<AuthResponse, ClientError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ClientError>;

    async fn me(&self, token: &str) -> Result<SafeUser, ClientError>;

    async fn logout(&self, token: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Deserialize)]
struct FailureEnvelope {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<FailureEnvelope>(&body)
            .ok()
            .and_then(|f| f.message)
            .unwrap_or_else(|| status.to_string());
        debug!(%status, %message, "auth request rejected");
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| ClientError::Malformed(e.to_string()))
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<AuthResponse, ClientError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            role: role.as_str().to_string(),
        };
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&request)
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(request)
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn me(&self, token: &str) -> Result<SafeUser, ClientError> {
        let response = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        let body: UserResponse = read_envelope(response).await?;
        Ok(body.user)
    }

    async fn logout(&self, token: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(token)
            .send()
            .await?;
        let _: MessageResponse = read_envelope(response).await?;
        Ok(())
    }
}
