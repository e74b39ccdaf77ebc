use crate::domain::models::LoginCredentials;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub endpoint: String,
    pub credentials: LoginCredentials,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub endpoint: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Token endpoints of the API. Rejections (bad credentials, revoked or
/// expired refresh token) are `InfraError::Auth`; anything that might
/// succeed on a later attempt is `InfraError::Network`.
#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn login(&self, request: LoginRequest) -> Result<AuthTokenResponse, InfraError>;

    async fn refresh(&self, request: RefreshRequest) -> Result<AuthTokenResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponsePayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(alias = "expires_in")]
    expires_in: Option<i64>,
    error: Option<String>,
    message: Option<String>,
}

impl ReqwestAuthClient {
    /// `timeout` bounds each exchange, including reading the body.
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed building auth client: {error}")))?;
        Ok(Self { client })
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<AuthTokenResponse, InfraError> {
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("token request failed: {error}")))?;

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading token response: {error}")))?;

        parse_token_response(status, &raw)
    }
}

fn parse_token_response(status: u16, raw: &str) -> Result<AuthTokenResponse, InfraError> {
    if status >= 500 {
        return Err(InfraError::Network(format!(
            "token endpoint unavailable: http {status}"
        )));
    }

    let parsed = serde_json::from_str::<TokenResponsePayload>(raw).map_err(|error| {
        InfraError::Auth(format!("invalid token response payload (http {status}): {error}"))
    })?;

    if !(200..300).contains(&status) || parsed.error.is_some() {
        let code = parsed.error.unwrap_or_else(|| format!("http_{status}"));
        let detail = parsed.message.unwrap_or_default();
        return Err(InfraError::Auth(format!("token endpoint error: {code}; {detail}")));
    }

    let access_token = parsed
        .access_token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::Auth("token response did not include accessToken".to_string()))?;

    Ok(AuthTokenResponse {
        access_token,
        refresh_token: parsed
            .refresh_token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        expires_in: parsed.expires_in.map(|value| value.max(0)),
    })
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn login(&self, request: LoginRequest) -> Result<AuthTokenResponse, InfraError> {
        self.post_json(
            &request.endpoint,
            &serde_json::json!({
                "email": request.credentials.email,
                "password": request.credentials.password,
            }),
        )
        .await
    }

    async fn refresh(&self, request: RefreshRequest) -> Result<AuthTokenResponse, InfraError> {
        self.post_json(
            &request.endpoint,
            &serde_json::json!({ "refreshToken": request.refresh_token }),
        )
        .await
    }
}
