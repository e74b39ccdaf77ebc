use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path segments below the API base URL, e.g. `["api", "tasks", "t1"]`.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new<I, S>(method: HttpMethod, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    /// Bodies that are not JSON are kept as a string; empty bodies are null.
    pub fn from_raw(status: u16, raw: &str) -> Self {
        let body = if raw.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        };
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn error_message(&self) -> String {
        self.body
            .get("message")
            .or_else(|| self.body.get("error"))
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("http {}", self.status))
    }
}

/// Sends one request. Any HTTP status is a successful send; only failures to
/// get a response at all are errors (`InfraError::Network`).
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer_token: Option<&str>,
    ) -> Result<ApiResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestApiTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "api base url cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed building http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, request: &ApiRequest) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            for segment in &request.segments {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ApiTransport for ReqwestApiTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer_token: Option<&str>,
    ) -> Result<ApiResponse, InfraError> {
        let endpoint = self.endpoint(request)?;
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(endpoint),
            HttpMethod::Post => self.client.post(endpoint),
            HttpMethod::Put => self.client.put(endpoint),
            HttpMethod::Patch => self.client.patch(endpoint),
            HttpMethod::Delete => self.client.delete(endpoint),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            InfraError::Network(format!(
                "network error during {} {}: {error}",
                request.method.as_str(),
                request.path()
            ))
        })?;

        let status = response.status().as_u16();
        let raw = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading response body: {error}"))
        })?;

        Ok(ApiResponse::from_raw(status, &raw))
    }
}
