//! Fakes shared by the unit tests of the application layer.

use crate::domain::models::AuthTokens;
use crate::infrastructure::api_transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::infrastructure::auth_client::{
    AuthHttpClient, AuthTokenResponse, LoginRequest, RefreshRequest,
};
use crate::infrastructure::credential_store::{CredentialStore, InMemoryCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::realtime_channel::{RealtimeChannel, RealtimeConnector};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T08:00:00Z")
        .expect("valid datetime")
        .with_timezone(&Utc)
}

/// Tokens whose access token expires `seconds` after `fixed_now()`.
pub fn expiring_tokens(access: &str, refresh: &str, seconds: i64) -> AuthTokens {
    AuthTokens {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        access_expires_at: Some(fixed_now() + Duration::seconds(seconds)),
    }
}

#[derive(Debug, Default)]
pub struct RecordingCredentialStore {
    inner: InMemoryCredentialStore,
    fail_save: AtomicBool,
    fail_load: AtomicBool,
    load_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl RecordingCredentialStore {
    pub fn seeded(tokens: AuthTokens) -> Self {
        Self {
            inner: InMemoryCredentialStore::with_tokens(tokens),
            ..Self::default()
        }
    }

    pub fn fail_saves(&self) {
        self.fail_save.store(true, Ordering::SeqCst);
    }

    pub fn fail_loads(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl CredentialStore for RecordingCredentialStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(InfraError::Credential("keychain locked".to_string()));
        }
        self.inner.save_tokens(tokens)
    }

    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(InfraError::Credential("keychain unavailable".to_string()));
        }
        self.inner.load_tokens()
    }

    fn delete_tokens(&self) -> Result<(), InfraError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_tokens()
    }
}

#[derive(Debug, Clone)]
pub enum FakeAuthResponse {
    Tokens(AuthTokenResponse),
    Rejected,
    Unavailable,
}

impl FakeAuthResponse {
    pub fn tokens(access: &str, refresh: Option<&str>, expires_in: i64) -> Self {
        Self::Tokens(AuthTokenResponse {
            access_token: access.to_string(),
            refresh_token: refresh.map(ToOwned::to_owned),
            expires_in: Some(expires_in),
        })
    }

    fn into_result(self) -> Result<AuthTokenResponse, InfraError> {
        match self {
            Self::Tokens(response) => Ok(response),
            Self::Rejected => Err(InfraError::Auth("invalid_grant".to_string())),
            Self::Unavailable => Err(InfraError::Network("connection reset".to_string())),
        }
    }
}

impl Default for FakeAuthResponse {
    fn default() -> Self {
        Self::tokens("fake-access", Some("fake-refresh"), 3600)
    }
}

#[derive(Debug, Default)]
pub struct FakeAuthClient {
    refresh_responses: Mutex<VecDeque<FakeAuthResponse>>,
    refresh_delay_ms: u64,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
}

impl FakeAuthClient {
    pub fn with_refresh_responses(responses: Vec<FakeAuthResponse>) -> Self {
        Self {
            refresh_responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn with_refresh_delay_ms(mut self, delay_ms: u64) -> Self {
        self.refresh_delay_ms = delay_ms;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token
            .lock()
            .expect("refresh token lock poisoned")
            .clone()
    }
}

#[async_trait]
impl AuthHttpClient for FakeAuthClient {
    async fn login(&self, _request: LoginRequest) -> Result<AuthTokenResponse, InfraError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        FakeAuthResponse::tokens("login-access", Some("login-refresh"), 3600).into_result()
    }

    async fn refresh(&self, request: RefreshRequest) -> Result<AuthTokenResponse, InfraError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_refresh_token
            .lock()
            .expect("refresh token lock poisoned") = Some(request.refresh_token);
        if self.refresh_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.refresh_delay_ms)).await;
        }
        let response = self
            .refresh_responses
            .lock()
            .expect("refresh response lock poisoned")
            .pop_front()
            .unwrap_or_default();
        response.into_result()
    }
}

#[derive(Debug, Clone)]
pub enum FakeSend {
    Status(u16, serde_json::Value),
    NetworkError,
}

impl FakeSend {
    pub fn ok() -> Self {
        Self::Status(200, serde_json::json!({ "ok": true }))
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<FakeSend>>,
    sent: Mutex<Vec<(ApiRequest, Option<String>)>>,
    send_delay_ms: u64,
}

impl FakeTransport {
    pub fn with_responses(responses: Vec<FakeSend>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Holds every response for `delay_ms` after the request is recorded.
    pub fn with_send_delay_ms(mut self, delay_ms: u64) -> Self {
        self.send_delay_ms = delay_ms;
        self
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().expect("sent lock poisoned").len()
    }

    pub fn sent_tokens(&self) -> Vec<Option<String>> {
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<ApiRequest> {
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer_token: Option<&str>,
    ) -> Result<ApiResponse, InfraError> {
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .push((request.clone(), bearer_token.map(ToOwned::to_owned)));
        if self.send_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.send_delay_ms)).await;
        }
        let next = self
            .responses
            .lock()
            .expect("response lock poisoned")
            .pop_front()
            .unwrap_or_else(FakeSend::ok);
        match next {
            FakeSend::Status(status, body) => Ok(ApiResponse { status, body }),
            FakeSend::NetworkError => Err(InfraError::Network("connection refused".to_string())),
        }
    }
}

/// Each connection yields its scripted messages and then closes.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    connections: Mutex<VecDeque<Result<Vec<String>, String>>>,
    connect_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<Option<String>>>,
    open_channels: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn with_connections(connections: Vec<Result<Vec<String>, String>>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            ..Self::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens_seen.lock().expect("tokens lock poisoned").clone()
    }

    /// Channels handed out and not yet dropped.
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    fn open_guard(&self) -> OpenGuard {
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        OpenGuard(Arc::clone(&self.open_channels))
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedChannel {
    messages: VecDeque<String>,
    _open: OpenGuard,
}

#[async_trait]
impl RealtimeChannel for ScriptedChannel {
    async fn next_message(&mut self) -> Result<Option<String>, InfraError> {
        Ok(self.messages.pop_front())
    }
}

/// Stays open without yielding, like an idle server.
struct IdleChannel {
    _open: OpenGuard,
}

#[async_trait]
impl RealtimeChannel for IdleChannel {
    async fn next_message(&mut self) -> Result<Option<String>, InfraError> {
        std::future::pending::<()>().await;
        Ok(None)
    }
}

#[async_trait]
impl RealtimeConnector for ScriptedConnector {
    async fn connect(
        &self,
        access_token: Option<String>,
    ) -> Result<Box<dyn RealtimeChannel>, InfraError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .expect("tokens lock poisoned")
            .push(access_token);
        let next = self
            .connections
            .lock()
            .expect("connection lock poisoned")
            .pop_front();
        match next {
            Some(Ok(messages)) => Ok(Box::new(ScriptedChannel {
                messages: messages.into(),
                _open: self.open_guard(),
            })),
            Some(Err(message)) => Err(InfraError::Realtime(message)),
            None => Ok(Box::new(IdleChannel {
                _open: self.open_guard(),
            })),
        }
    }
}
