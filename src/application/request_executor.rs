use crate::application::error::SyncError;
use crate::application::invalidation::{CacheInvalidationRouter, MutationKind};
use crate::application::token_store::{TokenCheck, TokenStore};
use crate::infrastructure::api_transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::infrastructure::auth_client::AuthHttpClient;
use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::query_cache::QueryCache;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, error, warn};

/// A request rejected with 401 is retried this many times after a token
/// refresh. Independent of `RetryPolicy`.
pub const TOKEN_REFRESH_RETRIES: u8 = 1;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiOperation {
    pub request: ApiRequest,
    pub requires_auth: bool,
    pub mutation: Option<MutationKind>,
}

impl ApiOperation {
    pub fn query(request: ApiRequest) -> Self {
        Self {
            request,
            requires_auth: true,
            mutation: None,
        }
    }

    pub fn mutation(request: ApiRequest, kind: MutationKind) -> Self {
        Self {
            request,
            requires_auth: true,
            mutation: Some(kind),
        }
    }

    pub fn public(request: ApiRequest) -> Self {
        Self {
            request,
            requires_auth: false,
            mutation: None,
        }
    }
}

pub struct RequestExecutor<T, S, C, Q>
where
    T: ApiTransport,
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    Q: QueryCache,
{
    transport: Arc<T>,
    token_store: Arc<TokenStore<S, C>>,
    router: Arc<CacheInvalidationRouter<Q>>,
    retry_policy: RetryPolicy,
}

impl<T, S, C, Q> RequestExecutor<T, S, C, Q>
where
    T: ApiTransport,
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    Q: QueryCache,
{
    pub fn new(
        transport: Arc<T>,
        token_store: Arc<TokenStore<S, C>>,
        router: Arc<CacheInvalidationRouter<Q>>,
    ) -> Self {
        Self {
            transport,
            token_store,
            router,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sends one operation. A 401 is answered with one token refresh and one
    /// retry; a second 401 or a failed refresh ends the session.
    pub async fn execute(&self, operation: &ApiOperation) -> Result<ApiResponse, SyncError> {
        let response = if operation.requires_auth {
            self.send_authenticated(&operation.request).await?
        } else {
            let response = self
                .transport
                .send(&operation.request, None)
                .await
                .map_err(transport_error)?;
            classify(response)?
        };

        if let Some(kind) = operation.mutation {
            // The server already applied the change; a cache failure must not
            // turn it into an error for the caller.
            if let Err(error) = self.router.invalidate_for_mutation(kind) {
                warn!(%error, ?kind, "failed to invalidate query groups after mutation");
            }
        }
        Ok(response)
    }

    /// `execute` under the generic retry policy. Only transient failures are
    /// attempted again.
    pub async fn execute_with_retry(
        &self,
        operation: &ApiOperation,
    ) -> Result<ApiResponse, SyncError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.execute(operation).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!(%error, attempt, delay_ms = delay, "retrying transient failure");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send_authenticated(&self, request: &ApiRequest) -> Result<ApiResponse, SyncError> {
        match self.token_store.check_and_refresh_token().await {
            Ok(TokenCheck::Unauthenticated) => return Err(SyncError::NotAuthenticated),
            Ok(TokenCheck::Fresh | TokenCheck::Refreshed) => {}
            Err(failure) if self.token_store.access_token_expired() => {
                warn!(%failure, "proactive refresh failed with an expired access token");
                return Err(self.expire_session());
            }
            Err(failure) => {
                warn!(%failure, "proactive refresh failed; using the current access token");
            }
        }

        let Some(mut access_token) = self.token_store.access_token() else {
            return Err(SyncError::NotAuthenticated);
        };
        let mut refreshes: u8 = 0;

        loop {
            let response = self
                .transport
                .send(request, Some(&access_token))
                .await
                .map_err(transport_error)?;
            if !response.is_unauthorized() {
                return classify(response);
            }
            if refreshes >= TOKEN_REFRESH_RETRIES {
                warn!(path = %request.path(), "request rejected again after token refresh");
                return Err(self.expire_session());
            }
            refreshes += 1;

            debug!(path = %request.path(), "request unauthorized; refreshing token");
            match self.token_store.refresh_after_rejection(&access_token).await {
                Ok(tokens) => access_token = tokens.access_token,
                Err(failure) => {
                    warn!(%failure, "token refresh after 401 failed");
                    return Err(self.expire_session());
                }
            }
        }
    }

    fn expire_session(&self) -> SyncError {
        if let Err(error) = self.token_store.logout() {
            error!(%error, "failed to clear persisted session");
        }
        warn!("session expired");
        SyncError::SessionExpired
    }
}

fn transport_error(error: InfraError) -> SyncError {
    match error {
        InfraError::Network(message) => SyncError::Transient(message),
        other => SyncError::Infra(other),
    }
}

fn classify(response: ApiResponse) -> Result<ApiResponse, SyncError> {
    if response.is_success() {
        return Ok(response);
    }
    if response.status >= 500 {
        return Err(SyncError::Transient(format!(
            "http {}: {}",
            response.status,
            response.error_message()
        )));
    }
    Err(SyncError::Validation {
        status: response.status,
        message: response.error_message(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::token_store::AuthConfig;
    use crate::domain::models::{QueryGroup, QueryGroupSet};
    use crate::infrastructure::api_transport::HttpMethod;
    use crate::infrastructure::query_cache::InMemoryQueryCache;
    use crate::test_support::{
        expiring_tokens, fixed_now, FakeAuthClient, FakeAuthResponse, FakeSend, FakeTransport,
        RecordingCredentialStore,
    };
    use serde_json::json;

    type TestExecutor =
        RequestExecutor<FakeTransport, RecordingCredentialStore, FakeAuthClient, InMemoryQueryCache>;

    struct Harness {
        executor: TestExecutor,
        transport: Arc<FakeTransport>,
        client: Arc<FakeAuthClient>,
        credentials: Arc<RecordingCredentialStore>,
        token_store: Arc<TokenStore<RecordingCredentialStore, FakeAuthClient>>,
        cache: Arc<InMemoryQueryCache>,
    }

    fn harness(
        credentials: RecordingCredentialStore,
        client: FakeAuthClient,
        responses: Vec<FakeSend>,
    ) -> Harness {
        let credentials = Arc::new(credentials);
        let client = Arc::new(client);
        let transport = Arc::new(FakeTransport::with_responses(responses));
        let cache = Arc::new(InMemoryQueryCache::default());
        let token_store = Arc::new(
            TokenStore::new(
                AuthConfig::new("http://api.test"),
                Arc::clone(&credentials),
                Arc::clone(&client),
            )
            .with_now_provider(Arc::new(fixed_now)),
        );
        token_store.load_session();
        let router = Arc::new(CacheInvalidationRouter::new(Arc::clone(&cache)));
        let executor = RequestExecutor::new(
            Arc::clone(&transport),
            Arc::clone(&token_store),
            router,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        });
        Harness {
            executor,
            transport,
            client,
            credentials,
            token_store,
            cache,
        }
    }

    fn signed_in(seconds_left: i64) -> RecordingCredentialStore {
        RecordingCredentialStore::seeded(expiring_tokens("old-access", "old-refresh", seconds_left))
    }

    fn list_tasks() -> ApiOperation {
        ApiOperation::query(ApiRequest::new(HttpMethod::Get, ["api", "tasks"]))
    }

    fn unauthorized() -> FakeSend {
        FakeSend::Status(401, json!({ "message": "token expired" }))
    }

    #[tokio::test]
    async fn expired_access_token_is_refreshed_before_sending() {
        let h = harness(signed_in(-10), FakeAuthClient::default(), vec![FakeSend::ok()]);

        h.executor.execute(&list_tasks()).await.expect("request succeeds");
        assert_eq!(h.client.refresh_calls(), 1);
        assert_eq!(h.transport.sent_tokens(), vec![Some("fake-access".to_string())]);
    }

    #[tokio::test]
    async fn unauthorized_response_is_retried_once_after_refresh() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::with_refresh_responses(vec![FakeAuthResponse::tokens(
                "new-access",
                Some("new-refresh"),
                900,
            )]),
            vec![unauthorized(), FakeSend::ok()],
        );

        h.executor.execute(&list_tasks()).await.expect("retry succeeds");
        assert_eq!(h.client.refresh_calls(), 1);
        assert_eq!(
            h.transport.sent_tokens(),
            vec![Some("old-access".to_string()), Some("new-access".to_string())]
        );
        assert_eq!(h.credentials.delete_calls(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_after_unauthorized_expires_session() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::with_refresh_responses(vec![FakeAuthResponse::Rejected]),
            vec![unauthorized(), FakeSend::ok()],
        );

        let error = h.executor.execute(&list_tasks()).await.expect_err("session expired");
        assert!(matches!(error, SyncError::SessionExpired));
        assert_eq!(h.transport.send_count(), 1);
        assert_eq!(h.credentials.delete_calls(), 1);
        assert!(!h.token_store.is_authenticated());
    }

    #[tokio::test]
    async fn second_unauthorized_never_makes_a_third_attempt() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![unauthorized(), unauthorized(), FakeSend::ok()],
        );

        let error = h.executor.execute(&list_tasks()).await.expect_err("session expired");
        assert!(matches!(error, SyncError::SessionExpired));
        assert_eq!(h.transport.send_count(), 2);
        assert_eq!(h.client.refresh_calls(), 1);
        assert_eq!(h.credentials.delete_calls(), 1);
    }

    #[tokio::test]
    async fn near_expiry_refresh_failure_still_sends_valid_token() {
        let h = harness(
            signed_in(30),
            FakeAuthClient::with_refresh_responses(vec![FakeAuthResponse::Unavailable]),
            vec![FakeSend::ok()],
        );

        h.executor.execute(&list_tasks()).await.expect("request succeeds");
        assert_eq!(h.transport.sent_tokens(), vec![Some("old-access".to_string())]);
        assert!(h.token_store.is_authenticated());
    }

    #[tokio::test]
    async fn expired_token_with_failed_refresh_is_never_sent() {
        let h = harness(
            signed_in(-10),
            FakeAuthClient::with_refresh_responses(vec![FakeAuthResponse::Rejected]),
            vec![FakeSend::ok()],
        );

        let error = h.executor.execute(&list_tasks()).await.expect_err("session expired");
        assert!(matches!(error, SyncError::SessionExpired));
        assert_eq!(h.transport.send_count(), 0);
        assert_eq!(h.credentials.delete_calls(), 1);
    }

    #[tokio::test]
    async fn signed_out_requests_are_not_sent() {
        let h = harness(
            RecordingCredentialStore::default(),
            FakeAuthClient::default(),
            vec![FakeSend::ok()],
        );

        let error = h.executor.execute(&list_tasks()).await.expect_err("not authenticated");
        assert!(matches!(error, SyncError::NotAuthenticated));
        assert!(error.requires_reauthentication());
        assert_eq!(h.transport.send_count(), 0);
    }

    #[tokio::test]
    async fn unauthorized_public_call_is_a_validation_failure() {
        let h = harness(
            RecordingCredentialStore::default(),
            FakeAuthClient::default(),
            vec![unauthorized()],
        );
        let operation =
            ApiOperation::public(ApiRequest::new(HttpMethod::Get, ["api", "health"]));

        let error = h.executor.execute(&operation).await.expect_err("rejected");
        assert!(matches!(error, SyncError::Validation { status: 401, .. }));
        assert_eq!(h.transport.sent_tokens(), vec![None]);
        assert_eq!(h.client.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn status_classes_map_to_error_kinds() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![
                FakeSend::Status(422, json!({ "message": "title is required" })),
                FakeSend::Status(503, serde_json::Value::Null),
                FakeSend::NetworkError,
            ],
        );

        let validation = h.executor.execute(&list_tasks()).await.expect_err("422");
        assert!(matches!(
            validation,
            SyncError::Validation { status: 422, ref message } if message == "title is required"
        ));
        let server = h.executor.execute(&list_tasks()).await.expect_err("503");
        assert!(matches!(server, SyncError::Transient(_)));
        let network = h.executor.execute(&list_tasks()).await.expect_err("network");
        assert!(matches!(network, SyncError::Transient(_)));
    }

    #[tokio::test]
    async fn generic_retry_only_repeats_transient_failures() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![
                FakeSend::Status(502, serde_json::Value::Null),
                FakeSend::NetworkError,
                FakeSend::ok(),
            ],
        );
        h.executor
            .execute_with_retry(&list_tasks())
            .await
            .expect("third attempt succeeds");
        assert_eq!(h.transport.send_count(), 3);

        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![FakeSend::Status(404, serde_json::Value::Null), FakeSend::ok()],
        );
        let error = h
            .executor
            .execute_with_retry(&list_tasks())
            .await
            .expect_err("validation is final");
        assert!(matches!(error, SyncError::Validation { status: 404, .. }));
        assert_eq!(h.transport.send_count(), 1);
    }

    #[tokio::test]
    async fn generic_retry_stops_on_session_expiry() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::with_refresh_responses(vec![FakeAuthResponse::Rejected]),
            vec![unauthorized(), FakeSend::ok(), FakeSend::ok()],
        );

        let error = h
            .executor
            .execute_with_retry(&list_tasks())
            .await
            .expect_err("session expired");
        assert!(matches!(error, SyncError::SessionExpired));
        assert_eq!(h.transport.send_count(), 1);
        assert_eq!(h.credentials.delete_calls(), 1);
    }

    #[tokio::test]
    async fn generic_retry_gives_up_after_max_attempts() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![
                FakeSend::NetworkError,
                FakeSend::NetworkError,
                FakeSend::NetworkError,
                FakeSend::ok(),
            ],
        );

        let error = h
            .executor
            .execute_with_retry(&list_tasks())
            .await
            .expect_err("exhausted");
        assert!(error.is_retryable());
        assert_eq!(h.transport.send_count(), 3);
    }

    #[tokio::test]
    async fn only_successful_mutations_invalidate() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default(),
            vec![FakeSend::Status(500, serde_json::Value::Null), FakeSend::ok()],
        );
        let operation = ApiOperation::mutation(
            ApiRequest::new(HttpMethod::Patch, ["api", "tasks", "t1"]),
            MutationKind::TaskUpdate,
        );

        h.executor.execute(&operation).await.expect_err("server error");
        assert!(h.cache.stale_groups().expect("stale").is_empty());

        h.executor.execute(&operation).await.expect("mutation succeeds");
        assert_eq!(
            h.cache.stale_groups().expect("stale"),
            QueryGroupSet::from([QueryGroup::Tasks, QueryGroup::Agenda])
        );
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        let h = harness(
            signed_in(3600),
            FakeAuthClient::default().with_refresh_delay_ms(20),
            vec![unauthorized(), unauthorized(), FakeSend::ok(), FakeSend::ok()],
        );

        let operation = list_tasks();
        let (first, second) = tokio::join!(
            h.executor.execute(&operation),
            h.executor.execute(&operation)
        );
        first.expect("first succeeds");
        second.expect("second succeeds");
        assert_eq!(h.client.refresh_calls(), 1);
        assert_eq!(h.credentials.delete_calls(), 0);
    }

    #[test]
    fn classify_maps_raw_responses_onto_the_error_taxonomy() {
        let ok = classify(ApiResponse::from_raw(204, "")).expect("no content is success");
        assert_eq!(ok.body, serde_json::Value::Null);

        assert!(matches!(
            classify(ApiResponse::from_raw(503, "<html>bad gateway</html>")),
            Err(SyncError::Transient(message)) if message == "http 503: http 503"
        ));
        assert!(matches!(
            classify(ApiResponse::from_raw(422, r#"{"message":"title is required"}"#)),
            Err(SyncError::Validation { status: 422, message }) if message == "title is required"
        ));
        assert!(matches!(
            classify(ApiResponse::from_raw(404, r#"{"error":"task not found"}"#)),
            Err(SyncError::Validation { status: 404, message }) if message == "task not found"
        ));
        assert!(!classify(ApiResponse::from_raw(500, "")).expect_err("server error").requires_reauthentication());
    }
}
