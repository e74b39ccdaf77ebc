use crate::application::error::RefreshFailure;
use crate::domain::models::{AuthTokens, LoginCredentials, Session, SessionState};
use crate::infrastructure::auth_client::{
    AuthHttpClient, AuthTokenResponse, LoginRequest, RefreshRequest,
};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::jwt::access_token_expiry;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEFAULT_REFRESH_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub login_endpoint: String,
    pub refresh_endpoint: String,
    pub refresh_leeway_seconds: i64,
}

impl AuthConfig {
    pub fn new(api_base_url: &str) -> Self {
        let base = api_base_url.trim_end_matches('/');
        Self {
            login_endpoint: format!("{base}/api/auth/login"),
            refresh_endpoint: format!("{base}/api/auth/refresh"),
            refresh_leeway_seconds: DEFAULT_REFRESH_LEEWAY_SECONDS,
        }
    }

    pub fn with_refresh_leeway_seconds(mut self, seconds: i64) -> Self {
        self.refresh_leeway_seconds = seconds.max(0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Unauthenticated,
    Fresh,
    Refreshed,
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type RefreshFlight = Shared<BoxFuture<'static, Result<AuthTokens, RefreshFailure>>>;

/// Session state shared with in-flight refresh futures.
struct SessionCell {
    session: RwLock<Session>,
    state_tx: watch::Sender<SessionState>,
    /// Bumped by login and logout; a refresh started under an older epoch
    /// must not install its result.
    epoch: AtomicU64,
}

impl SessionCell {
    fn new() -> Self {
        let session = Session::default();
        let (state_tx, _state_rx) = watch::channel(session.state());
        Self {
            session: RwLock::new(session),
            state_tx,
            epoch: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, apply: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        let result = apply(&mut session);
        let state = session.state();
        drop(session);
        self.state_tx.send_replace(state);
        result
    }

    /// Persists first and installs second, both under the write lock, so the
    /// held tokens never diverge from storage and logout cannot interleave.
    fn commit_refreshed(
        &self,
        started_epoch: u64,
        tokens: AuthTokens,
        credential_store: &dyn CredentialStore,
    ) -> Result<AuthTokens, RefreshFailure> {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) != started_epoch {
            return Err(RefreshFailure::Superseded);
        }
        credential_store
            .save_tokens(&tokens)
            .map_err(|error| RefreshFailure::Persistence(error.to_string()))?;
        session.install(tokens.clone());
        let state = session.state();
        drop(session);
        self.state_tx.send_replace(state);
        Ok(tokens)
    }
}

/// Holds the client's token pair. One instance exists per process, owned by
/// `AppState`; everything else reads tokens through it.
pub struct TokenStore<S, C>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
{
    config: AuthConfig,
    credential_store: Arc<S>,
    auth_client: Arc<C>,
    cell: Arc<SessionCell>,
    in_flight: Mutex<Option<RefreshFlight>>,
    hydrated: AtomicBool,
    now_provider: NowProvider,
}

impl<S, C> TokenStore<S, C>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
{
    pub fn new(config: AuthConfig, credential_store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            auth_client,
            cell: Arc::new(SessionCell::new()),
            in_flight: Mutex::new(None),
            hydrated: AtomicBool::new(false),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn session_state(&self) -> SessionState {
        self.cell.read().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.cell.state_tx.subscribe()
    }

    /// Hydrates the session from the credential store. Runs once per store;
    /// unreadable or malformed data leaves the session signed out.
    pub fn load_session(&self) -> SessionState {
        if self.hydrated.swap(true, Ordering::SeqCst) {
            debug!("session already hydrated; ignoring reload");
            return self.session_state();
        }

        self.cell.update(|session| session.set_loading(true));

        let loaded = match self.credential_store.load_tokens() {
            Ok(Some(tokens)) => match tokens.validate() {
                Ok(()) => Some(tokens),
                Err(reason) => {
                    warn!(%reason, "discarding malformed persisted session");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%error, "failed to read persisted session");
                None
            }
        };

        let state = self.cell.update(|session| {
            if let Some(mut tokens) = loaded {
                if tokens.access_expires_at.is_none() {
                    tokens.access_expires_at = access_token_expiry(&tokens.access_token);
                }
                session.install(tokens);
            }
            session.set_loading(false);
            session.state()
        });
        info!(authenticated = state.is_authenticated, "session hydrated");
        state
    }

    pub fn access_token(&self) -> Option<String> {
        self.cell.read().access_token().map(ToOwned::to_owned)
    }

    pub fn is_authenticated(&self) -> bool {
        self.cell.read().is_authenticated()
    }

    /// True when the held access token is past its expiry hint.
    pub fn access_token_expired(&self) -> bool {
        let now = (self.now_provider)();
        self.cell
            .read()
            .tokens()
            .is_some_and(|tokens| tokens.is_expired_at(now))
    }

    pub async fn login(&self, credentials: LoginCredentials) -> Result<SessionState, InfraError> {
        credentials.validate().map_err(InfraError::Auth)?;

        let response = self
            .auth_client
            .login(LoginRequest {
                endpoint: self.config.login_endpoint.clone(),
                credentials,
            })
            .await?;

        let tokens = tokens_from_response(response, None, (self.now_provider)());
        tokens.validate().map_err(InfraError::Auth)?;
        self.credential_store.save_tokens(&tokens)?;

        let state = self.cell.update(|session| {
            self.cell.epoch.fetch_add(1, Ordering::SeqCst);
            session.install(tokens);
            session.state()
        });
        info!("signed in");
        Ok(state)
    }

    /// Clears the held and persisted tokens. Safe to call repeatedly; any
    /// refresh still in flight is discarded when it completes.
    pub fn logout(&self) -> Result<(), InfraError> {
        let was_authenticated = self.cell.update(|session| {
            self.cell.epoch.fetch_add(1, Ordering::SeqCst);
            let was_authenticated = session.is_authenticated();
            session.clear();
            was_authenticated
        });
        if was_authenticated {
            info!("session cleared");
        }
        self.credential_store.delete_tokens()
    }

    /// Refreshes ahead of a request when the access token is within the
    /// configured leeway of its expiry hint.
    pub async fn check_and_refresh_token(&self) -> Result<TokenCheck, RefreshFailure> {
        let fresh = {
            let session = self.cell.read();
            let Some(tokens) = session.tokens() else {
                return Ok(TokenCheck::Unauthenticated);
            };
            tokens.is_valid_at((self.now_provider)(), self.config.refresh_leeway_seconds)
        };
        if fresh {
            return Ok(TokenCheck::Fresh);
        }

        debug!("access token near expiry; refreshing before request");
        self.refresh().await.map(|_| TokenCheck::Refreshed)
    }

    /// Exchanges the held refresh token for a new pair. Concurrent callers
    /// join the refresh already in flight instead of starting their own.
    pub async fn refresh(&self) -> Result<AuthTokens, RefreshFailure> {
        let flight = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(existing) if existing.peek().is_none() => {
                    debug!("joining in-flight token refresh");
                    existing.clone()
                }
                _ => {
                    let flight = self.start_refresh();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }
        outcome
    }

    /// Refresh after a 401. When another request already replaced the
    /// rejected token, the current pair is reused instead of exchanging again.
    pub async fn refresh_after_rejection(
        &self,
        rejected_access_token: &str,
    ) -> Result<AuthTokens, RefreshFailure> {
        {
            let session = self.cell.read();
            if let Some(tokens) = session.tokens() {
                if tokens.access_token != rejected_access_token {
                    debug!("access token already replaced by a concurrent refresh");
                    return Ok(tokens.clone());
                }
            }
        }
        self.refresh().await
    }

    fn start_refresh(&self) -> RefreshFlight {
        let cell = Arc::clone(&self.cell);
        let credential_store = Arc::clone(&self.credential_store);
        let auth_client = Arc::clone(&self.auth_client);
        let now_provider = Arc::clone(&self.now_provider);
        let endpoint = self.config.refresh_endpoint.clone();

        async move {
            let (refresh_token, started_epoch) = {
                let session = cell.read();
                (
                    session.refresh_token().map(ToOwned::to_owned),
                    cell.epoch.load(Ordering::SeqCst),
                )
            };
            let Some(refresh_token) = refresh_token else {
                return Err(RefreshFailure::NoRefreshToken);
            };

            info!("refreshing access token");
            let response = auth_client
                .refresh(RefreshRequest {
                    endpoint,
                    refresh_token: refresh_token.clone(),
                })
                .await
                .map_err(|error| match error {
                    InfraError::Auth(message) => RefreshFailure::Rejected(message),
                    other => RefreshFailure::Unavailable(other.to_string()),
                });

            let outcome = response.and_then(|response| {
                let tokens = tokens_from_response(response, Some(refresh_token), now_provider());
                cell.commit_refreshed(started_epoch, tokens, credential_store.as_ref())
            });
            match &outcome {
                Ok(tokens) => {
                    info!(expires_at = ?tokens.access_expires_at, "access token refreshed");
                }
                Err(failure) => warn!(%failure, "token refresh failed"),
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

fn tokens_from_response(
    response: AuthTokenResponse,
    fallback_refresh_token: Option<String>,
    now: DateTime<Utc>,
) -> AuthTokens {
    let access_expires_at = response
        .expires_in
        .map(|seconds| now + Duration::seconds(seconds.max(0)))
        .or_else(|| access_token_expiry(&response.access_token));
    AuthTokens {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .or(fallback_refresh_token)
            .unwrap_or_default(),
        access_expires_at,
    }
}
