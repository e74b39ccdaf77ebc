use crate::application::bootstrap::bootstrap_workspace;
use crate::application::error::SyncError;
use crate::application::invalidation::{CacheInvalidationRouter, Invalidation};
use crate::application::operations::{
    agenda_range, execute_command, group_query, toggle_completion_request,
    toggle_habit_completion,
};
use crate::application::realtime_bridge::{
    RealtimeBridgeHandle, RealtimeEventBridge, ReconnectPolicy,
};
use crate::application::request_executor::{ApiOperation, RequestExecutor, RetryPolicy};
use crate::application::token_store::{AuthConfig, TokenStore};
use crate::domain::completion::is_completed;
use crate::domain::models::{
    LoginCredentials, QueryGroup, QueryGroupSet, SessionState, TaskOccurrence,
};
use crate::infrastructure::api_transport::{ApiTransport, ReqwestApiTransport};
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestAuthClient};
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::credential_store::{ConfiguredCredentialStore, CredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::query_cache::{InMemoryQueryCache, QueryCache};
use crate::infrastructure::realtime_channel::{RealtimeConnector, WebSocketConnector};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

/// Collaborators `AppState` is assembled from.
pub struct AppServices<S, C, T> {
    pub credential_store: Arc<S>,
    pub auth_client: Arc<C>,
    pub transport: Arc<T>,
    pub connector: Arc<dyn RealtimeConnector>,
}

/// Owns the process-wide sync services. Build one at startup, call `start`
/// once inside the runtime, and `shutdown` before exit.
pub struct AppState<
    S = ConfiguredCredentialStore,
    C = ReqwestAuthClient,
    T = ReqwestApiTransport,
> where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    config: SyncConfig,
    database_path: Option<PathBuf>,
    token_store: Arc<TokenStore<S, C>>,
    router: Arc<CacheInvalidationRouter<InMemoryQueryCache>>,
    executor: RequestExecutor<T, S, C, InMemoryQueryCache>,
    connector: Arc<dyn RealtimeConnector>,
    bridge: Mutex<Option<RealtimeBridgeHandle>>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = bootstrap.config;

        let credential_store =
            ConfiguredCredentialStore::from_config(&config, &bootstrap.database_path);
        let services = AppServices {
            credential_store: Arc::new(credential_store),
            auth_client: Arc::new(ReqwestAuthClient::new(config.request_timeout())?),
            transport: Arc::new(ReqwestApiTransport::new(
                &config.api_base_url,
                config.request_timeout(),
            )?),
            connector: Arc::new(WebSocketConnector::new(&config.realtime_url)?),
        };

        let mut state = Self::from_services(config, services);
        state.database_path = Some(bootstrap.database_path);
        Ok(state)
    }
}

impl<S, C, T> AppState<S, C, T>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    pub fn from_services(config: SyncConfig, services: AppServices<S, C, T>) -> Self {
        let auth_config = AuthConfig::new(&config.api_base_url)
            .with_refresh_leeway_seconds(config.refresh_leeway_seconds);
        let token_store = Arc::new(TokenStore::new(
            auth_config,
            services.credential_store,
            services.auth_client,
        ));
        let router = Arc::new(CacheInvalidationRouter::new(Arc::new(
            InMemoryQueryCache::default(),
        )));
        let executor = RequestExecutor::new(
            services.transport,
            Arc::clone(&token_store),
            Arc::clone(&router),
        )
        .with_retry_policy(RetryPolicy::from(&config.retry));

        Self {
            config,
            database_path: None,
            token_store,
            router,
            executor,
            connector: services.connector,
            bridge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    /// Hydrates the session and starts the realtime bridge, which connects
    /// once a session is held. Calling it again only reports the current
    /// session.
    pub fn start(&self) -> SessionState {
        let state = self.token_store.load_session();
        let mut bridge = self.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        if bridge.is_none() {
            *bridge = Some(RealtimeEventBridge::spawn(
                Arc::clone(&self.connector),
                Arc::clone(&self.token_store),
                Arc::clone(&self.router),
                ReconnectPolicy::from(&self.config.reconnect),
            ));
            info!("realtime bridge started");
        }
        state
    }

    pub async fn shutdown(&self) {
        let bridge = self
            .bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bridge) = bridge {
            bridge.shutdown().await;
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.token_store.session_state()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.token_store.subscribe()
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Invalidation> {
        self.router.subscribe()
    }

    pub fn stale_groups(&self) -> Result<QueryGroupSet, InfraError> {
        self.router.cache().stale_groups()
    }

    pub fn command_error(&self, command: &str, error: &SyncError) -> String {
        error!(
            command,
            %error,
            reauthenticate = error.requires_reauthentication(),
            "command failed"
        );
        error.to_string()
    }
}

pub async fn login_impl<S, C, T>(
    state: &AppState<S, C, T>,
    email: String,
    password: String,
) -> Result<SessionState, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let credentials = LoginCredentials {
        email: email.trim().to_string(),
        password,
    };
    credentials.validate().map_err(SyncError::InvalidInput)?;

    state
        .token_store
        .login(credentials)
        .await
        .map_err(|error| match error {
            InfraError::Auth(message) => SyncError::Validation {
                status: 401,
                message,
            },
            InfraError::Network(message) => SyncError::Transient(message),
            other => SyncError::Infra(other),
        })
}

pub fn logout_impl<S, C, T>(state: &AppState<S, C, T>) -> Result<SessionState, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    state.token_store.logout()?;
    Ok(state.token_store.session_state())
}

/// Refetches one query group and marks it fresh, unless it was invalidated
/// again while the request was in flight.
pub async fn fetch_group_impl<S, C, T>(
    state: &AppState<S, C, T>,
    group: String,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let group = parse_query_group(&group)?;
    fetch(state, group, group_query(group)).await
}

pub async fn fetch_agenda_impl<S, C, T>(
    state: &AppState<S, C, T>,
    start: String,
    end: String,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let start = parse_date_input(&start, "start")?;
    let end = parse_date_input(&end, "end")?;
    fetch(state, QueryGroup::Agenda, agenda_range(start, end)?).await
}

/// Sends any catalog mutation; the router invalidates its groups on success.
pub async fn mutate_impl<S, C, T>(
    state: &AppState<S, C, T>,
    operation: ApiOperation,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    if operation.mutation.is_none() {
        return Err(SyncError::InvalidInput(format!(
            "{} is not a mutation",
            operation.request.path()
        )));
    }
    let response = state.executor.execute(&operation).await?;
    Ok(response.body)
}

/// Toggles a task or one recurring occurrence and returns the completion
/// state the views should now show.
pub async fn toggle_occurrence_impl<S, C, T>(
    state: &AppState<S, C, T>,
    item: TaskOccurrence,
) -> Result<bool, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let operation = toggle_completion_request(&item)?;
    state.executor.execute(&operation).await?;
    let completed = !is_completed(&item);
    info!(
        task_id = %item.base_task_id,
        instance_date = ?item.instance_date,
        completed,
        "completion toggled"
    );
    Ok(completed)
}

pub async fn toggle_habit_impl<S, C, T>(
    state: &AppState<S, C, T>,
    habit_id: String,
    date: String,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let date = parse_date_input(&date, "date")?;
    let operation = toggle_habit_completion(&habit_id, date)?;
    let response = state.executor.execute(&operation).await?;
    Ok(response.body)
}

pub async fn execute_command_impl<S, C, T>(
    state: &AppState<S, C, T>,
    input: String,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let operation = execute_command(&input)?;
    let response = state.executor.execute(&operation).await?;
    Ok(response.body)
}

async fn fetch<S, C, T>(
    state: &AppState<S, C, T>,
    group: QueryGroup,
    operation: ApiOperation,
) -> Result<serde_json::Value, SyncError>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
    T: ApiTransport + 'static,
{
    let generation = state.router.cache().status(group)?.generation;
    let response = state.executor.execute_with_retry(&operation).await?;
    if !state.router.cache().mark_fresh_if(group, generation)? {
        debug!(group = group.as_str(), "invalidated while fetching; staying stale");
    }
    Ok(response.body)
}

fn parse_query_group(value: &str) -> Result<QueryGroup, SyncError> {
    let value = value.trim().to_ascii_lowercase();
    QueryGroup::ALL
        .into_iter()
        .find(|group| group.as_str() == value)
        .ok_or_else(|| SyncError::InvalidInput(format!("unknown query group: {value}")))
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|error| {
        SyncError::InvalidInput(format!("{field_name} must be a YYYY-MM-DD date: {error}"))
    })
}
