use crate::application::invalidation::CacheInvalidationRouter;
use crate::application::token_store::TokenStore;
use crate::domain::models::{EventAction, EventKind, RealtimeEvent, SessionState};
use crate::infrastructure::auth_client::AuthHttpClient;
use crate::infrastructure::config::ReconnectConfig;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::query_cache::QueryCache;
use crate::infrastructure::realtime_channel::RealtimeConnector;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Supplies the bearer token presented when the push channel connects and
/// announces sign-in and sign-out.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn session_changes(&self) -> watch::Receiver<SessionState>;
}

impl<S, C> AccessTokenSource for TokenStore<S, C>
where
    S: CredentialStore + 'static,
    C: AuthHttpClient + 'static,
{
    fn access_token(&self) -> Option<String> {
        TokenStore::access_token(self)
    }

    fn session_changes(&self) -> watch::Receiver<SessionState> {
        TokenStore::subscribe(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(7);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    pub fn allows(&self, consecutive_failures: u32) -> bool {
        self.max_attempts
            .is_none_or(|max_attempts| consecutive_failures < max_attempts)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("payload is not a realtime message: {0}")]
    Malformed(String),
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("event `{0}` carries no action")]
    MissingAction(String),
    #[error("unknown event action `{0}`")]
    UnknownAction(String),
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decodes a pushed `{type, data}` message. `type` is either the bare kind
/// with the action in `data.action`, or `kind:action` / `kind.action`.
pub fn decode_event(raw: &str) -> Result<RealtimeEvent, EventDecodeError> {
    let message: WireMessage = serde_json::from_str(raw)
        .map_err(|error| EventDecodeError::Malformed(error.to_string()))?;

    let data = match &message.data {
        serde_json::Value::Object(map) => Some(map),
        serde_json::Value::Null => None,
        other => {
            return Err(EventDecodeError::Malformed(format!(
                "data must be an object, got {other}"
            )));
        }
    };

    let (kind_name, inline_action) = match message.message_type.split_once([':', '.']) {
        Some((kind, action)) => (kind, Some(action)),
        None => (message.message_type.as_str(), None),
    };
    let kind = EventKind::parse(kind_name)
        .ok_or_else(|| EventDecodeError::UnknownKind(kind_name.trim().to_string()))?;

    let action_name = inline_action
        .or_else(|| {
            data.and_then(|map| map.get("action"))
                .and_then(serde_json::Value::as_str)
        })
        .ok_or_else(|| EventDecodeError::MissingAction(kind.as_str().to_string()))?;
    let action = EventAction::parse(action_name)
        .ok_or_else(|| EventDecodeError::UnknownAction(action_name.trim().to_string()))?;

    let subject_ids = data
        .map(|map| {
            map.iter()
                .filter(|(key, _)| key.len() > 2 && key.ends_with("Id"))
                .filter_map(|(key, value)| {
                    value.as_str().map(|id| (key.clone(), id.to_string()))
                })
                .collect()
        })
        .unwrap_or_else(BTreeMap::new);

    Ok(RealtimeEvent {
        kind,
        action,
        subject_ids,
    })
}

/// Owns the single push subscription of the process. Built once at startup
/// and stopped through the returned handle at shutdown. The channel is only
/// open while a session is held: it connects on sign-in and closes on
/// sign-out. Token rotation alone keeps the open channel.
pub struct RealtimeEventBridge;

impl RealtimeEventBridge {
    pub fn spawn<K, A, Q>(
        connector: Arc<K>,
        tokens: Arc<A>,
        router: Arc<CacheInvalidationRouter<Q>>,
        policy: ReconnectPolicy,
    ) -> RealtimeBridgeHandle
    where
        K: RealtimeConnector + ?Sized + 'static,
        A: AccessTokenSource + ?Sized + 'static,
        Q: QueryCache + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_bridge(connector, tokens, router, policy, shutdown_rx));
        RealtimeBridgeHandle { shutdown_tx, task }
    }
}

#[derive(Debug)]
pub struct RealtimeBridgeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RealtimeBridgeHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            error!(%error, "realtime bridge task failed");
        }
        info!("realtime bridge stopped");
    }
}

async fn run_bridge<K, A, Q>(
    connector: Arc<K>,
    tokens: Arc<A>,
    router: Arc<CacheInvalidationRouter<Q>>,
    policy: ReconnectPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: RealtimeConnector + ?Sized,
    A: AccessTokenSource + ?Sized,
    Q: QueryCache,
{
    let mut sessions = tokens.session_changes();
    let mut consecutive_failures: u32 = 0;

    'session: loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let access_token = match tokens.access_token() {
            Some(token) => token,
            None => {
                consecutive_failures = 0;
                debug!("realtime channel waiting for sign-in");
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue 'session;
            }
        };

        let connected = tokio::select! {
            _ = shutdown_rx.changed() => return,
            connected = connector.connect(Some(access_token)) => connected,
        };

        match connected {
            Ok(mut channel) => {
                info!("realtime channel connected");
                consecutive_failures = 0;
                loop {
                    let next = tokio::select! {
                        _ = shutdown_rx.changed() => return,
                        changed = sessions.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            if tokens.access_token().is_none() {
                                info!("signed out; closing realtime channel");
                                continue 'session;
                            }
                            continue;
                        }
                        next = channel.next_message() => next,
                    };
                    match next {
                        Ok(Some(raw)) => route_message(router.as_ref(), &raw),
                        Ok(None) => {
                            info!("realtime channel closed by server");
                            break;
                        }
                        Err(error) => {
                            warn!(%error, "realtime channel failed");
                            break;
                        }
                    }
                }
            }
            Err(error) => warn!(%error, "realtime connect failed"),
        }

        consecutive_failures = consecutive_failures.saturating_add(1);
        if !policy.allows(consecutive_failures) {
            warn!(attempts = consecutive_failures, "giving up on realtime channel");
            return;
        }
        let delay = policy.delay_for(consecutive_failures - 1);
        info!(delay_ms = delay.as_millis() as u64, "reconnecting realtime channel");
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn route_message<Q>(router: &CacheInvalidationRouter<Q>, raw: &str)
where
    Q: QueryCache,
{
    let event = match decode_event(raw) {
        Ok(event) => event,
        Err(error) => {
            warn!(%error, len = raw.len(), "dropping realtime message");
            return;
        }
    };
    debug!(subjects = ?event.subject_ids, "realtime event received");
    if let Err(error) = router.invalidate_for_event(&event) {
        warn!(%error, kind = event.kind.as_str(), "failed to invalidate for realtime event");
    }
}
