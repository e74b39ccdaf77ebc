pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

use application::commands::AppState;
use infrastructure::error::InfraError;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Runs the sync layer headless: hydrates the session, keeps the realtime
/// subscription open and reports cache invalidations until Ctrl-C.
pub async fn run(workspace_root: PathBuf) -> Result<(), InfraError> {
    let state = AppState::new(workspace_root)?;
    let session = state.start();
    info!(
        authenticated = session.is_authenticated,
        api = %state.config().api_base_url,
        "plansync started"
    );
    if !session.is_authenticated {
        info!("no stored session; realtime sync starts after sign-in");
    }

    let mut invalidations = state.subscribe_invalidations();
    let mut sessions = state.subscribe_session();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown requested");
                break;
            }
            notice = invalidations.recv() => match notice {
                Ok(_) => {
                    let stale = state.stale_groups()?;
                    debug!(stale = stale.len(), "cached groups awaiting refetch");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invalidation notices dropped");
                }
                Err(RecvError::Closed) => break,
            },
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *sessions.borrow_and_update();
                if !current.is_loading && !current.is_authenticated {
                    warn!("session ended; sign in again to resume syncing");
                }
            }
        }
    }

    state.shutdown().await;
    Ok(())
}
