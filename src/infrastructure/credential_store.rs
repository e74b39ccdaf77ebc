use crate::domain::models::AuthTokens;
use crate::infrastructure::config::{CredentialBackend, SyncConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_repository::SqliteCredentialStore;
use std::path::Path;
use std::sync::Mutex;

pub const DEFAULT_KEYRING_SERVICE: &str = "plansync.session";
pub const DEFAULT_KEYRING_ACCOUNT: &str = "default";

pub trait CredentialStore: Send + Sync {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError>;
    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError>;
    fn delete_tokens(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE, DEFAULT_KEYRING_ACCOUNT)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError> {
        let payload =
            serde_json::to_string(tokens).map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let tokens = serde_json::from_str::<AuthTokens>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(tokens))
    }

    fn delete_tokens(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

/// Backend picked from `credentialBackend` in `sync.json`.
#[derive(Debug)]
pub enum ConfiguredCredentialStore {
    Keyring(KeyringCredentialStore),
    Sqlite(SqliteCredentialStore),
}

impl ConfiguredCredentialStore {
    /// `database_path` must already hold the `session` table.
    pub fn from_config(config: &SyncConfig, database_path: &Path) -> Self {
        match config.credential_backend {
            CredentialBackend::Keyring => Self::Keyring(KeyringCredentialStore::new(
                &config.keyring_service,
                &config.keyring_account,
            )),
            CredentialBackend::Sqlite => Self::Sqlite(SqliteCredentialStore::new(database_path)),
        }
    }
}

impl CredentialStore for ConfiguredCredentialStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError> {
        match self {
            Self::Keyring(store) => store.save_tokens(tokens),
            Self::Sqlite(store) => store.save_tokens(tokens),
        }
    }

    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError> {
        match self {
            Self::Keyring(store) => store.load_tokens(),
            Self::Sqlite(store) => store.load_tokens(),
        }
    }

    fn delete_tokens(&self) -> Result<(), InfraError> {
        match self {
            Self::Keyring(store) => store.delete_tokens(),
            Self::Sqlite(store) => store.delete_tokens(),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tokens: Mutex<Option<AuthTokens>>,
}

impl InMemoryCredentialStore {
    pub fn with_tokens(tokens: AuthTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(tokens.clone());
        Ok(())
    }

    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError> {
        let guard = self
            .tokens
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_tokens(&self) -> Result<(), InfraError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
