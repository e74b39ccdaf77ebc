use crate::infrastructure::credential_store::{DEFAULT_KEYRING_ACCOUNT, DEFAULT_KEYRING_SERVICE};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SYNC_JSON: &str = "sync.json";
const SUPPORTED_SCHEMA: u64 = 1;
pub const API_BASE_URL_ENV: &str = "PLANSYNC_API_BASE_URL";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    Keyring,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub schema: u8,
    pub api_base_url: String,
    pub realtime_url: String,
    pub refresh_leeway_seconds: i64,
    pub request_timeout_seconds: u64,
    pub retry: RetryConfig,
    pub reconnect: ReconnectConfig,
    pub credential_backend: CredentialBackend,
    pub keyring_service: String,
    pub keyring_account: String,
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            api_base_url: "http://127.0.0.1:3000".to_string(),
            realtime_url: "ws://127.0.0.1:3000/ws".to_string(),
            refresh_leeway_seconds: 60,
            request_timeout_seconds: 30,
            retry: RetryConfig::default(),
            reconnect: ReconnectConfig::default(),
            credential_backend: CredentialBackend::Sqlite,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            keyring_account: DEFAULT_KEYRING_ACCOUNT.to_string(),
        }
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(SYNC_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&SyncConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_sync_config(config_dir: &Path) -> Result<SyncConfig, InfraError> {
    let path = config_dir.join(SYNC_JSON);
    let mut config: SyncConfig = serde_json::from_value(read_config(&path)?)?;

    if let Some(base_url) = std::env::var(API_BASE_URL_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        config.api_base_url = base_url;
    }

    validate(&config, &path)?;
    Ok(config)
}

fn validate(config: &SyncConfig, path: &Path) -> Result<(), InfraError> {
    for (field, value) in [
        ("apiBaseUrl", &config.api_base_url),
        ("realtimeUrl", &config.realtime_url),
    ] {
        url::Url::parse(value).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid {field} in {}: {error}", path.display()))
        })?;
    }
    if config.refresh_leeway_seconds < 0 {
        return Err(InfraError::InvalidConfig(format!(
            "refreshLeewaySeconds must be >= 0 in {}",
            path.display()
        )));
    }
    if config.request_timeout_seconds == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "requestTimeoutSeconds must be >= 1 in {}",
            path.display()
        )));
    }
    if config.retry.max_attempts == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "retry.maxAttempts must be >= 1 in {}",
            path.display()
        )));
    }
    if config.keyring_service.trim().is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "keyringService must not be empty in {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_written_once_and_load_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        ensure_default_configs(dir.path()).expect("write defaults");
        let path = dir.path().join(SYNC_JSON);
        fs::write(
            &path,
            "{\"schema\": 1, \"refreshLeewaySeconds\": 120, \"credentialBackend\": \"keyring\"}\n",
        )
        .expect("overwrite config");
        ensure_default_configs(dir.path()).expect("defaults are not rewritten");

        let config = load_sync_config(dir.path()).expect("load config");
        assert_eq!(config.refresh_leeway_seconds, 120);
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn default_config_persists_sessions_in_the_workspace_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        ensure_default_configs(dir.path()).expect("write defaults");
        let config = load_sync_config(dir.path()).expect("load config");
        assert_eq!(config.credential_backend, CredentialBackend::Sqlite);
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SYNC_JSON),
            "{\"schema\": 1, \"requestTimeoutSeconds\": 0}",
        )
        .expect("write config");
        assert!(matches!(
            load_sync_config(dir.path()),
            Err(InfraError::InvalidConfig(message)) if message.contains("requestTimeoutSeconds")
        ));
    }

    #[test]
    fn missing_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SYNC_JSON), "{}").expect("write config");
        let error = load_sync_config(dir.path()).expect_err("schema required");
        assert!(matches!(error, InfraError::InvalidConfig(message) if message.contains("missing schema")));
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SYNC_JSON), "{\"schema\": 2}").expect("write config");
        assert!(matches!(
            load_sync_config(dir.path()),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_retry_attempts_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SYNC_JSON),
            "{\"schema\": 1, \"retry\": {\"maxAttempts\": 0}}",
        )
        .expect("write config");
        assert!(matches!(
            load_sync_config(dir.path()),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
