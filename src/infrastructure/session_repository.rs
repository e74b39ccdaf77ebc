use crate::domain::models::AuthTokens;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Creates the workspace database and its `session` table if missing.
pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Stores the token pair in the `session` table of the workspace database.
/// Used where no OS keychain is available.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db_path: PathBuf,
}

impl SqliteCredentialStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> Result<(), InfraError> {
        tokens.validate().map_err(InfraError::Credential)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO session (id, access_token, refresh_token, access_expires_at, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
               access_token = excluded.access_token,
               refresh_token = excluded.refresh_token,
               access_expires_at = excluded.access_expires_at,
               updated_at = excluded.updated_at",
            params![
                tokens.access_token,
                tokens.refresh_token,
                tokens.access_expires_at.map(|value| value.to_rfc3339()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn load_tokens(&self) -> Result<Option<AuthTokens>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, String, Option<String>)> = connection
            .query_row(
                "SELECT access_token, refresh_token, access_expires_at FROM session WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((access_token, refresh_token, expires_raw)) = row else {
            return Ok(None);
        };

        let access_expires_at = expires_raw
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|error| {
                        InfraError::Credential(format!(
                            "invalid session.access_expires_at '{raw}': {error}"
                        ))
                    })
            })
            .transpose()?;

        Ok(Some(AuthTokens {
            access_token,
            refresh_token,
            access_expires_at,
        }))
    }

    fn delete_tokens(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM session WHERE id = 1", [])?;
        Ok(())
    }
}
