//! SQLite persistence for integrations and integration options.
//!
//! # Schema
//! ```sql
//! CREATE TABLE integration_options (
//!     id         INTEGER PRIMARY KEY,
//!     name       TEXT UNIQUE NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//!
//! CREATE TABLE integrations (
//!     id                      INTEGER PRIMARY KEY,
//!     owner_type              TEXT,
//!     owner_id                TEXT,
//!     integration_option_id   INTEGER NOT NULL
//!         REFERENCES integration_options(id) ON DELETE CASCADE,
//!     base_url                TEXT NOT NULL,
//!     auth_url                TEXT,
//!     authorization_endpoint  TEXT,
//!     authentication_endpoint TEXT,
//!     grant_type              TEXT NOT NULL,
//!     use_state               INTEGER NOT NULL,
//!     form_encoded            INTEGER NOT NULL,
//!     redirect_url            TEXT,
//!     default_headers         TEXT NOT NULL,   -- JSON object
//!     credentials             TEXT,            -- sealed credential blob
//!     created_at              TEXT NOT NULL,
//!     updated_at              TEXT NOT NULL
//! );
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{
    Integration, IntegrationCredentials, IntegrationOption, NewIntegration, Owner,
};
use crate::credentials::{open_all, seal_all, Cipher, Credentials};

const INTEGRATION_COLUMNS: &str = "id, owner_type, owner_id, integration_option_id, base_url, \
     auth_url, authorization_endpoint, authentication_endpoint, grant_type, use_state, \
     form_encoded, redirect_url, default_headers, created_at, updated_at";

/// Integration persistence backed by SQLite, with transparent credential
/// encryption.
///
/// The connection is wrapped in a `Mutex`; every statement is short and
/// synchronous.
pub struct IntegrationStore {
    conn: Mutex<Connection>,
    cipher: Cipher,
}

/// Row as read from SQLite, before timestamp and JSON parsing.
struct IntegrationRow {
    id: i64,
    owner_type: Option<String>,
    owner_id: Option<String>,
    option_id: i64,
    base_url: String,
    auth_url: Option<String>,
    authorization_endpoint: Option<String>,
    authentication_endpoint: Option<String>,
    grant_type: String,
    use_state: bool,
    form_encoded: bool,
    redirect_url: Option<String>,
    default_headers: String,
    created_at: String,
    updated_at: String,
}

impl IntegrationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_type: row.get(1)?,
            owner_id: row.get(2)?,
            option_id: row.get(3)?,
            base_url: row.get(4)?,
            auth_url: row.get(5)?,
            authorization_endpoint: row.get(6)?,
            authentication_endpoint: row.get(7)?,
            grant_type: row.get(8)?,
            use_state: row.get(9)?,
            form_encoded: row.get(10)?,
            redirect_url: row.get(11)?,
            default_headers: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_integration(self) -> Result<Integration> {
        let owner = match (self.owner_type, self.owner_id) {
            (Some(owner_type), Some(owner_id)) => Some(Owner { owner_type, owner_id }),
            _ => None,
        };
        let default_headers: BTreeMap<String, String> =
            serde_json::from_str(&self.default_headers).with_context(|| {
                format!("Failed to parse default_headers for integration {}", self.id)
            })?;

        Ok(Integration {
            id: self.id,
            owner,
            option_id: self.option_id,
            base_url: self.base_url,
            auth_url: self.auth_url,
            authorization_endpoint: self.authorization_endpoint,
            authentication_endpoint: self.authentication_endpoint,
            grant_type: self.grant_type.parse()?,
            use_state: self.use_state,
            form_encoded: self.form_encoded,
            redirect_url: self.redirect_url,
            default_headers,
            created_at: parse_timestamp(&self.created_at, "created_at", self.id)?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at", self.id)?,
        })
    }
}

fn parse_timestamp(value: &str, column: &str, id: i64) -> Result<DateTime<Utc>> {
    value
        .parse()
        .with_context(|| format!("Failed to parse {} for row {}", column, id))
}

impl IntegrationStore {
    /// Opens (or creates) the database using a base64-encoded master key.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = Cipher::from_base64(encryption_key).context("Invalid encryption key")?;
        Self::with_cipher(db_path, cipher)
    }

    /// Opens (or creates) the database with an already validated cipher.
    pub fn with_cipher<P: AsRef<Path>>(db_path: P, cipher: Cipher) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open integrations DB at {}", path.display()))?;

        let store = Self {
            conn: Mutex::new(conn),
            cipher,
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS integration_options (
                    id         INTEGER PRIMARY KEY,
                    name       TEXT UNIQUE NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS integrations (
                    id                      INTEGER PRIMARY KEY,
                    owner_type              TEXT,
                    owner_id                TEXT,
                    integration_option_id   INTEGER NOT NULL
                        REFERENCES integration_options(id)
                        ON DELETE CASCADE ON UPDATE RESTRICT,
                    base_url                TEXT NOT NULL,
                    auth_url                TEXT,
                    authorization_endpoint  TEXT,
                    authentication_endpoint TEXT,
                    grant_type              TEXT NOT NULL,
                    use_state               INTEGER NOT NULL DEFAULT 0,
                    form_encoded            INTEGER NOT NULL DEFAULT 0,
                    redirect_url            TEXT,
                    default_headers         TEXT NOT NULL DEFAULT '{}',
                    credentials             TEXT,
                    created_at              TEXT NOT NULL,
                    updated_at              TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_integrations_owner
                    ON integrations(owner_type, owner_id);
                "#,
            )
            .context("Failed to create integration tables")?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Integration options
    // ---------------------------------------------------------------------

    /// Returns the option with `name`, creating it when missing.
    pub fn ensure_option(&self, name: &str) -> Result<IntegrationOption> {
        if let Some(option) = self.find_option(name)? {
            return Ok(option);
        }

        let now = Utc::now().to_rfc3339();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO integration_options (name, created_at, updated_at) VALUES (?1, ?2, ?3)",
                params![name, now, now],
            )
            .with_context(|| format!("Failed to insert integration option '{}'", name))?;
            conn.last_insert_rowid()
        };

        debug!(option_id = id, name = %name, "Integration option created");

        self.get_option(id)?
            .ok_or_else(|| anyhow!("Integration option {} vanished after insert", id))
    }

    pub fn get_option(&self, id: i64) -> Result<Option<IntegrationOption>> {
        self.query_option("SELECT id, name, created_at, updated_at FROM integration_options WHERE id = ?1", params![id])
    }

    pub fn find_option(&self, name: &str) -> Result<Option<IntegrationOption>> {
        self.query_option("SELECT id, name, created_at, updated_at FROM integration_options WHERE name = ?1", params![name])
    }

    fn query_option(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<IntegrationOption>> {
        let raw: Option<(i64, String, String, String)> = self
            .conn()
            .query_row(sql, params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()
            .context("Failed to query integration option")?;

        raw.map(|(id, name, created_at, updated_at)| {
            Ok(IntegrationOption {
                id,
                name,
                created_at: parse_timestamp(&created_at, "created_at", id)?,
                updated_at: parse_timestamp(&updated_at, "updated_at", id)?,
            })
        })
        .transpose()
    }

    /// Returns all options ordered by name.
    pub fn list_options(&self) -> Result<Vec<IntegrationOption>> {
        let raw = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare("SELECT id, name, created_at, updated_at FROM integration_options ORDER BY name")
                .context("Failed to prepare list_options query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .context("Failed to query integration options")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read integration option rows")?;
            rows
        };

        raw.into_iter()
            .map(|(id, name, created_at, updated_at)| {
                Ok(IntegrationOption {
                    id,
                    name,
                    created_at: parse_timestamp(&created_at, "created_at", id)?,
                    updated_at: parse_timestamp(&updated_at, "updated_at", id)?,
                })
            })
            .collect()
    }

    /// Deletes an option and, through the foreign key, all its integrations.
    ///
    /// Returns `false` when the option did not exist.
    pub fn delete_option(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM integration_options WHERE id = ?1", params![id])
            .context("Failed to delete integration option")?;
        Ok(rows > 0)
    }

    // ---------------------------------------------------------------------
    // Integrations
    // ---------------------------------------------------------------------

    /// Inserts a new integration together with its initial credentials.
    pub fn create(&self, new: &NewIntegration) -> Result<Integration> {
        let now = Utc::now().to_rfc3339();
        let default_headers = serde_json::to_string(&new.default_headers)
            .context("Failed to serialize default headers")?;
        let credentials = if new.credentials.is_empty() {
            None
        } else {
            Some(seal_all(&new.credentials, &self.cipher)?)
        };
        let (owner_type, owner_id) = match &new.owner {
            Some(owner) => (Some(owner.owner_type.as_str()), Some(owner.owner_id.as_str())),
            None => (None, None),
        };

        let id = {
            let conn = self.conn();
            conn.execute(
                r#"
                INSERT INTO integrations (
                    owner_type, owner_id, integration_option_id,
                    base_url, auth_url, authorization_endpoint, authentication_endpoint,
                    grant_type, use_state, form_encoded, redirect_url,
                    default_headers, credentials, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                params![
                    owner_type,
                    owner_id,
                    new.option_id,
                    new.base_url,
                    new.auth_url,
                    new.authorization_endpoint,
                    new.authentication_endpoint,
                    new.grant_type.as_str(),
                    new.use_state,
                    new.form_encoded,
                    new.redirect_url,
                    default_headers,
                    credentials,
                    now,
                    now,
                ],
            )
            .context("Failed to insert integration")?;
            conn.last_insert_rowid()
        };

        debug!(
            integration_id = id,
            option_id = new.option_id,
            grant_type = %new.grant_type,
            "Integration created"
        );

        self.get(id)?
            .ok_or_else(|| anyhow!("Integration {} vanished after insert", id))
    }

    /// Loads one integration.
    pub fn get(&self, id: i64) -> Result<Option<Integration>> {
        let sql = format!("SELECT {} FROM integrations WHERE id = ?1", INTEGRATION_COLUMNS);
        let raw = self
            .conn()
            .query_row(&sql, params![id], IntegrationRow::from_row)
            .optional()
            .context("Failed to query integration")?;

        raw.map(IntegrationRow::into_integration).transpose()
    }

    /// Lists the integrations owned by `owner`, oldest first.
    pub fn list_by_owner(&self, owner: &Owner) -> Result<Vec<Integration>> {
        let sql = format!(
            "SELECT {} FROM integrations WHERE owner_type = ?1 AND owner_id = ?2 ORDER BY id",
            INTEGRATION_COLUMNS
        );
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&sql).context("Failed to prepare list_by_owner query")?;
            let rows = stmt
                .query_map(params![owner.owner_type, owner.owner_id], IntegrationRow::from_row)
                .context("Failed to query integrations")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read integration rows")?;
            rows
        };

        rows.into_iter().map(IntegrationRow::into_integration).collect()
    }

    /// Deletes an integration. Returns `false` when it did not exist.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM integrations WHERE id = ?1", params![id])
            .context("Failed to delete integration")?;
        Ok(rows > 0)
    }

    // ---------------------------------------------------------------------
    // Credentials
    // ---------------------------------------------------------------------

    /// Handle to the credential mapping of integration `id`.
    pub fn credentials(self: &Arc<Self>, id: i64) -> IntegrationCredentials {
        IntegrationCredentials::new(Arc::clone(self), id)
    }

    /// Reads and decrypts the credential mapping of an integration.
    pub fn load_credentials(&self, id: i64) -> Result<Credentials> {
        let blob = self.credentials_blob(id)?;
        open_all(blob.as_deref(), &self.cipher)
            .with_context(|| format!("Failed to open credentials of integration {}", id))
    }

    /// Re-encrypts the full mapping and overwrites the stored blob.
    pub fn store_credentials(&self, id: i64, credentials: &Credentials) -> Result<()> {
        let blob = if credentials.is_empty() {
            None
        } else {
            Some(seal_all(credentials, &self.cipher)?)
        };

        let rows = self
            .conn()
            .execute(
                "UPDATE integrations SET credentials = ?1, updated_at = ?2 WHERE id = ?3",
                params![blob, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to store credentials")?;

        if rows == 0 {
            return Err(anyhow!("Integration {} not found", id));
        }

        Ok(())
    }

    /// Raw sealed blob as stored, `None` when no credentials were ever set.
    pub fn credentials_blob(&self, id: i64) -> Result<Option<String>> {
        let blob: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT credentials FROM integrations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read credentials")?;

        blob.ok_or_else(|| anyhow!("Integration {} not found", id))
    }
}
