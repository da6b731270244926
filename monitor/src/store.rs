//! Durable host state, backed by `SQLite`.
//!
//! Only the transition detector touches the store; the notifier never does.

use core::{future::Future, str::FromStr as _};
use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{
    FromRow,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};
use thiserror::Error as ThisError;
use tracing::info;

use crate::model::{HostRecord, HostState, NewHost};

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("failed to apply migrations")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("no host with id {0}")]
    Missing(i64),
}

/// Point lookup and mutation of [`HostRecord`]s keyed by `(ip_address, mac_address)`.
pub trait HostStore {
    /// Looks up the record for an identity.
    fn find(
        &self,
        ip_address: &str,
        mac_address: &str,
    ) -> impl Future<Output = Result<Option<HostRecord>, StoreError>> + Send;

    /// Inserts a first-seen host and returns the stored record.
    fn insert(&self, host: &NewHost) -> impl Future<Output = Result<HostRecord, StoreError>> + Send;

    /// Commits a confirmed transition for the host with the given id.
    fn record_transition(
        &self,
        id: i64,
        state: HostState,
        last_seen: &str,
        event_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(FromRow)]
struct HostRow {
    id: i64,
    ip_address: String,
    mac_address: String,
    name: String,
    vendor: String,
    unclassified: String,
    state: String,
    notify: bool,
    check_port: Option<i64>,
    last_seen: String,
    event_time: DateTime<Utc>,
}

impl From<HostRow> for HostRecord {
    fn from(row: HostRow) -> Self {
        Self {
            id: row.id,
            state: HostState::from_stored(&row.state),
            check_port: row
                .check_port
                .and_then(|p| u16::try_from(p).ok())
                .filter(|&p| p > 0),
            ip_address: row.ip_address,
            mac_address: row.mac_address,
            name: row.name,
            vendor: row.vendor,
            unclassified: row.unclassified,
            notify: row.notify,
            last_seen: row.last_seen,
            event_time: row.event_time,
        }
    }
}

const SELECT_HOST: &str = "SELECT id, ip_address, mac_address, name, vendor, unclassified, \
     state, notify, check_port, last_seen, event_time FROM hosts";

/// [`HostStore`] over an `SQLite` connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    /// Opens a private in-memory database. Everything is lost when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or migrated.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // every connection to :memory: is its own database, so pin the pool to one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!().run(&pool).await?;
        info!("Host table ready");
        Ok(Self { pool })
    }
}

impl HostStore for SqliteStore {
    async fn find(
        &self,
        ip_address: &str,
        mac_address: &str,
    ) -> Result<Option<HostRecord>, StoreError> {
        let row = sqlx::query_as::<_, HostRow>(&format!(
            "{SELECT_HOST} WHERE ip_address = ? AND mac_address = ?"
        ))
        .bind(ip_address)
        .bind(mac_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HostRecord::from))
    }

    async fn insert(&self, host: &NewHost) -> Result<HostRecord, StoreError> {
        let result = sqlx::query(
            "INSERT INTO hosts (ip_address, mac_address, name, vendor, unclassified, state, \
             notify, check_port, last_seen, event_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&host.ip_address)
        .bind(&host.mac_address)
        .bind(&host.name)
        .bind(&host.vendor)
        .bind(&host.unclassified)
        .bind(host.state.as_str())
        .bind(host.notify)
        .bind(&host.last_seen)
        .bind(host.event_time)
        .execute(&self.pool)
        .await?;

        Ok(HostRecord {
            id: result.last_insert_rowid(),
            ip_address: host.ip_address.clone(),
            mac_address: host.mac_address.clone(),
            name: host.name.clone(),
            vendor: host.vendor.clone(),
            unclassified: host.unclassified.clone(),
            state: host.state,
            notify: host.notify,
            check_port: None,
            last_seen: host.last_seen.clone(),
            event_time: host.event_time,
        })
    }

    async fn record_transition(
        &self,
        id: i64,
        state: HostState,
        last_seen: &str,
        event_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE hosts SET state = ?, last_seen = ?, event_time = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(last_seen)
                .bind(event_time)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(id));
        }
        Ok(())
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Sets the per-host options normally edited out of band.
    pub(crate) async fn set_host_options(&self, id: i64, notify: bool, check_port: Option<u16>) {
        sqlx::query("UPDATE hosts SET notify = ?, check_port = ? WHERE id = ?")
            .bind(notify)
            .bind(check_port.map(i64::from))
            .bind(id)
            .execute(&self.pool)
            .await
            .expect("failed to update host options");
    }

    /// Every stored record, ordered by id.
    pub(crate) async fn all(&self) -> Vec<HostRecord> {
        sqlx::query_as::<_, HostRow>(&format!("{SELECT_HOST} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .expect("failed to list hosts")
            .into_iter()
            .map(HostRecord::from)
            .collect()
    }

    /// Closes the pool so that further queries fail.
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}
