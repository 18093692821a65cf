//! Repository seam
//!
//! One set of traits, two backends:
//! - [`SqliteStore`]: relational tables via sqlx
//! - [`DocumentStore`]: JSON document collections, optionally file-backed
//!
//! The backend is chosen once at startup by [`Repositories::open`]; everything
//! downstream only sees the trait objects in [`Repositories`].

pub mod document;
pub mod roster;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Weekday};
use saem_common::config::{RootFolderInitializer, StorageBackend, StorageConfig};
use saem_common::{Event, Musician, Rehearsal, Result};
use std::sync::Arc;
use tracing::info;

use crate::outbox::NotificationAttempt;

pub use document::DocumentStore;
pub use roster::{Roster, RosterSummary};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait MusicianRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Musician>>;

    async fn find_all(&self) -> Result<Vec<Musician>>;

    /// Active musicians available on `weekday`, sorted by name
    async fn find_available_by_day(&self, weekday: Weekday) -> Result<Vec<Musician>>;

    /// Insert or replace
    async fn save(&self, musician: &Musician) -> Result<()>;

    /// Returns whether a musician was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait RehearsalRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rehearsal>>;

    async fn find_all(&self) -> Result<Vec<Rehearsal>>;

    /// Rehearsals with `start <= date < end_exclusive`, ordered by date then start time
    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Rehearsal>>;

    async fn find_by_date(&self, day: NaiveDate) -> Result<Vec<Rehearsal>> {
        self.find_by_date_range(day, day + Duration::days(1)).await
    }

    /// Insert or replace, including the assignment list
    async fn save(&self, rehearsal: &Rehearsal) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Event>>;

    async fn find_all(&self) -> Result<Vec<Event>>;

    /// Events with `start <= date < end_exclusive`, ordered by date then start time
    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Event>>;

    async fn find_by_date(&self, day: NaiveDate) -> Result<Vec<Event>> {
        self.find_by_date_range(day, day + Duration::days(1)).await
    }

    /// Insert or replace, including the assignment list
    async fn save(&self, event: &Event) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Append-only log of notification attempts
#[async_trait]
pub trait AttemptLog: Send + Sync {
    /// Append an attempt; returns the id it was stored under
    async fn record(&self, attempt: &NotificationAttempt) -> Result<i64>;

    /// Most recent attempts, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<NotificationAttempt>>;
}

/// The repositories the engine works against
#[derive(Clone)]
pub struct Repositories {
    pub musicians: Arc<dyn MusicianRepository>,
    pub rehearsals: Arc<dyn RehearsalRepository>,
    pub events: Arc<dyn EventRepository>,
    pub attempts: Arc<dyn AttemptLog>,
}

impl Repositories {
    /// Open the configured backend under the root folder
    pub async fn open(storage: &StorageConfig, root: &RootFolderInitializer) -> Result<Self> {
        match storage.backend {
            StorageBackend::Sqlite => {
                let path = root.database_path(storage);
                info!("Storage backend: sqlite ({})", path.display());
                let pool = saem_common::db::init_database(&path).await?;
                Ok(Self::from_sqlite(SqliteStore::new(pool)))
            }
            StorageBackend::Document => {
                let path = root.document_path(storage);
                info!("Storage backend: document ({})", path.display());
                let store = DocumentStore::open(path).await?;
                Ok(Self::from_document(store))
            }
        }
    }

    pub fn from_sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            musicians: store.clone(),
            rehearsals: store.clone(),
            events: store.clone(),
            attempts: store,
        }
    }

    pub fn from_document(store: DocumentStore) -> Self {
        let store = Arc::new(store);
        Self {
            musicians: store.clone(),
            rehearsals: store.clone(),
            events: store.clone(),
            attempts: store,
        }
    }

    /// Volatile document store, handy for tests and dry runs
    pub fn in_memory() -> Self {
        Self::from_document(DocumentStore::in_memory())
    }
}
