//! Document repositories
//!
//! Musicians, rehearsals, events and the attempt log kept as JSON document
//! collections. Two modes:
//! - in memory: the collections live behind a lock and vanish with the process
//! - file-backed: the file is the only copy. Every operation takes an advisory
//!   lock on a sidecar `.lock` file and re-reads the document, so `serve` and
//!   CLI commands running in other processes always see each other's writes.
//!   Writes go to a temp file that is renamed over the document.
//!
//! In both modes an update runs against a copy of the collections and only
//! replaces the stored document once it has been written successfully.

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use fs2::FileExt;
use saem_common::{Error, Event, Musician, Rehearsal, Result, ScheduledItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{AttemptLog, EventRepository, MusicianRepository, RehearsalRepository};
use crate::outbox::NotificationAttempt;

/// How long an operation waits for another process to release the document
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Collections {
    musicians: BTreeMap<String, Musician>,
    rehearsals: BTreeMap<String, Rehearsal>,
    events: BTreeMap<String, Event>,
    attempts: Vec<NotificationAttempt>,
}

enum Backing {
    Memory(RwLock<Collections>),
    File {
        file: Arc<DocumentFile>,
        /// Keeps this process's tasks from spinning on the file lock
        gate: Mutex<()>,
    },
}

pub struct DocumentStore {
    backing: Backing,
}

impl DocumentStore {
    /// Use the document at `path`, starting empty if it does not exist yet
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = Arc::new(DocumentFile::new(path));
        let reader = file.clone();
        let existing = blocking(move || {
            let _lock = FileLock::acquire(&reader.lock_path, false)?;
            reader.load()
        })
        .await?;

        info!(
            musicians = existing.musicians.len(),
            rehearsals = existing.rehearsals.len(),
            events = existing.events.len(),
            "Using document store: {}",
            file.path.display()
        );

        Ok(Self {
            backing: Backing::File {
                file,
                gate: Mutex::new(()),
            },
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(RwLock::new(Collections::default())),
        }
    }

    async fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Collections) -> R + Send + 'static,
        R: Send + 'static,
    {
        match &self.backing {
            Backing::Memory(data) => Ok(f(&*data.read().await)),
            Backing::File { file, gate } => {
                let _gate = gate.lock().await;
                let file = file.clone();
                blocking(move || {
                    let _lock = FileLock::acquire(&file.lock_path, false)?;
                    Ok(f(&file.load()?))
                })
                .await
            }
        }
    }

    /// Apply `f` to a copy of the collections and store the copy. Nothing
    /// changes when `f` or the write fails.
    async fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Collections) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        match &self.backing {
            Backing::Memory(data) => {
                let mut data = data.write().await;
                let mut draft = data.clone();
                let out = f(&mut draft)?;
                *data = draft;
                Ok(out)
            }
            Backing::File { file, gate } => {
                let _gate = gate.lock().await;
                let file = file.clone();
                blocking(move || {
                    let _lock = FileLock::acquire(&file.lock_path, true)?;
                    let mut draft = file.load()?;
                    let out = f(&mut draft)?;
                    file.store(&draft)?;
                    Ok(out)
                })
                .await
            }
        }
    }
}

async fn blocking<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Document store task failed: {}", e)))?
}

/// On-disk location of a document and its sidecar files
struct DocumentFile {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl DocumentFile {
    fn new(path: PathBuf) -> Self {
        Self {
            lock_path: sibling(&path, "lock"),
            tmp_path: sibling(&path, "tmp"),
            path,
        }
    }

    fn load(&self) -> Result<Collections> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Collections::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, data: &Collections) -> Result<()> {
        std::fs::write(&self.tmp_path, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        debug!("Wrote document store: {}", self.path.display());
        Ok(())
    }
}

/// `saem.json` -> `saem.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Advisory lock held for the duration of one operation
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path, exclusive: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let contended = fs2::lock_contended_error().raw_os_error();
        let started = Instant::now();
        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.raw_os_error() == contended => {}
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= LOCK_TIMEOUT {
                return Err(Error::Internal(format!(
                    "Timed out after {:?} waiting for {}",
                    LOCK_TIMEOUT,
                    path.display()
                )));
            }
            std::thread::sleep(LOCK_RETRY);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn in_range<T: ScheduledItem>(item: &T, start: NaiveDate, end_exclusive: NaiveDate) -> bool {
    let date = item.details().date;
    date >= start && date < end_exclusive
}

fn sorted_by_schedule<T: ScheduledItem>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by(|a, b| {
        let (a, b) = (a.details(), b.details());
        (a.date, &a.start_time).cmp(&(b.date, &b.start_time))
    });
    items
}

fn sorted_by_name(mut musicians: Vec<Musician>) -> Vec<Musician> {
    musicians.sort_by_key(|m| m.name.to_lowercase());
    musicians
}

#[async_trait]
impl MusicianRepository for DocumentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Musician>> {
        let id = id.to_string();
        self.read(move |data| data.musicians.get(&id).cloned()).await
    }

    async fn find_all(&self) -> Result<Vec<Musician>> {
        self.read(|data| sorted_by_name(data.musicians.values().cloned().collect()))
            .await
    }

    async fn find_available_by_day(&self, weekday: Weekday) -> Result<Vec<Musician>> {
        self.read(move |data| {
            sorted_by_name(
                data.musicians
                    .values()
                    .filter(|m| m.is_available_on(weekday))
                    .cloned()
                    .collect(),
            )
        })
        .await
    }

    async fn save(&self, musician: &Musician) -> Result<()> {
        let musician = musician.clone();
        self.update(move |data| {
            data.musicians.insert(musician.id.clone(), musician);
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.update(move |data| Ok(data.musicians.remove(&id).is_some()))
            .await
    }
}

#[async_trait]
impl RehearsalRepository for DocumentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rehearsal>> {
        let id = id.to_string();
        self.read(move |data| data.rehearsals.get(&id).cloned()).await
    }

    async fn find_all(&self) -> Result<Vec<Rehearsal>> {
        self.read(|data| sorted_by_schedule(data.rehearsals.values().cloned().collect()))
            .await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Rehearsal>> {
        self.read(move |data| {
            sorted_by_schedule(
                data.rehearsals
                    .values()
                    .filter(|r| in_range(*r, start, end_exclusive))
                    .cloned()
                    .collect(),
            )
        })
        .await
    }

    async fn save(&self, rehearsal: &Rehearsal) -> Result<()> {
        let rehearsal = rehearsal.clone();
        self.update(move |data| {
            let id = rehearsal.id().to_string();
            if data.events.contains_key(&id) {
                return Err(Error::InvalidInput(format!("Item {} is stored as an event", id)));
            }
            data.rehearsals.insert(id, rehearsal);
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.update(move |data| Ok(data.rehearsals.remove(&id).is_some()))
            .await
    }
}

#[async_trait]
impl EventRepository for DocumentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Event>> {
        let id = id.to_string();
        self.read(move |data| data.events.get(&id).cloned()).await
    }

    async fn find_all(&self) -> Result<Vec<Event>> {
        self.read(|data| sorted_by_schedule(data.events.values().cloned().collect()))
            .await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Event>> {
        self.read(move |data| {
            sorted_by_schedule(
                data.events
                    .values()
                    .filter(|e| in_range(*e, start, end_exclusive))
                    .cloned()
                    .collect(),
            )
        })
        .await
    }

    async fn save(&self, event: &Event) -> Result<()> {
        let event = event.clone();
        self.update(move |data| {
            let id = event.id().to_string();
            if data.rehearsals.contains_key(&id) {
                return Err(Error::InvalidInput(format!("Item {} is stored as a rehearsal", id)));
            }
            data.events.insert(id, event);
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.update(move |data| Ok(data.events.remove(&id).is_some()))
            .await
    }
}

#[async_trait]
impl AttemptLog for DocumentStore {
    async fn record(&self, attempt: &NotificationAttempt) -> Result<i64> {
        let mut stored = attempt.clone();
        self.update(move |data| {
            let id = data.attempts.last().and_then(|a| a.id).unwrap_or(0) + 1;
            stored.id = Some(id);
            data.attempts.push(stored);
            Ok(id)
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<NotificationAttempt>> {
        self.read(move |data| data.attempts.iter().rev().take(limit).cloned().collect())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saem_common::ScheduleDetails;

    fn rehearsal_on(day: u32) -> Rehearsal {
        Rehearsal::new(ScheduleDetails::new(
            "Ensaio",
            NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            "19:00",
            "21:00",
            "Salão",
        ))
    }

    #[test]
    fn test_sidecar_names() {
        let file = DocumentFile::new(PathBuf::from("/data/saem-documents.json"));
        assert_eq!(file.lock_path, PathBuf::from("/data/saem-documents.json.lock"));
        assert_eq!(file.tmp_path, PathBuf::from("/data/saem-documents.json.tmp"));
    }

    #[tokio::test]
    async fn test_ids_are_unique_across_kinds() {
        let store = DocumentStore::in_memory();
        let rehearsal = rehearsal_on(8);
        RehearsalRepository::save(&store, &rehearsal).await.unwrap();

        let event = Event::new(rehearsal.details.clone());
        assert!(EventRepository::save(&store, &event).await.is_err());
        assert!(EventRepository::find_all(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let store = DocumentStore::in_memory();
        for day in [7, 8, 9] {
            RehearsalRepository::save(&store, &rehearsal_on(day)).await.unwrap();
        }

        let found = RehearsalRepository::find_by_date_range(
            &store,
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].details.date.to_string(), "2026-03-08");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("docs.json")).await.unwrap();
        let rehearsal = rehearsal_on(8);
        RehearsalRepository::save(&store, &rehearsal).await.unwrap();

        // A directory in the temp file's place makes every write fail
        std::fs::create_dir(dir.path().join("docs.json.tmp")).unwrap();

        let mut renamed = rehearsal.clone();
        renamed.details.title = "Ensaio extra".to_string();
        assert!(RehearsalRepository::save(&store, &renamed).await.is_err());

        let stored = RehearsalRepository::find_by_id(&store, rehearsal.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.details.title, "Ensaio");
    }
}
