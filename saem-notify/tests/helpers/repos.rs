//! Seeded repositories and engine wiring

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use saem_common::time::{Clock, FixedClock};
use saem_common::{Error, Event, Musician, Rehearsal, Result, ScheduleDetails};
use saem_notify::engine::{DispatchPolicy, EngineContext, NotificationEngine};
use saem_notify::messaging::MessagingClient;
use saem_notify::repository::{EventRepository, RehearsalRepository, Repositories};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rehearsal repository that counts saves and can be told to fail them
pub struct CountingRehearsals {
    inner: Arc<dyn RehearsalRepository>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl CountingRehearsals {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RehearsalRepository for CountingRehearsals {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rehearsal>> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<Rehearsal>> {
        self.inner.find_all().await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Rehearsal>> {
        self.inner.find_by_date_range(start, end_exclusive).await
    }

    async fn save(&self, rehearsal: &Rehearsal) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal("disk full".to_string()));
        }
        self.inner.save(rehearsal).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }
}

/// Event repository that counts saves
pub struct CountingEvents {
    inner: Arc<dyn EventRepository>,
    saves: AtomicUsize,
}

impl CountingEvents {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventRepository for CountingEvents {
    async fn find_by_id(&self, id: &str) -> Result<Option<Event>> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<Event>> {
        self.inner.find_all().await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Event>> {
        self.inner.find_by_date_range(start, end_exclusive).await
    }

    async fn save(&self, event: &Event) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(event).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }
}

/// In-memory repositories with save-counting item repositories.
///
/// Seed through the returned `Repositories` before counting: every seed save
/// counts too.
pub fn counting_repos() -> (Repositories, Arc<CountingRehearsals>, Arc<CountingEvents>) {
    let mut repos = Repositories::in_memory();
    let rehearsals = Arc::new(CountingRehearsals {
        inner: repos.rehearsals.clone(),
        saves: AtomicUsize::new(0),
        fail_saves: AtomicBool::new(false),
    });
    let events = Arc::new(CountingEvents {
        inner: repos.events.clone(),
        saves: AtomicUsize::new(0),
    });
    repos.rehearsals = rehearsals.clone();
    repos.events = events.clone();
    (repos, rehearsals, events)
}

/// Fast policy: one try per message, short deadline
pub fn test_policy() -> DispatchPolicy {
    DispatchPolicy::single_attempt(Duration::from_secs(2))
}

pub fn build_engine(repos: Repositories, client: Arc<dyn MessagingClient>) -> NotificationEngine {
    NotificationEngine::new(EngineContext::new(repos, client, test_policy()))
}

pub fn build_engine_with_clock(
    repos: Repositories,
    client: Arc<dyn MessagingClient>,
    today: NaiveDate,
) -> NotificationEngine {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_day(today));
    NotificationEngine::new(EngineContext::new(repos, client, test_policy()).with_clock(clock))
}

pub fn musician(name: &str, phone: &str, days: &[Weekday]) -> Musician {
    Musician::new(name, phone, "violino").with_available_days(days)
}

pub async fn seed_musician(
    repos: &Repositories,
    name: &str,
    phone: &str,
    days: &[Weekday],
) -> Musician {
    let musician = musician(name, phone, days);
    repos.musicians.save(&musician).await.unwrap();
    musician
}

/// Rehearsal on `date` with the given musicians assigned
pub fn rehearsal_on(title: &str, date: NaiveDate, assigned: &[&Musician]) -> Rehearsal {
    let mut details = ScheduleDetails::new(title, date, "19:00", "21:00", "Igreja Matriz");
    for musician in assigned {
        details.add_musician(&musician.id).unwrap();
    }
    Rehearsal::new(details)
}
