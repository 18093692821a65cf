//! Repository backend tests
//!
//! The same behaviors are checked against the SQLite store (in-memory pool,
//! single connection) and the document store (file-backed via tempfile).

use chrono::{NaiveDate, Utc, Weekday};
use saem_common::{
    Event, ItemKind, Musician, RepertoireItem, Rehearsal, ScheduleDetails, ScheduledItem,
};
use saem_notify::outbox::{AttemptOutcome, DispatchTarget, TemplateKind};
use saem_notify::repository::{AttemptLog, DocumentStore, Repositories, SqliteStore};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

async fn sqlite_repos() -> Repositories {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    saem_common::db::init_schema(&pool).await.unwrap();
    Repositories::from_sqlite(SqliteStore::new(pool))
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn full_rehearsal(musicians: &[&Musician]) -> Rehearsal {
    let mut details =
        ScheduleDetails::new("Ensaio geral", date(8), "19:00", "21:00", "Igreja Matriz");
    details.description = Some("Trazer partituras".to_string());
    details.repertoire = vec![
        RepertoireItem::new("Ave Maria", Some("Schubert")),
        RepertoireItem::new("Aleluia", None),
    ];
    details.created_by = Some("coord-1".to_string());
    for m in musicians {
        details.add_musician(&m.id).unwrap();
    }
    Rehearsal::new(details)
}

async fn check_musician_queries(repos: &Repositories) {
    let mut bruno = Musician::new("bruno", "11922222222", "órgão")
        .with_available_days(&[Weekday::Sun, Weekday::Wed]);
    bruno.is_organist = true;
    let ana = Musician::new("Ana", "11911111111", "violino").with_available_days(&[Weekday::Sun]);
    let mut inactive =
        Musician::new("Zeca", "11933333333", "flauta").with_available_days(&[Weekday::Sun]);
    inactive.active = false;
    let monday = Musician::new("Davi", "11944444444", "voz").with_available_days(&[Weekday::Mon]);

    for m in [&bruno, &ana, &inactive, &monday] {
        repos.musicians.save(m).await.unwrap();
    }

    let sunday: Vec<String> = repos
        .musicians
        .find_available_by_day(Weekday::Sun)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(sunday, vec!["Ana", "bruno"], "active only, sorted by name ignoring case");

    let stored = repos.musicians.find_by_id(&bruno.id).await.unwrap().unwrap();
    assert!(stored.is_organist);
    assert!(stored.available_days.wednesday);
    assert!(!stored.available_days.monday);

    assert_eq!(repos.musicians.find_all().await.unwrap().len(), 4);
    assert!(repos.musicians.delete(&monday.id).await.unwrap());
    assert!(!repos.musicians.delete(&monday.id).await.unwrap());
    assert!(repos.musicians.find_by_id(&monday.id).await.unwrap().is_none());
}

async fn check_item_roundtrip(repos: &Repositories) {
    let ana = Musician::new("Ana", "11911111111", "violino");
    let bruno = Musician::new("Bruno", "11922222222", "órgão");
    let mut rehearsal = full_rehearsal(&[&ana, &bruno]);
    repos.rehearsals.save(&rehearsal).await.unwrap();

    let stored = repos.rehearsals.find_by_id(rehearsal.id()).await.unwrap().unwrap();
    assert_eq!(stored.details.title, "Ensaio geral");
    assert_eq!(stored.details.description.as_deref(), Some("Trazer partituras"));
    assert_eq!(stored.details.repertoire, rehearsal.details.repertoire);
    assert_eq!(stored.details.assignments, rehearsal.details.assignments);
    assert_eq!(stored.details.created_by.as_deref(), Some("coord-1"));

    // Flip one flag, drop the other assignment: save replaces the list
    rehearsal.details.assignments[0].notified = true;
    rehearsal.details.remove_musician(&bruno.id).unwrap();
    repos.rehearsals.save(&rehearsal).await.unwrap();

    let stored = repos.rehearsals.find_by_id(rehearsal.id()).await.unwrap().unwrap();
    assert_eq!(stored.details.assignments.len(), 1);
    assert!(stored.details.assignments[0].notified);
    assert_eq!(stored.details.assignments[0].musician_id, ana.id);

    let mut event =
        Event::new(ScheduleDetails::new("Missa", date(9), "10:00", "11:00", "Catedral"));
    event.event_type = "missa".to_string();
    repos.events.save(&event).await.unwrap();
    let stored = repos.events.find_by_id(event.id()).await.unwrap().unwrap();
    assert_eq!(stored.event_type, "missa");

    // Rehearsals and events do not see each other
    assert!(repos.events.find_by_id(rehearsal.id()).await.unwrap().is_none());
    assert!(repos.rehearsals.find_by_id(event.id()).await.unwrap().is_none());
    assert!(repos.events.save(&Event::new(rehearsal.details.clone())).await.is_err());

    assert!(repos.rehearsals.delete(rehearsal.id()).await.unwrap());
    assert!(repos.rehearsals.find_by_id(rehearsal.id()).await.unwrap().is_none());
}

async fn check_date_queries(repos: &Repositories) {
    let late = Rehearsal::new(ScheduleDetails::new("Tarde", date(8), "19:00", "21:00", ""));
    let early = Rehearsal::new(ScheduleDetails::new("Manhã", date(8), "08:00", "09:00", ""));
    let before = Rehearsal::new(ScheduleDetails::new("Antes", date(7), "23:00", "23:30", ""));
    let after = Rehearsal::new(ScheduleDetails::new("Depois", date(9), "00:00", "01:00", ""));
    for r in [&late, &early, &before, &after] {
        repos.rehearsals.save(r).await.unwrap();
    }

    let titles: Vec<String> = repos
        .rehearsals
        .find_by_date(date(8))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.details.title)
        .collect();
    assert_eq!(titles, vec!["Manhã", "Tarde"]);

    let range = repos.rehearsals.find_by_date_range(date(7), date(9)).await.unwrap();
    assert_eq!(range.len(), 3);
    assert_eq!(range[0].details.title, "Antes");

    assert_eq!(repos.rehearsals.find_all().await.unwrap().len(), 4);
}

async fn check_attempt_log(repos: &Repositories) {
    for (i, outcome) in [AttemptOutcome::Sent, AttemptOutcome::Failed, AttemptOutcome::Sent]
        .into_iter()
        .enumerate()
    {
        let target =
            DispatchTarget::item(TemplateKind::AssignmentNotice, ItemKind::Event, "e1", "m1");
        let error = (outcome == AttemptOutcome::Failed).then(|| "stub rejected".to_string());
        let attempt = target.record(&format!("551190000000{}", i), outcome, error, 1);
        repos.attempts.record(&attempt).await.unwrap();
    }

    let recent = repos.attempts.recent(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].phone, "5511900000002");
    assert_eq!(recent[1].outcome, AttemptOutcome::Failed);
    assert_eq!(recent[1].error.as_deref(), Some("stub rejected"));
    assert_eq!(recent[1].item_kind, Some(ItemKind::Event));
    assert!(recent[0].id > recent[1].id);
    assert!(recent[0].attempted_at <= Utc::now());
}

#[tokio::test]
async fn test_sqlite_musician_queries() {
    check_musician_queries(&sqlite_repos().await).await;
}

#[tokio::test]
async fn test_document_musician_queries() {
    check_musician_queries(&Repositories::in_memory()).await;
}

#[tokio::test]
async fn test_sqlite_item_roundtrip() {
    check_item_roundtrip(&sqlite_repos().await).await;
}

#[tokio::test]
async fn test_document_item_roundtrip() {
    check_item_roundtrip(&Repositories::in_memory()).await;
}

#[tokio::test]
async fn test_sqlite_date_queries() {
    check_date_queries(&sqlite_repos().await).await;
}

#[tokio::test]
async fn test_document_date_queries() {
    check_date_queries(&Repositories::in_memory()).await;
}

#[tokio::test]
async fn test_sqlite_attempt_log() {
    check_attempt_log(&sqlite_repos().await).await;
}

#[tokio::test]
async fn test_document_attempt_log() {
    check_attempt_log(&Repositories::in_memory()).await;
}

#[tokio::test]
async fn test_document_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("saem-documents.json");

    let ana = Musician::new("Ana", "11911111111", "violino");
    let rehearsal = full_rehearsal(&[&ana]);
    {
        let repos = Repositories::from_document(DocumentStore::open(path.clone()).await.unwrap());
        repos.musicians.save(&ana).await.unwrap();
        repos.rehearsals.save(&rehearsal).await.unwrap();
    }
    assert!(path.exists());

    let repos = Repositories::from_document(DocumentStore::open(path).await.unwrap());
    let stored = repos.rehearsals.find_by_id(rehearsal.id()).await.unwrap().unwrap();
    assert_eq!(stored, rehearsal);
    assert_eq!(repos.musicians.find_by_id(&ana.id).await.unwrap(), Some(ana));
}

#[tokio::test]
async fn test_document_stores_sharing_a_file_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saem-documents.json");

    // One store per process: the server and a CLI command
    let server = Repositories::from_document(DocumentStore::open(path.clone()).await.unwrap());
    let cli = Repositories::from_document(DocumentStore::open(path.clone()).await.unwrap());

    let ana = Musician::new("Ana", "11911111111", "violino");
    let rehearsal = full_rehearsal(&[&ana]);
    cli.musicians.save(&ana).await.unwrap();
    cli.rehearsals.save(&rehearsal).await.unwrap();

    // The server flags the assignment, then the CLI adds a musician
    let mut flagged = server.rehearsals.find_by_id(rehearsal.id()).await.unwrap().unwrap();
    flagged.details.assignments[0].notified = true;
    server.rehearsals.save(&flagged).await.unwrap();

    let bruno = Musician::new("Bruno", "11922222222", "órgão");
    cli.musicians.save(&bruno).await.unwrap();

    let reopened = Repositories::from_document(DocumentStore::open(path).await.unwrap());
    assert_eq!(reopened.musicians.find_all().await.unwrap().len(), 2);
    let stored = reopened.rehearsals.find_by_id(rehearsal.id()).await.unwrap().unwrap();
    assert!(stored.details.assignments[0].notified);
    assert_eq!(server.musicians.find_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_document_stores_sharing_a_file_keep_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saem-documents.json");
    let first = Arc::new(DocumentStore::open(path.clone()).await.unwrap());
    let second = Arc::new(DocumentStore::open(path.clone()).await.unwrap());

    let target = DispatchTarget::item(TemplateKind::AssignmentNotice, ItemKind::Event, "e1", "m1");
    let attempt = target.record("5511900000000", AttemptOutcome::Sent, None, 1);

    let mut writes = tokio::task::JoinSet::new();
    for i in 0..10 {
        let store = if i % 2 == 0 { first.clone() } else { second.clone() };
        let attempt = attempt.clone();
        writes.spawn(async move { store.record(&attempt).await.unwrap() });
    }
    let mut ids = Vec::new();
    while let Some(id) = writes.join_next().await {
        ids.push(id.unwrap());
    }

    ids.sort_unstable();
    assert_eq!(ids, (1..=10).collect::<Vec<i64>>());
    assert_eq!(first.recent(100).await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_sqlite_file_backend_opens_through_config() {
    use saem_common::config::{RootFolderInitializer, StorageConfig};

    let dir = tempfile::tempdir().unwrap();
    let initializer = RootFolderInitializer::new(dir.path().to_path_buf());
    let storage = StorageConfig::default();

    let repos = Repositories::open(&storage, &initializer).await.unwrap();
    repos.musicians.save(&Musician::new("Ana", "11911111111", "violino")).await.unwrap();

    assert!(initializer.database_path(&storage).exists());
}
