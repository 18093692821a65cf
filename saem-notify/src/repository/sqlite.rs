//! SQLite repositories
//!
//! Rehearsals and events share the `schedule_items` table, told apart by `kind`.
//! Assignments live in their own table and are rewritten whole on every save,
//! inside the same transaction as the item row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use saem_common::models::weekday_bit;
use saem_common::{
    Assignment, AvailableDays, Error, Event, ItemKind, Musician, Rehearsal, Result, ScheduleDetails,
    ScheduledItem,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{AttemptLog, EventRepository, MusicianRepository, RehearsalRepository};
use crate::outbox::NotificationAttempt;

const DATE_FORMAT: &str = "%Y-%m-%d";

const MUSICIAN_COLUMNS: &str = "id, name, phone, instrument, is_organist, available_days, active, \
                                notes, user_id, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, title, date, start_time, end_time, location, description, \
                            event_type, repertoire, created_by, created_at, updated_at";

/// All repositories over one connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_item<T: ScheduledItem>(&self, id: &str) -> Result<Option<T>> {
        let sql = format!(
            "SELECT {} FROM schedule_items WHERE kind = ? AND id = ?",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(T::KIND.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate_item(&row).await?)),
            None => Ok(None),
        }
    }

    async fn load_items<T: ScheduledItem>(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<T>> {
        let rows = match range {
            Some((start, end_exclusive)) => {
                let sql = format!(
                    "SELECT {} FROM schedule_items \
                     WHERE kind = ? AND date >= ? AND date < ? \
                     ORDER BY date, start_time",
                    ITEM_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(T::KIND.as_str())
                    .bind(start.format(DATE_FORMAT).to_string())
                    .bind(end_exclusive.format(DATE_FORMAT).to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM schedule_items WHERE kind = ? ORDER BY date, start_time",
                    ITEM_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(T::KIND.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.hydrate_item(row).await?);
        }
        Ok(items)
    }

    async fn hydrate_item<T: ScheduledItem>(&self, row: &SqliteRow) -> Result<T> {
        let id: String = row.try_get("id")?;
        let repertoire: String = row.try_get("repertoire")?;
        let date: String = row.try_get("date")?;

        let details = ScheduleDetails {
            title: row.try_get("title")?,
            date: parse_date(&date)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            repertoire: serde_json::from_str(&repertoire)?,
            assignments: self.load_assignments(&id).await?,
            created_by: row.try_get("created_by")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            id,
        };

        Ok(T::from_parts(details, row.try_get("event_type")?))
    }

    async fn load_assignments(&self, item_id: &str) -> Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT musician_id, confirmed, notified FROM assignments \
             WHERE item_id = ? ORDER BY position",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Assignment> {
                Ok(Assignment {
                    musician_id: row.try_get("musician_id")?,
                    confirmed: row.try_get("confirmed")?,
                    notified: row.try_get("notified")?,
                })
            })
            .collect()
    }

    async fn save_item<T: ScheduledItem>(&self, item: &T) -> Result<()> {
        let details = item.details();
        let repertoire = serde_json::to_string(&details.repertoire)?;

        let mut tx = self.pool.begin().await?;

        // Ids are unique across kinds; refuse to turn a rehearsal into an event
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT kind FROM schedule_items WHERE id = ?")
                .bind(&details.id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((kind,)) = existing {
            if kind != T::KIND.as_str() {
                return Err(Error::InvalidInput(format!(
                    "Item {} is stored as a {}, not a {}",
                    details.id,
                    kind,
                    T::KIND
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO schedule_items (
                id, kind, title, date, start_time, end_time, location, description,
                event_type, repertoire, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                date = excluded.date,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                location = excluded.location,
                description = excluded.description,
                event_type = excluded.event_type,
                repertoire = excluded.repertoire,
                created_by = excluded.created_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&details.id)
        .bind(T::KIND.as_str())
        .bind(&details.title)
        .bind(details.date.format(DATE_FORMAT).to_string())
        .bind(&details.start_time)
        .bind(&details.end_time)
        .bind(&details.location)
        .bind(&details.description)
        .bind(item.event_type())
        .bind(&repertoire)
        .bind(&details.created_by)
        .bind(details.created_at.to_rfc3339())
        .bind(details.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM assignments WHERE item_id = ?")
            .bind(&details.id)
            .execute(&mut *tx)
            .await?;

        for (position, assignment) in details.assignments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO assignments (item_id, position, musician_id, confirmed, notified) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&details.id)
            .bind(position as i64)
            .bind(&assignment.musician_id)
            .bind(assignment.confirmed)
            .bind(assignment.notified)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            kind = %T::KIND,
            id = %details.id,
            assignments = details.assignments.len(),
            "Saved item"
        );
        Ok(())
    }

    async fn delete_item(&self, kind: ItemKind, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedule_items WHERE kind = ? AND id = ?")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| Error::Internal(format!("Stored date {:?} is malformed: {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Stored timestamp {:?} is malformed: {}", value, e)))
}

fn musician_from_row(row: &SqliteRow) -> Result<Musician> {
    let mask: i64 = row.try_get("available_days")?;

    Ok(Musician {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        instrument: row.try_get("instrument")?,
        is_organist: row.try_get("is_organist")?,
        available_days: AvailableDays::from_mask(mask as u8),
        active: row.try_get("active")?,
        notes: row.try_get("notes")?,
        user_id: row.try_get("user_id")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[async_trait]
impl MusicianRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Musician>> {
        let sql = format!("SELECT {} FROM musicians WHERE id = ?", MUSICIAN_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(musician_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Musician>> {
        let sql = format!(
            "SELECT {} FROM musicians ORDER BY name COLLATE NOCASE",
            MUSICIAN_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(musician_from_row).collect()
    }

    async fn find_available_by_day(&self, weekday: Weekday) -> Result<Vec<Musician>> {
        let sql = format!(
            "SELECT {} FROM musicians \
             WHERE active = 1 AND (available_days & ?) != 0 \
             ORDER BY name COLLATE NOCASE",
            MUSICIAN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(weekday_bit(weekday) as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(musician_from_row).collect()
    }

    async fn save(&self, musician: &Musician) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO musicians (
                id, name, phone, instrument, is_organist, available_days, active,
                notes, user_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                instrument = excluded.instrument,
                is_organist = excluded.is_organist,
                available_days = excluded.available_days,
                active = excluded.active,
                notes = excluded.notes,
                user_id = excluded.user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&musician.id)
        .bind(&musician.name)
        .bind(&musician.phone)
        .bind(&musician.instrument)
        .bind(musician.is_organist)
        .bind(musician.available_days.to_mask() as i64)
        .bind(musician.active)
        .bind(&musician.notes)
        .bind(&musician.user_id)
        .bind(musician.created_at.to_rfc3339())
        .bind(musician.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM musicians WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RehearsalRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rehearsal>> {
        self.load_item(id).await
    }

    async fn find_all(&self) -> Result<Vec<Rehearsal>> {
        self.load_items(None).await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Rehearsal>> {
        self.load_items(Some((start, end_exclusive))).await
    }

    async fn save(&self, rehearsal: &Rehearsal) -> Result<()> {
        self.save_item(rehearsal).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_item(ItemKind::Rehearsal, id).await
    }
}

#[async_trait]
impl EventRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Event>> {
        self.load_item(id).await
    }

    async fn find_all(&self) -> Result<Vec<Event>> {
        self.load_items(None).await
    }

    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<Event>> {
        self.load_items(Some((start, end_exclusive))).await
    }

    async fn save(&self, event: &Event) -> Result<()> {
        self.save_item(event).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_item(ItemKind::Event, id).await
    }
}

#[async_trait]
impl AttemptLog for SqliteStore {
    async fn record(&self, attempt: &NotificationAttempt) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_attempts (
                item_kind, item_id, musician_id, phone, template,
                outcome, error, tries, attempted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.item_kind.map(|k| k.as_str()))
        .bind(&attempt.item_id)
        .bind(&attempt.musician_id)
        .bind(&attempt.phone)
        .bind(attempt.template.as_str())
        .bind(attempt.outcome.as_str())
        .bind(&attempt.error)
        .bind(attempt.tries as i64)
        .bind(attempt.attempted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<NotificationAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, item_kind, item_id, musician_id, phone, template,
                   outcome, error, tries, attempted_at
            FROM notification_attempts
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<NotificationAttempt> {
                let item_kind: Option<String> = row.try_get("item_kind")?;
                let template: String = row.try_get("template")?;
                let outcome: String = row.try_get("outcome")?;
                let tries: i64 = row.try_get("tries")?;

                Ok(NotificationAttempt {
                    id: Some(row.try_get("id")?),
                    item_kind: item_kind.as_deref().map(|k| k.parse::<ItemKind>()).transpose()?,
                    item_id: row.try_get("item_id")?,
                    musician_id: row.try_get("musician_id")?,
                    phone: row.try_get("phone")?,
                    template: template.parse()?,
                    outcome: outcome.parse()?,
                    error: row.try_get("error")?,
                    tries: tries as u32,
                    attempted_at: parse_timestamp(&row.try_get::<String, _>("attempted_at")?)?,
                })
            })
            .collect()
    }
}
