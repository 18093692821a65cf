//! Daily digest
//!
//! Runs once per local day:
//! 1. remind every not-yet-notified assignment of today's rehearsals and events
//! 2. tell musicians who are available today but have nothing scheduled
//!
//! Assignment reminders are de-duplicated through the `notified` flag, so the
//! job can be re-run on the same day without resending. Availability reminders
//! are not tracked.

use chrono::NaiveDate;
use saem_common::time::DayWindow;
use saem_common::{Musician, ScheduledItem};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{EngineContext, EngineError};
use crate::outbox::{DispatchTarget, TemplateKind};

/// What one digest run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    pub date: Option<NaiveDate>,
    /// Rehearsals and events found for the day
    pub items: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    /// Assignments left alone: unknown musician or no phone
    pub skipped: usize,
    pub availability_sent: usize,
    pub availability_failed: usize,
    pub items_persisted: usize,
    pub persist_failures: usize,
}

pub struct DailyDigestJob {
    ctx: EngineContext,
}

impl DailyDigestJob {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Run for the clock's current local day
    pub async fn run(&self) -> Result<DigestReport, EngineError> {
        self.run_on(self.ctx.clock.today()).await
    }

    /// Run for `today`
    pub async fn run_on(&self, today: NaiveDate) -> Result<DigestReport, EngineError> {
        let window = DayWindow::for_day(today);
        info!(date = %today, weekday = window.weekday_index(), "Daily digest starting");

        if !self.ctx.client.status().connected && !self.ctx.client.initialize().await {
            warn!("Messaging transport unavailable; failed sends are retried on the next run");
        }

        let rehearsals = self
            .ctx
            .repos
            .rehearsals
            .find_by_date_range(window.start, window.end_exclusive)
            .await
            .map_err(EngineError::Persistence)?;
        let events = self
            .ctx
            .repos
            .events
            .find_by_date_range(window.start, window.end_exclusive)
            .await
            .map_err(EngineError::Persistence)?;

        let mut report = DigestReport {
            date: Some(today),
            items: rehearsals.len() + events.len(),
            ..DigestReport::default()
        };

        // Anyone assigned today, confirmed or not, gets no availability reminder
        let scheduled: HashSet<String> = rehearsals
            .iter()
            .map(|r| r.details())
            .chain(events.iter().map(|e| e.details()))
            .flat_map(|d| d.assignments.iter().map(|a| a.musician_id.clone()))
            .collect();

        for mut rehearsal in rehearsals {
            if self.remind_assigned(&mut rehearsal, &mut report).await {
                let saved = self.ctx.repos.rehearsals.save(&rehearsal).await;
                self.note_persist(rehearsal.id(), saved, &mut report);
            }
        }

        for mut event in events {
            if self.remind_assigned(&mut event, &mut report).await {
                let saved = self.ctx.repos.events.save(&event).await;
                self.note_persist(event.id(), saved, &mut report);
            }
        }

        let available = self
            .ctx
            .repos
            .musicians
            .find_available_by_day(window.weekday())
            .await
            .map_err(EngineError::Persistence)?;

        for musician in available.iter().filter(|m| !scheduled.contains(&m.id)) {
            self.remind_available(musician, &mut report).await;
        }

        info!(
            date = %today,
            items = report.items,
            reminders_sent = report.reminders_sent,
            reminders_failed = report.reminders_failed,
            skipped = report.skipped,
            availability_sent = report.availability_sent,
            availability_failed = report.availability_failed,
            persist_failures = report.persist_failures,
            "Daily digest finished"
        );

        Ok(report)
    }

    /// Send reminders for the item's unnotified assignments. Returns whether any
    /// flag changed.
    async fn remind_assigned<T: ScheduledItem>(
        &self,
        item: &mut T,
        report: &mut DigestReport,
    ) -> bool {
        let snapshot = item.details().clone();
        let mut changed = false;

        for assignment in item.details_mut().assignments.iter_mut() {
            if assignment.notified {
                continue;
            }

            let found = self.ctx.repos.musicians.find_by_id(&assignment.musician_id).await;
            let musician = match found {
                Ok(Some(musician)) => musician,
                Ok(None) => {
                    warn!(
                        item_id = %snapshot.id,
                        musician_id = %assignment.musician_id,
                        "Assigned musician not found, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        item_id = %snapshot.id,
                        musician_id = %assignment.musician_id,
                        error = %e,
                        "Failed to load assigned musician, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            if !self.ctx.has_usable_phone(&musician) {
                debug!(
                    item_id = %snapshot.id,
                    musician_id = %musician.id,
                    "Musician has no phone, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let phone = self.ctx.phones.normalize(&musician.phone);
            let message = self.ctx.templater.reminder_for_today(&musician, T::KIND, &snapshot);
            let target = DispatchTarget::item(
                TemplateKind::DailyReminder,
                T::KIND,
                &snapshot.id,
                &musician.id,
            );

            if self.ctx.dispatcher.dispatch(&phone, &message, target).await {
                assignment.notified = true;
                changed = true;
                report.reminders_sent += 1;
            } else {
                report.reminders_failed += 1;
            }
        }

        if changed {
            item.details_mut().touch();
        }
        changed
    }

    async fn remind_available(&self, musician: &Musician, report: &mut DigestReport) {
        if !self.ctx.has_usable_phone(musician) {
            debug!(musician_id = %musician.id, "Available musician has no phone, skipping");
            report.skipped += 1;
            return;
        }

        let phone = self.ctx.phones.normalize(&musician.phone);
        let message = self.ctx.templater.availability_reminder(musician);
        let target = DispatchTarget::musician(TemplateKind::AvailabilityReminder, &musician.id);

        if self.ctx.dispatcher.dispatch(&phone, &message, target).await {
            report.availability_sent += 1;
        } else {
            report.availability_failed += 1;
        }
    }

    fn note_persist(
        &self,
        item_id: &str,
        saved: saem_common::Result<()>,
        report: &mut DigestReport,
    ) {
        match saved {
            Ok(()) => report.items_persisted += 1,
            Err(e) => {
                // Flags stay unset in storage; the next run resends to these assignments
                warn!(item_id, error = %e, "Failed to persist notification flags");
                report.persist_failures += 1;
            }
        }
    }
}
