//! On-demand assignment notices
//!
//! A coordinator publishes one rehearsal or event and every assigned musician
//! gets a notice, whether or not they were notified before.

use saem_common::{Event, ItemKind, Rehearsal, ScheduledItem};
use serde::Serialize;
use tracing::{info, warn};

use super::{EngineContext, EngineError};
use crate::outbox::{DispatchTarget, TemplateKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifyOutcome {
    pub success_count: usize,
    pub fail_count: usize,
}

pub struct OnDemandNotifier {
    ctx: EngineContext,
}

impl OnDemandNotifier {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn notify_rehearsal(&self, id: &str) -> Result<NotifyOutcome, EngineError> {
        let mut rehearsal: Rehearsal = self
            .ctx
            .repos
            .rehearsals
            .find_by_id(id)
            .await
            .map_err(EngineError::Persistence)?
            .ok_or_else(|| EngineError::not_found(ItemKind::Rehearsal, id))?;

        let outcome = self.notify_all(&mut rehearsal).await;

        self.ctx
            .repos
            .rehearsals
            .save(&rehearsal)
            .await
            .map_err(EngineError::Persistence)?;

        Ok(outcome)
    }

    pub async fn notify_event(&self, id: &str) -> Result<NotifyOutcome, EngineError> {
        let mut event: Event = self
            .ctx
            .repos
            .events
            .find_by_id(id)
            .await
            .map_err(EngineError::Persistence)?
            .ok_or_else(|| EngineError::not_found(ItemKind::Event, id))?;

        let outcome = self.notify_all(&mut event).await;

        self.ctx
            .repos
            .events
            .save(&event)
            .await
            .map_err(EngineError::Persistence)?;

        Ok(outcome)
    }

    async fn notify_all<T: ScheduledItem>(&self, item: &mut T) -> NotifyOutcome {
        let snapshot = item.details().clone();
        let mut outcome = NotifyOutcome::default();

        for assignment in item.details_mut().assignments.iter_mut() {
            let found = self.ctx.repos.musicians.find_by_id(&assignment.musician_id).await;
            let musician = match found {
                Ok(Some(musician)) if self.ctx.has_usable_phone(&musician) => musician,
                Ok(Some(_)) => {
                    warn!(
                        item_id = %snapshot.id,
                        musician_id = %assignment.musician_id,
                        "Musician has no phone"
                    );
                    outcome.fail_count += 1;
                    continue;
                }
                Ok(None) => {
                    warn!(
                        item_id = %snapshot.id,
                        musician_id = %assignment.musician_id,
                        "Assigned musician not found"
                    );
                    outcome.fail_count += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        item_id = %snapshot.id,
                        musician_id = %assignment.musician_id,
                        error = %e,
                        "Failed to load assigned musician"
                    );
                    outcome.fail_count += 1;
                    continue;
                }
            };

            let phone = self.ctx.phones.normalize(&musician.phone);
            let message = self.ctx.templater.assignment_notice(&musician, T::KIND, &snapshot);
            let target = DispatchTarget::item(
                TemplateKind::AssignmentNotice,
                T::KIND,
                &snapshot.id,
                &musician.id,
            );

            if self.ctx.dispatcher.dispatch(&phone, &message, target).await {
                assignment.notified = true;
                outcome.success_count += 1;
            } else {
                outcome.fail_count += 1;
            }
        }

        item.details_mut().touch();

        info!(
            kind = %T::KIND,
            item_id = %snapshot.id,
            success_count = outcome.success_count,
            fail_count = outcome.fail_count,
            "Assignment notices sent"
        );
        outcome
    }
}
