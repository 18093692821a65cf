//! Bulk roster import
//!
//! Loads musicians, rehearsals and events from one JSON document:
//!
//! ```json
//! { "musicians": [...], "rehearsals": [...], "events": [...] }
//! ```
//!
//! Records are upserted by id. Items referencing unknown musicians are rejected
//! before anything is written.

use saem_common::{Error, Event, Musician, Rehearsal, Result, ScheduledItem};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::Repositories;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Roster {
    pub musicians: Vec<Musician>,
    pub rehearsals: Vec<Rehearsal>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub musicians: usize,
    pub rehearsals: usize,
    pub events: usize,
}

impl Roster {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Validate every item and write the roster through `repos`
    pub async fn import(&self, repos: &Repositories) -> Result<RosterSummary> {
        let mut known: HashSet<String> = repos
            .musicians
            .find_all()
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        known.extend(self.musicians.iter().map(|m| m.id.clone()));

        for musician in &self.musicians {
            if musician.name.trim().is_empty() {
                return Err(Error::InvalidInput(format!("Musician {} has no name", musician.id)));
            }
        }
        for item in &self.rehearsals {
            check_item(item, &known)?;
        }
        for item in &self.events {
            check_item(item, &known)?;
        }

        for musician in &self.musicians {
            repos.musicians.save(musician).await?;
        }
        for rehearsal in &self.rehearsals {
            repos.rehearsals.save(rehearsal).await?;
        }
        for event in &self.events {
            repos.events.save(event).await?;
        }

        let summary = RosterSummary {
            musicians: self.musicians.len(),
            rehearsals: self.rehearsals.len(),
            events: self.events.len(),
        };
        info!(
            musicians = summary.musicians,
            rehearsals = summary.rehearsals,
            events = summary.events,
            "Roster imported"
        );
        Ok(summary)
    }
}

fn check_item<T: ScheduledItem>(item: &T, known: &HashSet<String>) -> Result<()> {
    let details = item.details();
    details
        .validate()
        .map_err(|e| Error::InvalidInput(format!("{} {}: {}", T::KIND, details.id, e)))?;

    let mut seen = HashSet::new();
    for assignment in &details.assignments {
        if !known.contains(&assignment.musician_id) {
            return Err(Error::InvalidInput(format!(
                "{} {} references unknown musician {}",
                T::KIND,
                details.id,
                assignment.musician_id
            )));
        }
        if !seen.insert(assignment.musician_id.as_str()) {
            return Err(Error::InvalidInput(format!(
                "{} {} assigns musician {} twice",
                T::KIND,
                details.id,
                assignment.musician_id
            )));
        }
    }
    Ok(())
}
