//! Domain models
//!
//! Musicians, scheduled items (rehearsals and events) and the assignments that
//! link them. Items embed their assignments; the `notified` flag on an
//! assignment is the only notification state kept on the item itself.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::time::{format_calendar_date, parse_time_of_day};
use crate::{Error, Result};

/// Default `event_type` for events created without one
pub const DEFAULT_EVENT_TYPE: &str = "outro";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Which kind of scheduled item an assignment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Rehearsal,
    Event,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Rehearsal => "rehearsal",
            ItemKind::Event => "event",
        }
    }

    /// Noun used in outbound messages ("ensaio" / "evento")
    pub fn noun(&self) -> &'static str {
        match self {
            ItemKind::Rehearsal => "ensaio",
            ItemKind::Event => "evento",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rehearsal" => Ok(ItemKind::Rehearsal),
            "event" => Ok(ItemKind::Event),
            other => Err(Error::InvalidInput(format!("Unknown item kind: {}", other))),
        }
    }
}

/// Weekday availability, one flag per day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableDays {
    pub sunday: bool,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
}

impl AvailableDays {
    /// Build from a list of weekdays
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut available = Self::default();
        for day in days {
            available.set(*day, true);
        }
        available
    }

    pub fn is_available(&self, day: Weekday) -> bool {
        match day {
            Weekday::Sun => self.sunday,
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
        }
    }

    pub fn set(&mut self, day: Weekday, available: bool) {
        let slot = match day {
            Weekday::Sun => &mut self.sunday,
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
        };
        *slot = available;
    }

    /// Bit mask with bit `n` set for weekday index `n` (Sunday = 0)
    pub fn to_mask(&self) -> u8 {
        ALL_WEEKDAYS
            .iter()
            .filter(|day| self.is_available(**day))
            .fold(0u8, |mask, day| mask | weekday_bit(*day))
    }

    pub fn from_mask(mask: u8) -> Self {
        let mut available = Self::default();
        for day in ALL_WEEKDAYS {
            available.set(day, mask & weekday_bit(day) != 0);
        }
        available
    }
}

/// Weekdays in index order, Sunday first
pub const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Single-bit mask for a weekday (Sunday = bit 0)
pub fn weekday_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// Ensemble member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Musician {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    /// Raw phone number as entered by a coordinator
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub instrument: String,
    #[serde(default)]
    pub is_organist: bool,
    #[serde(default)]
    pub available_days: AvailableDays,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub notes: String,
    /// Linked user account, if the musician can log in
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Musician {
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        instrument: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            phone: phone.into(),
            instrument: instrument.into(),
            is_organist: false,
            available_days: AvailableDays::default(),
            active: true,
            notes: String::new(),
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_available_days(mut self, days: &[Weekday]) -> Self {
        self.available_days = AvailableDays::from_days(days);
        self
    }

    pub fn is_available_on(&self, day: Weekday) -> bool {
        self.active && self.available_days.is_available(day)
    }
}

/// One piece in an item's repertoire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepertoireItem {
    pub title: String,
    #[serde(default)]
    pub composer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RepertoireItem {
    pub fn new(title: impl Into<String>, composer: Option<&str>) -> Self {
        Self {
            title: title.into(),
            composer: composer.map(str::to_string),
            notes: None,
        }
    }
}

/// Link between a musician and a rehearsal or event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub musician_id: String,
    /// Musician confirmed attendance
    #[serde(default)]
    pub confirmed: bool,
    /// A notification was delivered for this item
    #[serde(default)]
    pub notified: bool,
}

impl Assignment {
    pub fn new(musician_id: impl Into<String>) -> Self {
        Self {
            musician_id: musician_id.into(),
            confirmed: false,
            notified: false,
        }
    }
}

/// Fields shared by rehearsals and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDetails {
    #[serde(default = "new_id")]
    pub id: String,
    pub title: String,
    /// Calendar day, local to the ensemble
    pub date: NaiveDate,
    /// "HH:MM"
    pub start_time: String,
    /// "HH:MM"
    pub end_time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repertoire: Vec<RepertoireItem>,
    #[serde(default, alias = "musicians")]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDetails {
    pub fn new(
        title: impl Into<String>,
        date: NaiveDate,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            date,
            start_time: start_time.into(),
            end_time: end_time.into(),
            location: location.into(),
            description: None,
            repertoire: Vec::new(),
            assignments: Vec::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// "HH:MM - HH:MM"
    pub fn time_window(&self) -> String {
        format!("{} - {}", self.start_time, self.end_time)
    }

    /// Date as shown to musicians (dd/mm/yyyy)
    pub fn display_date(&self) -> String {
        format_calendar_date(self.date)
    }

    /// Check time-of-day fields and required text
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        let start = parse_time_of_day(&self.start_time)?;
        let end = parse_time_of_day(&self.end_time)?;
        if end < start {
            return Err(Error::InvalidInput(format!(
                "End time {} is before start time {}",
                self.end_time, self.start_time
            )));
        }
        Ok(())
    }

    pub fn is_assigned(&self, musician_id: &str) -> bool {
        self.assignments.iter().any(|a| a.musician_id == musician_id)
    }

    /// Assign a musician; a new assignment starts unconfirmed and unnotified
    pub fn add_musician(&mut self, musician_id: &str) -> Result<()> {
        if self.is_assigned(musician_id) {
            return Err(Error::InvalidInput(format!(
                "Musician {} is already assigned to {}",
                musician_id, self.id
            )));
        }
        self.assignments.push(Assignment::new(musician_id));
        self.touch();
        Ok(())
    }

    pub fn remove_musician(&mut self, musician_id: &str) -> Result<()> {
        let before = self.assignments.len();
        self.assignments.retain(|a| a.musician_id != musician_id);
        if self.assignments.len() == before {
            return Err(Error::NotFound(format!(
                "Musician {} is not assigned to {}",
                musician_id, self.id
            )));
        }
        self.touch();
        Ok(())
    }

    pub fn confirm_musician(&mut self, musician_id: &str) -> Result<()> {
        let assignment = self
            .assignments
            .iter_mut()
            .find(|a| a.musician_id == musician_id)
            .ok_or_else(|| {
                Error::NotFound(format!("Musician {} is not assigned to {}", musician_id, self.id))
            })?;
        assignment.confirmed = true;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Rehearsal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rehearsal {
    #[serde(flatten)]
    pub details: ScheduleDetails,
}

impl Rehearsal {
    pub fn new(details: ScheduleDetails) -> Self {
        Self { details }
    }
}

/// Event (service, concert, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub details: ScheduleDetails,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

fn default_event_type() -> String {
    DEFAULT_EVENT_TYPE.to_string()
}

impl Event {
    pub fn new(details: ScheduleDetails) -> Self {
        Self {
            details,
            event_type: default_event_type(),
        }
    }
}

/// Common view over rehearsals and events
pub trait ScheduledItem: Clone + Send + Sync + 'static {
    const KIND: ItemKind;

    fn details(&self) -> &ScheduleDetails;

    fn details_mut(&mut self) -> &mut ScheduleDetails;

    fn event_type(&self) -> Option<&str> {
        None
    }

    /// Rebuild an item from stored parts; rehearsals ignore `event_type`
    fn from_parts(details: ScheduleDetails, event_type: Option<String>) -> Self;

    fn id(&self) -> &str {
        &self.details().id
    }
}

impl ScheduledItem for Rehearsal {
    const KIND: ItemKind = ItemKind::Rehearsal;

    fn details(&self) -> &ScheduleDetails {
        &self.details
    }

    fn details_mut(&mut self) -> &mut ScheduleDetails {
        &mut self.details
    }

    fn from_parts(details: ScheduleDetails, _event_type: Option<String>) -> Self {
        Self { details }
    }
}

impl ScheduledItem for Event {
    const KIND: ItemKind = ItemKind::Event;

    fn details(&self) -> &ScheduleDetails {
        &self.details
    }

    fn details_mut(&mut self) -> &mut ScheduleDetails {
        &mut self.details
    }

    fn event_type(&self) -> Option<&str> {
        Some(&self.event_type)
    }

    fn from_parts(details: ScheduleDetails, event_type: Option<String>) -> Self {
        Self {
            details,
            event_type: event_type.unwrap_or_else(default_event_type),
        }
    }
}
