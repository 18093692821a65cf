//! Notification attempt records
//!
//! Every dispatch, successful or not, is appended to the attempt log with its
//! outcome and error text. The `notified` flag on an assignment stays the source
//! of truth for de-duplication; the log is for auditing and diagnosis.

use chrono::{DateTime, Utc};
use saem_common::{Error, ItemKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which message template a dispatch used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    DailyReminder,
    AssignmentNotice,
    AvailabilityReminder,
    Test,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::DailyReminder => "daily_reminder",
            TemplateKind::AssignmentNotice => "assignment_notice",
            TemplateKind::AvailabilityReminder => "availability_reminder",
            TemplateKind::Test => "test",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "daily_reminder" => Ok(TemplateKind::DailyReminder),
            "assignment_notice" => Ok(TemplateKind::AssignmentNotice),
            "availability_reminder" => Ok(TemplateKind::AvailabilityReminder),
            "test" => Ok(TemplateKind::Test),
            other => Err(Error::InvalidInput(format!("Unknown template kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Failed => "failed",
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "sent" => Ok(AttemptOutcome::Sent),
            "failed" => Ok(AttemptOutcome::Failed),
            other => Err(Error::InvalidInput(format!("Unknown attempt outcome: {}", other))),
        }
    }
}

/// One dispatch of one message to one phone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    /// Assigned by the log on insert
    #[serde(default)]
    pub id: Option<i64>,
    pub item_kind: Option<ItemKind>,
    pub item_id: Option<String>,
    pub musician_id: Option<String>,
    pub phone: String,
    pub template: TemplateKind,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Transport calls made, including retries
    pub tries: u32,
    pub attempted_at: DateTime<Utc>,
}

/// What a dispatch is about; copied into the attempt record
#[derive(Debug, Clone, Copy)]
pub struct DispatchTarget<'a> {
    pub template: TemplateKind,
    pub item_kind: Option<ItemKind>,
    pub item_id: Option<&'a str>,
    pub musician_id: Option<&'a str>,
}

impl<'a> DispatchTarget<'a> {
    pub fn item(
        template: TemplateKind,
        kind: ItemKind,
        item_id: &'a str,
        musician_id: &'a str,
    ) -> Self {
        Self {
            template,
            item_kind: Some(kind),
            item_id: Some(item_id),
            musician_id: Some(musician_id),
        }
    }

    pub fn musician(template: TemplateKind, musician_id: &'a str) -> Self {
        Self {
            template,
            item_kind: None,
            item_id: None,
            musician_id: Some(musician_id),
        }
    }

    pub fn bare(template: TemplateKind) -> Self {
        Self {
            template,
            item_kind: None,
            item_id: None,
            musician_id: None,
        }
    }

    pub fn record(
        &self,
        phone: &str,
        outcome: AttemptOutcome,
        error: Option<String>,
        tries: u32,
    ) -> NotificationAttempt {
        NotificationAttempt {
            id: None,
            item_kind: self.item_kind,
            item_id: self.item_id.map(str::to_string),
            musician_id: self.musician_id.map(str::to_string),
            phone: phone.to_string(),
            template: self.template,
            outcome,
            error,
            tries,
            attempted_at: Utc::now(),
        }
    }
}
