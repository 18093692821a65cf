//! # SAEM Common Library
//!
//! Shared code for the SAEM ensemble scheduling services:
//! - Domain models (musicians, rehearsals, events, assignments)
//! - Configuration loading and root folder resolution
//! - Database schema initialization
//! - Calendar and time-of-day helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    Assignment, AvailableDays, Event, ItemKind, Musician, RepertoireItem, Rehearsal,
    ScheduleDetails, ScheduledItem,
};
