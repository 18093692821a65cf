//! Background loops for `serve`
//!
//! - the daily digest trigger, firing once a day at a fixed local time
//! - the pairing poll, which keeps the messaging status fresh while a QR code
//!   is waiting to be scanned
//!
//! Both stop when their [`CancellationToken`] is cancelled. A digest that is
//! already running is allowed to finish.

use chrono::{DateTime, Days, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};
use saem_common::config::ScheduleConfig;
use saem_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::NotificationEngine;
use crate::messaging::MessagingClient;

/// Fixed local time of day for the digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            Error::Config(format!("Invalid digest time {:02}:{:02}", hour, minute))
        })?;
        Ok(Self { at })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::new(config.digest_hour, config.digest_minute)
    }

    pub fn time(&self) -> NaiveTime {
        self.at
    }

    /// First trigger strictly after `now`, as a real instant in `now`'s zone.
    ///
    /// A trigger time skipped by a DST jump fires an hour later on the wall
    /// clock. A repeated one fires at its first occurrence.
    pub fn next_run_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        (0..=2)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .filter_map(|day| resolve_local(&tz, day.and_time(self.at)))
            .find(|candidate| candidate > now)
            .unwrap_or_else(|| now.clone() + ChronoDuration::days(1))
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + ChronoDuration::hours(1))).earliest())
}

/// Run the digest every day at `schedule` until cancelled
pub async fn run_daily_digest_loop(
    engine: Arc<NotificationEngine>,
    schedule: DailySchedule,
    cancel: CancellationToken,
) {
    info!(at = %schedule.time().format("%H:%M"), "Daily digest trigger started");

    loop {
        // Real instants, so a DST change between now and the trigger is accounted for
        let now = Local::now();
        let next = schedule.next_run_after(&now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next_run = %next, wait_secs = wait.as_secs(), "Next daily digest scheduled");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Daily digest trigger stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match engine.run_daily_digest().await {
            Ok(report) => debug!(?report, "Scheduled digest complete"),
            Err(e) => error!(error = %e, "Scheduled daily digest failed"),
        }
    }
}

/// Poll the transport while it is not connected so pairing completes without a send
pub async fn run_pairing_poll(
    client: Arc<dyn MessagingClient>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if client.status().connected {
            continue;
        }
        let status = client.refresh().await;
        if let Some(code) = &status.pairing_code {
            debug!(state = %status.state, code = %code, "Waiting for WhatsApp pairing");
        }
    }
}
