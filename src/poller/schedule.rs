//! Scheduler — drives the poll cycle on a cron or fixed-interval trigger.
//!
//! The loop awaits each tick before it looks for the next trigger, so ticks
//! are serialized by construction. Triggers that pass while a tick is still
//! running are skipped rather than queued.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::cycle::PollCycle;
use crate::error::ScheduleError;

/// When ticks fire.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed period; the first tick fires immediately.
    Interval(Duration),
    /// Cron expression, kept alongside its source text for logging.
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
}

impl Schedule {
    /// Parse a cron expression.
    ///
    /// Classic five-field expressions (`*/5 * * * *`) get a `0` seconds
    /// field prepended; six- and seven-field expressions and `@hourly`-style
    /// shorthands are passed through. An expression with no upcoming fire
    /// time (a year field in the past) is rejected here rather than ending
    /// the scheduler later.
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        if schedule.upcoming(Utc).next().is_none() {
            return Err(ScheduleError::Exhausted(normalized));
        }

        Ok(Schedule::Cron {
            expression: normalized,
            schedule: Box::new(schedule),
        })
    }

    /// Time until the next cron fire. `None` for interval schedules.
    fn next_cron_delay(&self) -> Result<Option<Duration>, ScheduleError> {
        match self {
            Schedule::Interval(_) => Ok(None),
            Schedule::Cron {
                expression,
                schedule,
            } => {
                let next = schedule
                    .upcoming(Utc)
                    .next()
                    .ok_or_else(|| ScheduleError::Exhausted(expression.clone()))?;
                Ok(Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO)))
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(period) => write!(f, "every {}s", period.as_secs_f64()),
            Schedule::Cron { expression, .. } => write!(f, "cron '{expression}'"),
        }
    }
}

/// Tick counts over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub ticks: u64,
    pub failed: u64,
}

/// Runs a [`PollCycle`] on a [`Schedule`] until shutdown.
pub struct Scheduler {
    schedule: Schedule,
    cycle: PollCycle,
}

impl Scheduler {
    pub fn new(schedule: Schedule, cycle: PollCycle) -> Self {
        Self { schedule, cycle }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A pending wait is abandoned as soon as shutdown is signalled; a tick
    /// that already started runs to completion first. Tick failures are
    /// logged and never end the loop.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SchedulerSummary, ScheduleError> {
        let mut summary = SchedulerSummary::default();
        let mut interval = match self.schedule {
            Schedule::Interval(period) => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(interval)
            }
            Schedule::Cron { .. } => None,
        };

        info!(schedule = %self.schedule, "Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                trigger = wait_for_trigger(&self.schedule, interval.as_mut()) => trigger?,
            }

            summary.ticks += 1;
            if let Err(e) = self.cycle.run_tick().await {
                summary.failed += 1;
                error!(error = %e, failed = summary.failed, "Poll tick failed");
            }
        }

        info!(ticks = summary.ticks, failed = summary.failed, "Scheduler stopped");
        Ok(summary)
    }
}

async fn wait_for_trigger(
    schedule: &Schedule,
    interval: Option<&mut Interval>,
) -> Result<(), ScheduleError> {
    if let Some(interval) = interval {
        interval.tick().await;
        return Ok(());
    }
    match schedule.next_cron_delay()? {
        Some(delay) => tokio::time::sleep(delay).await,
        None => warn!("Interval schedule without a timer"),
    }
    Ok(())
}
