use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Delay and lateness window declared by submission code, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub delay: Option<f64>,
    pub allowed_lateness: Option<f64>,
}

/// Absolute start and deadline shared by every job of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

/// What a job should do when it is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Proceed,
    /// Too early, sleep this long first
    Wait(Duration),
}

/// Longest delay or lateness window accepted, about a century
pub const MAX_SECONDS: f64 = 100.0 * 365.25 * 86_400.0;

fn seconds(value: f64) -> Duration {
    Duration::milliseconds((value * 1000.0).round() as i64)
}

/// `from` moved forward by `value` seconds, refusing windows chrono can't represent
fn offset(from: DateTime<Utc>, value: f64, name: &str) -> Result<DateTime<Utc>> {
    if !value.is_finite() || !(0.0..=MAX_SECONDS).contains(&value) {
        return Err(Error::Schedule(format!(
            "{name} of {value}s is outside 0..={MAX_SECONDS}s"
        )));
    }
    from.checked_add_signed(seconds(value))
        .ok_or_else(|| Error::Schedule(format!("{name} of {value}s from {from} is out of range")))
}

impl ScheduleRequest {
    pub fn is_empty(&self) -> bool {
        self.delay.is_none() && self.allowed_lateness.is_none()
    }

    /// Anchor the request at `now`
    ///
    /// A lateness window without a delay counts from `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Schedule> {
        if self.is_empty() {
            return Ok(Schedule::default());
        }
        let start = offset(now, self.delay.unwrap_or(0.0), "delay")?;
        let deadline = self
            .allowed_lateness
            .map(|lateness| offset(start, lateness, "allowed_lateness"))
            .transpose()?;
        debug!("Resolved schedule: start {start}, deadline {deadline:?}");
        Ok(Schedule {
            start: Some(start),
            deadline,
        })
    }
}

impl Schedule {
    /// Decide whether a job invoked at `now` may run
    ///
    /// Reaching the deadline exactly already counts as too late.
    pub fn check(&self, now: DateTime<Utc>) -> Result<Readiness> {
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Err(Error::DeadlineExceeded { deadline, now });
            }
        }
        match self.start {
            Some(start) if now < start => Ok(Readiness::Wait(start - now)),
            _ => Ok(Readiness::Proceed),
        }
    }
}
