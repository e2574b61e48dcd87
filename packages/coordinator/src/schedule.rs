//! Wall-clock refresh schedules.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Timelike as _};
use taiwan_aqm_config::ScheduleConfig;

const SECS_PER_HOUR: u64 = 3600;

/// When a coordinator refreshes after its first fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Rolling interval measured from the end of the previous wait.
    Every(Duration),
    /// Once an hour, `minute` minutes past the hour.
    HourlyAt { minute: u32 },
}

impl Schedule {
    /// Delay from `now` until the next refresh is due.
    ///
    /// An hourly schedule whose minute is exactly `now` waits a full hour.
    #[must_use]
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        match *self {
            Self::Every(interval) => interval,
            Self::HourlyAt { minute } => {
                let elapsed = u64::from(now.minute()) * 60 + u64::from(now.second());
                let target = u64::from(minute.min(59)) * 60;
                let secs = if target > elapsed {
                    target - elapsed
                } else {
                    SECS_PER_HOUR - elapsed + target
                };
                let nanos = u64::from(now.nanosecond() % 1_000_000_000);
                Duration::from_secs(secs).saturating_sub(Duration::from_nanos(nanos))
            }
        }
    }
}

impl From<ScheduleConfig> for Schedule {
    fn from(config: ScheduleConfig) -> Self {
        match config {
            ScheduleConfig::EverySecs(secs) => Self::Every(Duration::from_secs(secs)),
            ScheduleConfig::HourlyAtMinute(minute) => Self::HourlyAt { minute },
        }
    }
}
