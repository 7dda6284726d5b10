use std::fmt::Debug;
use std::time::Duration;
use time::OffsetDateTime;

/// Source of the current time. The manager consults the clock for every
/// renewal decision, so tests can pin time to a fixed instant.
pub trait Clock: Debug + Send + Sync {
    fn utc_now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock stuck at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub OffsetDateTime);

impl Clock for FrozenClock {
    fn utc_now(&self) -> OffsetDateTime {
        self.0
    }
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))
}

#[allow(clippy::missing_panics_doc)]
pub fn current_time_truncated() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap(/* unreachable */)
}
