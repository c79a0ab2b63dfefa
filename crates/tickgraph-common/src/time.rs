use chrono::{DateTime, TimeZone, Utc};
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Sub};

/* ───────────────────── Engine time ───────────────────────────────────
The engine clock is a monotonic instant with microsecond resolution,
stored as microseconds since the Unix epoch. Two sentinels bound the
range: MIN_DT means "never" (the modification time of a value that has
not been written) and MAX_DT means "no scheduled work".
------------------------------------------------------------------- */

/// A microsecond-resolution engine instant.
///
/// All modification timestamps, scheduler entries and cycle times are
/// `EngineTime`. Ordering is total; the sentinels sort below/above every
/// representable instant.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineTime(i64);

/// Sentinel: "never". The modification time of an invalid value.
pub const MIN_DT: EngineTime = EngineTime(i64::MIN);

/// Sentinel: "no scheduled work".
pub const MAX_DT: EngineTime = EngineTime(i64::MAX);

impl EngineTime {
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[inline]
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Build from a calendar instant, truncating to microseconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }

    /// Convert back to a calendar instant. Sentinels have no calendar form.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self == MIN_DT || self == MAX_DT {
            return None;
        }
        Utc.timestamp_micros(self.0).single()
    }

    #[inline]
    pub fn is_min(self) -> bool {
        self == MIN_DT
    }

    #[inline]
    pub fn is_max(self) -> bool {
        self == MAX_DT
    }

    /// Saturating advance; sentinels are absorbing.
    #[inline]
    pub fn offset(self, delta: EngineTimeDelta) -> Self {
        if self == MIN_DT || self == MAX_DT {
            return self;
        }
        Self(self.0.saturating_add(delta.0))
    }
}

impl Add<EngineTimeDelta> for EngineTime {
    type Output = EngineTime;

    #[inline]
    fn add(self, rhs: EngineTimeDelta) -> EngineTime {
        self.offset(rhs)
    }
}

impl AddAssign<EngineTimeDelta> for EngineTime {
    #[inline]
    fn add_assign(&mut self, rhs: EngineTimeDelta) {
        *self = self.offset(rhs);
    }
}

impl Sub<EngineTime> for EngineTime {
    type Output = EngineTimeDelta;

    #[inline]
    fn sub(self, rhs: EngineTime) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == MIN_DT {
            return f.write_str("MIN_DT");
        }
        if *self == MAX_DT {
            return f.write_str("MAX_DT");
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            None => write!(f, "{}us", self.0),
        }
    }
}

/// A signed microsecond duration between two engine instants.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineTimeDelta(i64);

impl EngineTimeDelta {
    pub const ZERO: EngineTimeDelta = EngineTimeDelta(0);

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000)
    }

    #[inline]
    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn from_chrono(d: chrono::Duration) -> Self {
        Self(d.num_microseconds().unwrap_or(i64::MAX))
    }

    pub fn to_chrono(self) -> chrono::Duration {
        chrono::Duration::microseconds(self.0)
    }
}

impl Add for EngineTimeDelta {
    type Output = EngineTimeDelta;

    #[inline]
    fn add(self, rhs: EngineTimeDelta) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl Display for EngineTimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
