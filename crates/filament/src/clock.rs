//! File timestamps in the filesystem's native resolution.
//!
//! A [`FileTime`] counts ticks since the filesystem epoch of the host:
//!
//! | Host     | Epoch       | Tick   |
//! |----------|-------------|--------|
//! | Windows  | 1601-01-01  | 100 ns |
//! | Others   | 1970-01-01  | 1 ns   |
//!
//! Conversions to and from [`SystemTime`], Unix timestamps and
//! `chrono::DateTime<Utc>` are checked; they return `None` instead of
//! wrapping when a value does not fit.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// A point in time as stored by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime {
    ticks: i64,
}

impl FileTime {
    /// Ticks per second on this host.
    #[cfg(windows)]
    pub const TICKS_PER_SECOND: i64 = 10_000_000;
    /// Ticks per second on this host.
    #[cfg(not(windows))]
    pub const TICKS_PER_SECOND: i64 = 1_000_000_000;

    /// Seconds from the filesystem epoch to the Unix epoch.
    #[cfg(windows)]
    pub const UNIX_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
    /// Seconds from the filesystem epoch to the Unix epoch.
    #[cfg(not(windows))]
    pub const UNIX_EPOCH_OFFSET_SECS: i64 = 0;

    const NANOS_PER_TICK: i128 = NANOS_PER_SECOND / Self::TICKS_PER_SECOND as i128;

    /// The filesystem epoch itself.
    pub const EPOCH: FileTime = FileTime { ticks: 0 };

    /// Create from a raw tick count since the filesystem epoch.
    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// Raw tick count since the filesystem epoch.
    pub const fn ticks(self) -> i64 {
        self.ticks
    }

    /// Create from nanoseconds relative to the Unix epoch.
    ///
    /// Precision below one tick is truncated toward negative infinity.
    pub fn from_unix_nanos(nanos: i128) -> Option<Self> {
        let since_epoch =
            nanos.checked_add(Self::UNIX_EPOCH_OFFSET_SECS as i128 * NANOS_PER_SECOND)?;
        let ticks = since_epoch.div_euclid(Self::NANOS_PER_TICK);
        i64::try_from(ticks).ok().map(Self::from_ticks)
    }

    /// Nanoseconds relative to the Unix epoch.
    pub fn to_unix_nanos(self) -> i128 {
        self.ticks as i128 * Self::NANOS_PER_TICK
            - Self::UNIX_EPOCH_OFFSET_SECS as i128 * NANOS_PER_SECOND
    }

    /// Create from a Unix timestamp split into seconds and nanoseconds.
    pub fn from_unix_timestamp(secs: i64, nanos: u32) -> Option<Self> {
        if nanos as i128 >= NANOS_PER_SECOND {
            return None;
        }
        Self::from_unix_nanos(secs as i128 * NANOS_PER_SECOND + nanos as i128)
    }

    /// Unix timestamp as seconds and nanoseconds within the second.
    pub fn to_unix_timestamp(self) -> (i64, u32) {
        let nanos = self.to_unix_nanos();
        // Bounded by i64 ticks, so the seconds always fit.
        let secs = nanos.div_euclid(NANOS_PER_SECOND) as i64;
        let subsec = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
        (secs, subsec)
    }

    /// Convert from a [`SystemTime`].
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        let nanos = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i128::try_from(after.as_nanos()).ok()?,
            Err(before) => -i128::try_from(before.duration().as_nanos()).ok()?,
        };
        Self::from_unix_nanos(nanos)
    }

    /// Convert to a [`SystemTime`].
    pub fn to_system_time(self) -> Option<SystemTime> {
        let (secs, nanos) = self.to_unix_timestamp();
        if secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(secs as u64, nanos))
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(secs.unsigned_abs()))?
                .checked_add(Duration::from_nanos(nanos as u64))
        }
    }

    /// Convert from a UTC date-time.
    pub fn from_datetime(time: &DateTime<Utc>) -> Option<Self> {
        Self::from_unix_timestamp(time.timestamp(), time.timestamp_subsec_nanos())
    }

    /// Convert to a UTC date-time.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.to_unix_timestamp();
        DateTime::from_timestamp(secs, nanos)
    }
}

/// The clock of the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileClock;

impl FileClock {
    /// The current time in filesystem units.
    pub fn now() -> FileTime {
        // The system clock is always inside the representable range.
        FileTime::from_system_time(SystemTime::now()).unwrap_or(FileTime::EPOCH)
    }
}

/// The three timestamps of a file.
///
/// When read from a file, `None` means the host does not record that time.
/// When written, `None` leaves the time unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTimes {
    /// Creation ("birth") time.
    pub creation: Option<FileTime>,
    /// Time of last access.
    pub last_access: Option<FileTime>,
    /// Time of last data modification.
    pub last_write: Option<FileTime>,
}

impl FileTimes {
    /// No time set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the creation time.
    pub fn creation(mut self, time: FileTime) -> Self {
        self.creation = Some(time);
        self
    }

    /// Set the last access time.
    pub fn last_access(mut self, time: FileTime) -> Self {
        self.last_access = Some(time);
        self
    }

    /// Set the last write time.
    pub fn last_write(mut self, time: FileTime) -> Self {
        self.last_write = Some(time);
        self
    }

    /// Whether every field is `None`.
    pub fn is_empty(&self) -> bool {
        self.creation.is_none() && self.last_access.is_none() && self.last_write.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unix_epoch() {
        let time = FileTime::from_unix_timestamp(0, 0).unwrap();
        assert_eq!(
            time.ticks(),
            FileTime::UNIX_EPOCH_OFFSET_SECS * FileTime::TICKS_PER_SECOND
        );
        assert_eq!(time.to_system_time(), Some(UNIX_EPOCH));
        assert_eq!(time.to_unix_timestamp(), (0, 0));
    }

    #[test]
    fn test_datetime_conversion() {
        let dt = Utc.with_ymd_and_hms(2016, 3, 14, 15, 9, 26).unwrap();
        let time = FileTime::from_datetime(&dt).unwrap();
        assert_eq!(time.to_datetime(), Some(dt));
        assert_eq!(time.to_unix_timestamp(), (dt.timestamp(), 0));
    }

    #[test]
    fn test_before_unix_epoch() {
        let time = FileTime::from_unix_timestamp(-1, 500_000_000).unwrap();
        assert_eq!(time.to_unix_timestamp(), (-1, 500_000_000));

        let system = time.to_system_time().unwrap();
        assert_eq!(
            UNIX_EPOCH.duration_since(system).unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(FileTime::from_system_time(system), Some(time));
    }

    #[test]
    fn test_sub_tick_precision_truncated() {
        let time = FileTime::from_unix_timestamp(10, 123_456_789).unwrap();
        let (secs, nanos) = time.to_unix_timestamp();
        assert_eq!(secs, 10);
        assert_eq!(nanos as i128 % FileTime::NANOS_PER_TICK, 0);
        assert!(123_456_789 - nanos < 100);
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(FileTime::from_unix_timestamp(i64::MAX, 0).is_none());
        assert!(FileTime::from_unix_timestamp(0, 1_000_000_000).is_none());
    }

    #[test]
    fn test_clock_now_is_recent() {
        let now = FileClock::now();
        let dt = now.to_datetime().unwrap();
        assert!(dt.timestamp() > 1_500_000_000);
        assert!(FileClock::now() >= now);
    }

    #[test]
    fn test_file_times_builder() {
        let t = FileTime::from_ticks(42);
        let times = FileTimes::new().last_write(t);
        assert_eq!(times.last_write, Some(t));
        assert!(times.creation.is_none());
        assert!(!times.is_empty());
        assert!(FileTimes::default().is_empty());
    }
}
