//! Derivation of the polling window a job queries upstreams with.

use chrono::{DateTime, Duration, Local, LocalResult, TimeZone, Utc};

/// The instant a job's upstream queries reach back to.
///
/// Derived from job parameters at start: take the local date
/// `numberOfDaysToQuery` days back, pin the time of day to
/// `startHour:00:00.000` local, then convert to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    /// Window start, in UTC.
    pub from_utc: DateTime<Utc>,
}

impl QueryWindow {
    /// Derive the window from job parameters, relative to the current local time.
    pub fn starting(days_back: u16, start_hour: u8) -> Self {
        Self::starting_at(days_back, start_hour, Local::now())
    }

    /// Derive the window relative to an explicit "now".
    pub fn starting_at(days_back: u16, start_hour: u8, now: DateTime<Local>) -> Self {
        let day = now - Duration::days(i64::from(days_back));
        let naive = day
            .date_naive()
            .and_hms_opt(u32::from(start_hour.min(23)), 0, 0)
            .expect("start hour is clamped to 0..=23");

        let from_local = match Local.from_local_datetime(&naive) {
            LocalResult::Single(t) => t,
            // DST fold or gap: take the earlier instant.
            LocalResult::Ambiguous(t, _) => t,
            LocalResult::None => Local
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .expect("an hour past a DST gap resolves"),
        };

        Self {
            from_utc: from_local.with_timezone(&Utc),
        }
    }

    /// The window start as unix seconds (Q&A `fromdate` parameter).
    pub fn unix_seconds(&self) -> i64 {
        self.from_utc.timestamp()
    }

    /// The window start as ISO-8601 without fractional seconds
    /// (SCM `created:>` filter).
    pub fn iso8601(&self) -> String {
        self.from_utc.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}
