use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::{RealtimeError, Result};

// ──────────────────────────── display zone ───────────────────────────────── //

/// Slider label format, e.g. `19:00:00 PDT`.
pub const LABEL_FORMAT: &str = "%H:%M:%S %Z";

/// Default format for timestamps in tables and popups, e.g. `06/19/14 19:00:00 PDT`.
pub const DEFAULT_TIME_FORMAT: &str = "%m/%d/%y %H:%M:%S %Z";

/// IANA timezone used purely for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayZone(Tz);

impl DisplayZone {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse::<Tz>()
            .map(DisplayZone)
            .map_err(|_| RealtimeError::InvalidTimezone(name.to_string()))
    }

    pub fn utc() -> Self {
        DisplayZone(Tz::Etc__UTC)
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn format(&self, time: DateTime<Utc>, fmt: &str) -> String {
        time.with_timezone(&self.0).format(fmt).to_string()
    }

    /// `HH:MM:SS <abbrev>` in this zone.
    pub fn label(&self, time: DateTime<Utc>) -> String {
        self.format(time, LABEL_FORMAT)
    }

    /// Wall-clock `time` on the calendar day `reference` falls on in this zone.
    ///
    /// Returns `None` when that local time does not exist (DST gap).
    pub fn on_same_day(&self, reference: DateTime<Utc>, time: NaiveTime) -> Option<DateTime<Utc>> {
        let day = reference.with_timezone(&self.0).date_naive();
        self.0
            .from_local_datetime(&day.and_time(time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self::utc()
    }
}

// ────────────────────────── formatting / parsing ─────────────────────────── //

/// Parse an ISO 8601 / RFC 3339 datetime string.
///
/// Accepts:
/// - ``2026-02-23T14:30:00Z``
/// - ``2026-02-23T14:30:00.123+00:00``
/// - ``2026-02-23T14:30:00``  (assumes UTC)
/// - ``2026-02-23``           (start of day UTC)
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|nd| nd.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Parse a seek box entry `HH`, `HH:MM` or `HH:MM:SS`; missing parts are zero.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let invalid = || RealtimeError::InvalidTimeOfDay(s.to_string());
    let trimmed = s.trim().trim_start_matches('#');
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut parts = [0u32; 3];
    let mut count = 0;
    for piece in trimmed.split(':') {
        if count == 3 {
            return Err(invalid());
        }
        parts[count] = piece.trim().parse().map_err(|_| invalid())?;
        count += 1;
    }
    NaiveTime::from_hms_opt(parts[0], parts[1], parts[2]).ok_or_else(invalid)
}
