//! Service-day arithmetic. A service day runs 04:00 to 03:59 the next
//! calendar day; effective seconds count from the service day's midnight so
//! timetables written past 24:00 stay monotonic.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;

use super::types::ServiceType;

pub const SERVICE_DAY_START_HOUR: u32 = 4;

/// The service day covering a local instant. Instants before 04:00 belong to
/// the previous calendar day's service.
pub fn service_date(at: DateTime<Tz>) -> NaiveDate {
    let date = at.date_naive();
    if at.hour() < SERVICE_DAY_START_HOUR {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Seconds since the service day's midnight. 08:00 -> 28800; 02:00 the next
/// calendar day -> 93600 (26:00 of the service day).
pub fn effective_seconds(at: DateTime<Tz>) -> i64 {
    let date = service_date(at);
    let midnight = at
        .timezone()
        .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
        .earliest()
        .unwrap_or(at);
    (at - midnight).num_seconds()
}

/// The operating calendar on a given service day: Saturday, Sunday and
/// configured public holidays run the SaturdayHoliday timetable.
pub fn operating_calendar(date: NaiveDate, holidays: &[NaiveDate]) -> ServiceType {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || holidays.contains(&date) {
        ServiceType::SaturdayHoliday
    } else {
        ServiceType::Weekday
    }
}

/// Parse an `HH:MM` timetable entry into effective seconds. Hours may exceed
/// 24 (already normalized to the next day); hours below the service-day
/// start are pre-04:00 times belonging to the previous day and get a day
/// added to keep trip times monotonic.
pub fn parse_timetable_time(value: &str) -> Option<u32> {
    let (h, m) = value.split_once(':')?;
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    let mut secs = hours * 3600 + minutes * 60;
    if hours < SERVICE_DAY_START_HOUR {
        secs += 86_400;
    }
    Some(secs)
}
