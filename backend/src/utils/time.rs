use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Local midnight of `date` in `tz`, expressed in UTC.
///
/// When midnight does not exist locally (DST gap) the earliest valid instant
/// after it is used.
pub fn local_midnight_utc(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight: NaiveDateTime = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => (0..=3)
            .find_map(|hour| {
                tz.from_local_datetime(&(midnight + chrono::Duration::hours(hour)))
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
    }
}

/// Start of the local day containing `now`.
pub fn start_of_day(tz: &Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    local_midnight_utc(tz, now.with_timezone(tz).date_naive())
}

/// Start of the local ISO week (Monday) containing `now`.
pub fn start_of_week(tz: &Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    let offset = u64::from(today.weekday().num_days_from_monday());
    let monday = today.checked_sub_days(Days::new(offset)).unwrap_or(today);
    local_midnight_utc(tz, monday)
}

/// Start of the local calendar month containing `now`.
pub fn start_of_month(tz: &Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    let first = today.with_day(1).unwrap_or(today);
    local_midnight_utc(tz, first)
}
