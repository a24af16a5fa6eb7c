//! Date Resolver
//!
//! Anchors a parsed phrase to a reference instant in household local time.

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeDelta,
    TimeZone, Utc, Weekday,
};
use eyre::Result;
use tracing::{debug, info};

use super::parser::{self, Anchor, DatePart, Parsed};
use super::vocab::Unit;
use crate::config::DatesConfig;

/// Weekdays and calendar dates without a time land at midday
fn implied_time() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Canonical text of an instant: `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn iso_millis(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A resolved due date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDate {
    pub instant: DateTime<Utc>,
    pub iso: String,
}

impl ResolvedDate {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            iso: iso_millis(&instant),
            instant,
        }
    }
}

/// Resolves natural-language date phrases against a reference instant
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    forward_date: bool,
    offset: FixedOffset,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new(true, Utc.fix())
    }
}

impl DateResolver {
    pub fn new(forward_date: bool, offset: FixedOffset) -> Self {
        Self { forward_date, offset }
    }

    pub fn from_config(config: &DatesConfig) -> Result<Self> {
        Ok(Self::new(config.forward_date, config.offset()?))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Resolve a phrase; `None` means it did not name a usable time
    pub fn resolve(&self, phrase: &str, now: DateTime<Utc>) -> Option<ResolvedDate> {
        debug!(%phrase, %now, forward_date = %self.forward_date, "resolve: called");
        let parsed = parser::parse(phrase);
        if parsed.is_empty() {
            info!(%phrase, "resolve: no date or time recognized");
            return None;
        }

        let local = now.with_timezone(&self.offset);
        let Some(naive) = self.anchor(&parsed, local) else {
            info!(%phrase, ?parsed, "resolve: phrase does not name a valid time");
            return None;
        };
        let resolved = self.offset.from_local_datetime(&naive).single()?;
        let resolved = ResolvedDate::new(resolved.with_timezone(&Utc));
        debug!(%phrase, iso = %resolved.iso, "resolve: resolved");
        Some(resolved)
    }

    /// Parse an explicit date-time: RFC 3339, or a local `YYYY-MM-DDTHH:MM[:SS]`
    pub fn parse_datetime(&self, text: &str) -> Option<DateTime<Utc>> {
        debug!(%text, "parse_datetime: called");
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn anchor(&self, parsed: &Parsed, now: DateTime<FixedOffset>) -> Option<NaiveDateTime> {
        let today = now.date_naive();
        let explicit = match parsed.clock {
            Some(clock) => Some(clock.time_in(parsed.part)?),
            None => parsed.part.map(|p| p.default_time()),
        };

        let naive = match parsed.date {
            None => {
                let time = explicit?;
                let date = if self.forward_date && time < now.time() {
                    today.succ_opt()?
                } else {
                    today
                };
                date.and_time(time)
            }
            Some(DatePart::Days(days)) => {
                let date = today.checked_add_signed(TimeDelta::try_days(days)?)?;
                date.and_time(explicit.unwrap_or(now.time()))
            }
            Some(DatePart::Shift { amount, unit }) => {
                let shifted = shift(now.naive_local(), amount, unit)?;
                match explicit {
                    Some(time) => shifted.date().and_time(time),
                    None => shifted,
                }
            }
            Some(DatePart::Weekday { day, anchor }) => {
                let at = self.weekday_date(today, day, anchor)?.and_time(explicit.unwrap_or_else(implied_time));
                // A weekday naming today whose time has passed means next week
                if self.forward_date && matches!(anchor, Anchor::Bare | Anchor::This) && at < now.naive_local() {
                    at.checked_add_signed(TimeDelta::try_weeks(1)?)?
                } else {
                    at
                }
            }
            Some(DatePart::Weekend { weeks }) => {
                let saturday = days_ahead(today, Weekday::Sat) + weeks.checked_mul(7)?;
                let date = today.checked_add_signed(TimeDelta::try_days(saturday)?)?;
                date.and_time(explicit.unwrap_or_else(implied_time))
            }
            Some(DatePart::Calendar { year, month, day }) => {
                self.calendar_date(today, year, month, day)?.and_time(explicit.unwrap_or_else(implied_time))
            }
        };
        Some(naive)
    }

    fn weekday_date(&self, today: NaiveDate, day: Weekday, anchor: Anchor) -> Option<NaiveDate> {
        let ahead = days_ahead(today, day);
        let delta = match anchor {
            Anchor::Coming => ahead,
            Anchor::Bare | Anchor::This if self.forward_date => ahead,
            // Nearest occurrence, within three days either side
            Anchor::Bare | Anchor::This if ahead > 3 => ahead - 7,
            Anchor::Bare | Anchor::This => ahead,
            Anchor::Next => days_to_next(today, day),
            Anchor::Last if ahead == 0 => -7,
            Anchor::Last => ahead - 7,
        };
        today.checked_add_signed(TimeDelta::try_days(delta)?)
    }

    fn calendar_date(&self, today: NaiveDate, year: Option<i32>, month: u32, day: u32) -> Option<NaiveDate> {
        if let Some(year) = year {
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        let date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        if self.forward_date && date < today {
            NaiveDate::from_ymd_opt(today.year() + 1, month, day)
        } else {
            Some(date)
        }
    }
}

/// Days from `today` forward to the next `day`, 0 if today is that day
fn days_ahead(today: NaiveDate, day: Weekday) -> i64 {
    let target = i64::from(day.num_days_from_monday());
    let current = i64::from(today.weekday().num_days_from_monday());
    (target - current).rem_euclid(7)
}

/// Days to `next <day>`: the following week's day, unless that day already
/// passed this week (weeks start on Sunday)
fn days_to_next(today: NaiveDate, day: Weekday) -> i64 {
    let ahead = days_ahead(today, day);
    match today.weekday() {
        Weekday::Sun if ahead == 0 => 7,
        Weekday::Sun => ahead,
        Weekday::Sat => match day {
            Weekday::Sat => 7,
            Weekday::Sun => 8,
            _ => ahead,
        },
        current if day != Weekday::Sun && day.num_days_from_sunday() < current.num_days_from_sunday() => ahead,
        _ => ahead + 7,
    }
}

fn shift(at: NaiveDateTime, amount: i64, unit: Unit) -> Option<NaiveDateTime> {
    match unit {
        Unit::Minute => at.checked_add_signed(TimeDelta::try_minutes(amount)?),
        Unit::Hour => at.checked_add_signed(TimeDelta::try_hours(amount)?),
        Unit::Day => at.checked_add_signed(TimeDelta::try_days(amount)?),
        Unit::Week => at.checked_add_signed(TimeDelta::try_weeks(amount)?),
        Unit::Month => shift_months(at, amount),
        Unit::Year => shift_months(at, amount.checked_mul(12)?),
    }
}

fn shift_months(at: NaiveDateTime, amount: i64) -> Option<NaiveDateTime> {
    let months = Months::new(u32::try_from(amount.unsigned_abs()).ok()?);
    if amount >= 0 {
        at.checked_add_months(months)
    } else {
        at.checked_sub_months(months)
    }
}
