//! Relative date expressions (`today`, `last week`, `past 3 days`) resolved to half-open ranges.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

/// Half-open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: OffsetDateTime,
    /// Exclusive end.
    pub end: OffsetDateTime,
}

impl TimeWindow {
    /// Resolve a relative expression against `now` (whose offset is the caller's zone).
    ///
    /// Matching is case-insensitive and whitespace-collapsed. Returns `None` for
    /// anything outside the vocabulary and on date overflow.
    #[must_use]
    pub fn parse(text: &str, now: OffsetDateTime) -> Option<Self> {
        let normalized = text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();
        let words: Vec<&str> = normalized.iter().map(String::as_str).collect();
        let offset = now.offset();
        let today = now.date();

        match words.as_slice() {
            ["today"] => Self::days(today, today.next_day()?, offset),
            ["yesterday"] => Self::days(today.previous_day()?, today, offset),
            ["this", "week"] => {
                let monday = monday_of(today)?;
                Self::days(monday, monday.checked_add(Duration::weeks(1))?, offset)
            }
            ["last", "week"] => {
                let monday = monday_of(today)?;
                Self::days(monday.checked_sub(Duration::weeks(1))?, monday, offset)
            }
            ["this", "month"] => {
                let first = first_of_month(today)?;
                Self::days(first, shift_months(first, 1)?, offset)
            }
            ["last", "month"] => {
                let first = first_of_month(today)?;
                Self::days(shift_months(first, -1)?, first, offset)
            }
            ["this", "year"] => {
                let first = first_of_year(today.year())?;
                Self::days(first, first_of_year(today.year().checked_add(1)?)?, offset)
            }
            ["last", "year"] => {
                let first = first_of_year(today.year())?;
                Self::days(first_of_year(today.year().checked_sub(1)?)?, first, offset)
            }
            ["last" | "past", count, unit] => {
                let count: i64 = count.parse().ok().filter(|count| *count >= 1)?;
                let end = today.next_day()?;
                let start = match *unit {
                    "day" | "days" => end.checked_sub(Duration::days(count))?,
                    "week" | "weeks" => end.checked_sub(Duration::weeks(count))?,
                    "month" | "months" => shift_months(end, count.checked_neg()?)?,
                    _ => return None,
                };
                Self::days(start, end, offset)
            }
            _ => None,
        }
    }

    /// Returns true when `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at < self.end
    }

    fn days(start: Date, end: Date, offset: UtcOffset) -> Option<Self> {
        Some(Self {
            start: start.midnight().assume_offset(offset),
            end: end.midnight().assume_offset(offset),
        })
    }
}

/// Date criterion accepted by the query composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationWindow {
    /// A relative expression or a whole calendar day.
    Range(TimeWindow),
    /// An exact instant.
    Exact(OffsetDateTime),
}

impl CreationWindow {
    /// Try a relative expression, then an ISO date (`2024-05-01`), then an RFC 3339 instant.
    #[must_use]
    pub fn parse(text: &str, now: OffsetDateTime) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(window) = TimeWindow::parse(trimmed, now) {
            return Some(Self::Range(window));
        }
        if let Ok(date) = Date::parse(trimmed, format_description!("[year]-[month]-[day]")) {
            return TimeWindow::days(date, date.next_day()?, now.offset()).map(Self::Range);
        }
        OffsetDateTime::parse(trimmed, &Rfc3339).ok().map(Self::Exact)
    }

    /// Returns true when `at` satisfies the criterion.
    #[must_use]
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        match self {
            Self::Range(window) => window.contains(at),
            Self::Exact(instant) => *instant == at,
        }
    }
}

fn monday_of(date: Date) -> Option<Date> {
    date.checked_sub(Duration::days(i64::from(date.weekday().number_days_from_monday())))
}

fn first_of_month(date: Date) -> Option<Date> {
    Date::from_calendar_date(date.year(), date.month(), 1).ok()
}

fn first_of_year(year: i32) -> Option<Date> {
    Date::from_calendar_date(year, Month::January, 1).ok()
}

/// Move `date` by `delta` months, clamping the day to the target month's length.
fn shift_months(date: Date, delta: i64) -> Option<Date> {
    let index = i64::from(date.year())
        .checked_mul(12)?
        .checked_add(i64::from(u8::from(date.month())) - 1)?
        .checked_add(delta)?;
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    (1..=date.day())
        .rev()
        .find_map(|day| Date::from_calendar_date(year, month, day).ok())
}
