//! Phrase tokenizer and component parser
//!
//! Walks the tokens left to right, recognizing date and time components and
//! skipping everything else. No arithmetic happens here: the result is a
//! [`Parsed`] description that the resolver anchors to a reference instant.

use chrono::{NaiveTime, Weekday};
use tracing::debug;

use super::vocab::{
    self, CLOCK_RE, DAY_OF_MONTH_RE, ISO_DATE_RE, PartOfDay, SLASH_DATE_RE, Unit, YEAR_RE,
};

/// How a weekday name was qualified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Bare,
    This,
    Coming,
    Next,
    Last,
}

/// The date component of a phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    /// today / tomorrow / yesterday style offsets, keeping the reference time
    Days(i64),
    /// `in N units`, `N units ago`, `next week`
    Shift { amount: i64, unit: Unit },
    Weekday { day: Weekday, anchor: Anchor },
    /// Saturday of the current weekend, shifted by whole weeks
    Weekend { weeks: i64 },
    Calendar { year: Option<i32>, month: u32, day: u32 },
}

/// An explicit clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
    /// am/pm (or noon/midnight) was stated, so no part-of-day adjustment
    pub meridiem: bool,
}

impl ClockTime {
    /// The time of day, reading a bare hour as pm when the part of day says so
    pub fn time_in(&self, part: Option<PartOfDay>) -> Option<NaiveTime> {
        let hour = if !self.meridiem && self.hour < 12 && part.is_some_and(PartOfDay::is_after_noon) {
            self.hour + 12
        } else {
            self.hour
        };
        NaiveTime::from_hms_opt(hour, self.minute, 0)
    }
}

/// Recognized components of a phrase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    pub date: Option<DatePart>,
    pub clock: Option<ClockTime>,
    pub part: Option<PartOfDay>,
}

impl Parsed {
    /// True when nothing in the phrase was recognized
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.clock.is_none() && self.part.is_none()
    }
}

/// Lowercase and split a phrase into word tokens
pub fn tokenize(phrase: &str) -> Vec<String> {
    let normalized = phrase
        .to_lowercase()
        .replace('\u{2019}', "'")
        .replace("a.m.", "am")
        .replace("p.m.", "pm");

    normalized
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '!' | '?' | '(' | ')' | '"'))
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a phrase into its date and time components
pub fn parse(phrase: &str) -> Parsed {
    let tokens = tokenize(phrase);
    debug!(?tokens, "parse: called");
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        parsed: Parsed::default(),
    };
    while parser.pos < tokens.len() {
        let consumed = parser.step();
        parser.pos += consumed.max(1);
    }
    parser.parsed
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
    parsed: Parsed,
}

impl<'a> Parser<'a> {
    fn peek(&self, offset: usize) -> Option<&'a str> {
        self.tokens.get(self.pos + offset).map(String::as_str)
    }

    fn set_date(&mut self, date: DatePart) {
        // Later components win over earlier ones
        self.parsed.date = Some(date);
    }

    /// Recognize one component at the cursor; returns tokens consumed, 0 if none
    fn step(&mut self) -> usize {
        let Some(word) = self.peek(0) else {
            return 0;
        };

        match word {
            "at" => return self.clock(1, true).map_or(0, |n| n + 1),
            "now" => {
                self.set_date(DatePart::Days(0));
                return 1;
            }
            "today" => {
                self.set_date(DatePart::Days(0));
                return 1;
            }
            "tonight" => {
                self.set_date(DatePart::Days(0));
                self.parsed.part = Some(PartOfDay::Night);
                return 1;
            }
            "tomorrow" | "tmr" | "tmrw" | "tomorow" => {
                self.set_date(DatePart::Days(1));
                return 1;
            }
            "yesterday" => {
                self.set_date(DatePart::Days(-1));
                return 1;
            }
            "day" => return self.day_after_before(),
            "in" => {
                return match self.quantity_unit(1) {
                    Some((amount, unit)) => {
                        self.set_date(DatePart::Shift { amount, unit });
                        3
                    }
                    None => 0,
                };
            }
            "this" | "coming" | "next" | "last" => return self.anchored(word),
            "weekend" => {
                self.set_date(DatePart::Weekend { weeks: 0 });
                return 1;
            }
            _ => {}
        }

        if vocab::is_filler(word) {
            return 0;
        }
        if let Some(day) = vocab::weekday(word) {
            self.set_date(DatePart::Weekday {
                day,
                anchor: Anchor::Bare,
            });
            return 1;
        }
        if let Some(part) = vocab::part_of_day(word) {
            self.parsed.part = Some(part);
            return 1;
        }
        if vocab::month(word).is_some() {
            return self.month_first();
        }
        if let Some(n) = self.numeric_date() {
            return n;
        }
        if let Some(n) = self.relative_shift() {
            return n;
        }
        if let Some(n) = self.day_first() {
            return n;
        }
        self.clock(0, false).unwrap_or(0)
    }

    /// `day after tomorrow`, `day before yesterday`
    fn day_after_before(&mut self) -> usize {
        match (self.peek(1), self.peek(2)) {
            (Some("after"), Some("tomorrow")) => {
                self.set_date(DatePart::Days(2));
                3
            }
            (Some("before"), Some("yesterday")) => {
                self.set_date(DatePart::Days(-2));
                3
            }
            _ => 0,
        }
    }

    /// `this|coming|next|last` followed by a weekday, week/month/year, weekend or part of day
    fn anchored(&mut self, word: &'a str) -> usize {
        let (anchor, step) = match word {
            "this" => (Anchor::This, 0),
            "coming" => (Anchor::Coming, 1),
            "next" => (Anchor::Next, 1),
            _ => (Anchor::Last, -1),
        };
        let Some(target) = self.peek(1) else {
            return 0;
        };

        if let Some(day) = vocab::weekday(target) {
            self.set_date(DatePart::Weekday { day, anchor });
            return 2;
        }
        if target == "weekend" {
            let weeks = match anchor {
                Anchor::Next => 1,
                Anchor::Last => -1,
                _ => 0,
            };
            self.set_date(DatePart::Weekend { weeks });
            return 2;
        }
        if let Some(unit @ (Unit::Week | Unit::Month | Unit::Year)) = vocab::unit(target) {
            self.set_date(DatePart::Shift { amount: step, unit });
            return 2;
        }
        if anchor == Anchor::This
            && let Some(part) = vocab::part_of_day(target)
        {
            self.set_date(DatePart::Days(0));
            self.parsed.part = Some(part);
            return 2;
        }
        0
    }

    /// A quantity followed by a unit, starting at `offset`
    fn quantity_unit(&self, offset: usize) -> Option<(i64, Unit)> {
        let amount = vocab::quantity(self.peek(offset)?)?;
        let unit = vocab::unit(self.peek(offset + 1)?)?;
        Some((amount, unit))
    }

    /// `N units ago`, `N units later`, `N units from now`
    fn relative_shift(&mut self) -> Option<usize> {
        let (amount, unit) = self.quantity_unit(0)?;
        let (amount, consumed) = match (self.peek(2)?, self.peek(3)) {
            ("ago", _) => (amount.checked_neg()?, 3),
            ("later" | "hence", _) => (amount, 3),
            ("from", Some("now" | "today")) => (amount, 4),
            _ => return None,
        };
        self.set_date(DatePart::Shift { amount, unit });
        Some(consumed)
    }

    /// `August 20`, `Aug 20th 2027`
    fn month_first(&mut self) -> usize {
        let Some(month) = self.peek(0).and_then(vocab::month) else {
            return 0;
        };
        let Some(day) = self.peek(1).and_then(day_of_month) else {
            return 0;
        };
        let year = self.peek(2).and_then(year);
        self.set_date(DatePart::Calendar { year, month, day });
        if year.is_some() { 3 } else { 2 }
    }

    /// `20 August`, `20th of August 2027`
    fn day_first(&mut self) -> Option<usize> {
        let day = day_of_month(self.peek(0)?)?;
        let month_at = if self.peek(1) == Some("of") { 2 } else { 1 };
        let month = vocab::month(self.peek(month_at)?)?;
        let year = self.peek(month_at + 1).and_then(year);
        self.set_date(DatePart::Calendar { year, month, day });
        Some(month_at + 1 + usize::from(year.is_some()))
    }

    /// `2027-08-20`, `8/20`, `8/20/2027`
    fn numeric_date(&mut self) -> Option<usize> {
        let word = self.peek(0)?;
        let date = if let Some(caps) = ISO_DATE_RE.captures(word) {
            DatePart::Calendar {
                year: Some(caps[1].parse().ok()?),
                month: caps[2].parse().ok()?,
                day: caps[3].parse().ok()?,
            }
        } else if let Some(caps) = SLASH_DATE_RE.captures(word) {
            let year = match caps.get(3) {
                Some(m) if m.as_str().len() == 2 => Some(2000 + m.as_str().parse::<i32>().ok()?),
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            };
            DatePart::Calendar {
                year,
                month: caps[1].parse().ok()?,
                day: caps[2].parse().ok()?,
            }
        } else {
            return None;
        };
        self.set_date(date);
        Some(1)
    }

    /// A clock time at `offset`; bare hours only count when `allow_bare` (after "at")
    fn clock(&mut self, offset: usize, allow_bare: bool) -> Option<usize> {
        let word = self.peek(offset)?;
        let fixed = match word {
            "noon" | "midday" => Some(12),
            "midnight" => Some(0),
            _ => None,
        };
        if let Some(hour) = fixed {
            self.parsed.clock = Some(ClockTime {
                hour,
                minute: 0,
                meridiem: true,
            });
            return Some(1);
        }

        let caps = CLOCK_RE.captures(word)?;
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let mut pm = caps.get(3).map(|m| m.as_str() == "pm");
        let mut consumed = 1;
        if pm.is_none() {
            match self.peek(offset + 1) {
                Some("am") => pm = Some(false),
                Some("pm") => pm = Some(true),
                _ => {}
            }
            if pm.is_some() {
                consumed += 1;
            }
        }
        let oclock = matches!(self.peek(offset + consumed), Some("o'clock" | "oclock"));
        if oclock {
            consumed += 1;
        }

        if pm.is_none() && caps.get(2).is_none() && !oclock && !allow_bare {
            return None;
        }
        let hour = match pm {
            Some(_) if hour == 0 || hour > 12 => return None,
            Some(true) => hour % 12 + 12,
            Some(false) => hour % 12,
            None => hour,
        };
        if hour > 23 || minute > 59 {
            return None;
        }

        self.parsed.clock = Some(ClockTime {
            hour,
            minute,
            meridiem: pm.is_some(),
        });
        Some(consumed)
    }
}

fn day_of_month(word: &str) -> Option<u32> {
    let caps = DAY_OF_MONTH_RE.captures(word)?;
    let day: u32 = caps[1].parse().ok()?;
    (1..=31).contains(&day).then_some(day)
}

fn year(word: &str) -> Option<i32> {
    YEAR_RE.is_match(word).then(|| word.parse().ok()).flatten()
}
