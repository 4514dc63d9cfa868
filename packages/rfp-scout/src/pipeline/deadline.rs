//! Best-effort deadline parsing and the actionability check.
//!
//! Accepted formats, numeric forms in U.S. month/day order:
//! - `2025-05-01` (optionally followed by a time)
//! - `5/1/2025`, `5/1/25`, `5-1-2025`
//! - `May 1, 2025`, `May 1st, 2025`, `Sept. 1, 2025`
//! - `1 May 2025`, `1st May 2025`
//!
//! Anything else is unparseable. When several dates appear, the latest wins.
//! A two-digit year reads as 20yy unless that lands more than
//! [`TWO_DIGIT_YEAR_LOOKAHEAD`] years past the current year (`12/31/99` is
//! a last-century date, not 2099).

use chrono::{Datelike, Duration, Local, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ParseError;
use crate::types::config::ACTIONABILITY_WINDOW_DAYS;

const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2100;

/// How far ahead of the current year a two-digit year may point.
pub const TWO_DIGIT_YEAR_LOOKAHEAD: i32 = 5;

const MONTHS: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

lazy_static! {
    static ref ISO: Regex = Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})(?:\b|T)").unwrap();

    static ref US_SLASH: Regex = Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").unwrap();

    static ref US_DASH: Regex = Regex::new(r"\b(\d{1,2})-(\d{1,2})-(\d{4})\b").unwrap();

    static ref MONTH_FIRST: Regex = Regex::new(&format!(
        r"(?i)\b{}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b",
        MONTHS
    ))
    .unwrap();

    static ref DAY_FIRST: Regex = Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{}\.?,?\s+(\d{{4}})\b",
        MONTHS
    ))
    .unwrap();
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn make_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_year(raw: &str, this_year: i32) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    if raw.len() != 2 {
        return Some(year);
    }
    let year = 2000 + year;
    (year <= this_year + TWO_DIGIT_YEAR_LOOKAHEAD).then_some(year)
}

/// Every valid date found in `text`, in match order per format.
pub fn find_dates(text: &str) -> Vec<NaiveDate> {
    find_dates_in_year(text, Local::now().year())
}

fn find_dates_in_year(text: &str, this_year: i32) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    for caps in ISO.captures_iter(text) {
        if let (Ok(y), Ok(m), Ok(d)) = (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
            dates.extend(make_date(y, m, d));
        }
    }

    for re in [&*US_SLASH, &*US_DASH] {
        for caps in re.captures_iter(text) {
            let (Ok(m), Ok(d), Some(y)) = (caps[1].parse(), caps[2].parse(), expand_year(&caps[3], this_year))
            else {
                continue;
            };
            dates.extend(make_date(y, m, d));
        }
    }

    for caps in MONTH_FIRST.captures_iter(text) {
        if let (Some(m), Ok(d), Ok(y)) = (month_number(&caps[1]), caps[2].parse(), caps[3].parse()) {
            dates.extend(make_date(y, m, d));
        }
    }

    for caps in DAY_FIRST.captures_iter(text) {
        if let (Ok(d), Some(m), Ok(y)) = (caps[1].parse(), month_number(&caps[2]), caps[3].parse()) {
            dates.extend(make_date(y, m, d));
        }
    }

    dates
}

/// Whether `text` carries at least one recognizable date.
pub fn contains_date(text: &str) -> bool {
    !find_dates(text).is_empty()
}

/// Parse deadline text, keeping the latest date it mentions.
pub fn parse_deadline(text: &str) -> Result<NaiveDate, ParseError> {
    find_dates(text)
        .into_iter()
        .max()
        .ok_or_else(|| ParseError::Deadline {
            text: text.chars().take(120).collect(),
        })
}

/// First deadline that still counts as actionable on `today`.
pub fn earliest_actionable(today: NaiveDate) -> NaiveDate {
    today + Duration::days(ACTIONABILITY_WINDOW_DAYS)
}

/// Whether a deadline leaves at least the fixed lead time (inclusive).
pub fn is_actionable(deadline: NaiveDate, today: NaiveDate) -> bool {
    deadline >= earliest_actionable(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_supported_formats() {
        let cases = [
            ("2025-05-01", date(2025, 5, 1)),
            ("2025-05-01T14:00:00", date(2025, 5, 1)),
            ("Due: 5/1/2025 2:00 PM", date(2025, 5, 1)),
            ("5/1/25", date(2025, 5, 1)),
            ("Close 05-01-2025", date(2025, 5, 1)),
            ("May 1, 2025", date(2025, 5, 1)),
            ("Thursday, May 1st, 2025 at 2pm", date(2025, 5, 1)),
            ("Sept. 12, 2025", date(2025, 9, 12)),
            ("Dec 3 2025", date(2025, 12, 3)),
            ("1 May 2025", date(2025, 5, 1)),
            ("22nd October 2025", date(2025, 10, 22)),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_deadline(text).unwrap(), expected, "{}", text);
        }
    }

    #[test]
    fn test_latest_date_wins() {
        let text = "Posted 4/1/2025. Questions due 4/10/2025. Bids close April 24, 2025.";
        assert_eq!(parse_deadline(text).unwrap(), date(2025, 4, 24));
    }

    #[test]
    fn test_unparseable() {
        for text in ["", "TBD", "Open until filled", "13/45/2025", "1/1/1999", "Q3 2025"] {
            assert!(parse_deadline(text).is_err(), "{}", text);
        }
    }

    #[test]
    fn test_two_digit_years_stay_near_the_present() {
        assert_eq!(find_dates_in_year("Due 6/30/29", 2025), vec![date(2029, 6, 30)]);
        assert_eq!(find_dates_in_year("Due 6/30/30", 2025), vec![date(2030, 6, 30)]);
        assert!(find_dates_in_year("Due 6/30/31", 2025).is_empty());
        assert!(find_dates_in_year("Posted 12/31/99", 2025).is_empty());
        assert!(parse_deadline("Posted 12/31/99").is_err());
        // The four-digit form is unaffected.
        assert_eq!(find_dates_in_year("6/30/2031", 2025), vec![date(2031, 6, 30)]);
    }

    #[test]
    fn test_window_boundary() {
        let today = date(2025, 4, 1);
        assert!(!is_actionable(date(2025, 4, 3), today));
        assert!(!is_actionable(date(2025, 4, 4), today));
        assert!(is_actionable(date(2025, 4, 5), today));
        assert_eq!(earliest_actionable(today), date(2025, 4, 5));
    }

    proptest! {
        #[test]
        fn window_is_exactly_four_days(offset in -30i64..60, days in 0i64..20_000) {
            let today = date(2000, 1, 1) + Duration::days(days);
            let deadline = today + Duration::days(offset);
            prop_assert_eq!(is_actionable(deadline, today), offset >= ACTIONABILITY_WINDOW_DAYS);
        }

        #[test]
        fn iso_dates_round_trip(days in 0i64..36_000) {
            let d = date(2000, 1, 1) + Duration::days(days);
            prop_assume!(d.year() <= MAX_YEAR);
            prop_assert_eq!(parse_deadline(&d.format("%Y-%m-%d").to_string()).unwrap(), d);
        }
    }
}
