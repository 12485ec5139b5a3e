//! Epidemiological week calendar: `(year, week) <-> ISO calendar date`, and
//! the 52-week season window (EW41(Y) .. EW40(Y+1)) built on top of it.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::error::{ForecastError, Result};

const COMPONENT: &str = "epiweek";

/// An epidemiological week: a `(year, week)` pair with `1 <= week <= 52`.
///
/// Week 53 is never represented; seasons are forced to exactly 52 weeks
/// per the surrounding calendar convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epiweek {
    pub year: i32,
    pub week: u32,
}

impl Epiweek {
    pub fn new(year: i32, week: u32) -> Result<Self> {
        if !(1..=52).contains(&week) {
            return Err(ForecastError::invalid_input(
                "",
                COMPONENT,
                format!("week {week} outside valid range [1, 52]"),
            ));
        }
        Ok(Epiweek { year, week })
    }

    /// Returns the Sunday that opens the ISO week `(year, week)`, i.e. the
    /// Sunday immediately preceding the ISO Monday of that week.
    pub fn to_date(&self) -> Result<NaiveDate> {
        if !(1..=52).contains(&self.week) {
            return Err(ForecastError::invalid_input(
                "",
                COMPONENT,
                format!("week {} outside valid range [1, 52]", self.week),
            ));
        }
        let monday = NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon).ok_or_else(
            || {
                ForecastError::invalid_input(
                    "",
                    COMPONENT,
                    format!("no ISO Monday for epiweek {}{:02}", self.year, self.week),
                )
            },
        )?;
        Ok(monday - Duration::days(1))
    }

    /// Encodes as the 6-digit integer `YYYYWW`.
    pub fn to_yyyyww(&self) -> i64 {
        self.year as i64 * 100 + self.week as i64
    }

    /// Parses a 6-character `YYYYWW` string. Rejects strings of length != 6
    /// or containing non-digit characters; does not itself validate the
    /// week range (callers needing a validated `Epiweek` should follow up
    /// with [`Epiweek::new`]).
    pub fn parse_yyyyww(s: &str) -> Result<(i32, u32)> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ForecastError::invalid_input(
                "",
                COMPONENT,
                format!("'{s}' is not a 6-digit YYYYWW epiweek"),
            ));
        }
        let year: i32 = s[0..4].parse().map_err(|_| {
            ForecastError::invalid_input("", COMPONENT, format!("'{s}' has a non-numeric year"))
        })?;
        let week: u32 = s[4..6].parse().map_err(|_| {
            ForecastError::invalid_input("", COMPONENT, format!("'{s}' has a non-numeric week"))
        })?;
        Ok((year, week))
    }

    /// Enumerates the 52 epiweeks of the season starting EW41 of `start_year`,
    /// wrapping across the year boundary to end at EW40 of `start_year + 1`.
    pub fn season_window(start_year: i32) -> [Epiweek; 52] {
        let mut weeks = [Epiweek {
            year: start_year,
            week: 41,
        }; 52];
        let mut year = start_year;
        let mut week = 41u32;
        for slot in weeks.iter_mut() {
            *slot = Epiweek { year, week };
            week += 1;
            if week > 52 {
                week = 1;
                year += 1;
            }
        }
        weeks
    }
}

/// Number of whole years spanned between a training end-year and one of the
/// three fixed validation origins; see [`crate::types::ValidationWindow`].
pub fn year_of_iso_week_count(year: i32) -> u32 {
    // ISO 8601 defines years with either 52 or 53 weeks; this system forces
    // every season to 52 weeks regardless, but ingest validation uses the
    // true ISO week count to reject a stray week 53 row rather than silently
    // truncating it.
    let dec28 = NaiveDate::from_ymd_opt(year, 12, 28).expect("December 28 always exists");
    dec28.iso_week().week()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_date_rejects_week_53() {
        let ew = Epiweek { year: 2023, week: 53 };
        assert!(ew.to_date().is_err());
    }

    #[test]
    fn calendar_contract_ew41_2023() {
        let ew = Epiweek::new(2023, 41).unwrap();
        assert_eq!(ew.to_date().unwrap(), NaiveDate::from_ymd_opt(2023, 10, 8).unwrap());
    }

    #[test]
    fn season_window_ends_ew40_next_year() {
        let season = Epiweek::season_window(2023);
        assert_eq!(season.len(), 52);
        assert_eq!(season[0], Epiweek { year: 2023, week: 41 });
        assert_eq!(season[51], Epiweek { year: 2024, week: 40 });
        let last_date = season[51].to_date().unwrap();
        assert_eq!(last_date, NaiveDate::from_ymd_opt(2024, 9, 29).unwrap());
    }

    #[test]
    fn season_window_dates_are_consecutive_sundays() {
        let season = Epiweek::season_window(2023);
        let mut prev = season[0].to_date().unwrap();
        assert_eq!(prev.weekday(), Weekday::Sun);
        for ew in &season[1..] {
            let d = ew.to_date().unwrap();
            assert_eq!(d.weekday(), Weekday::Sun);
            assert_eq!(d - prev, Duration::days(7));
            prev = d;
        }
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_digits() {
        assert!(Epiweek::parse_yyyyww("20231").is_err());
        assert!(Epiweek::parse_yyyyww("2023ab").is_err());
        assert!(Epiweek::parse_yyyyww("202341").is_ok());
    }

    #[test]
    fn round_trip_parse_and_format() {
        for (y, w) in [(2019, 1), (2023, 41), (2020, 52)] {
            let ew = Epiweek::new(y, w).unwrap();
            let yyyyww = ew.to_yyyyww();
            let (py, pw) = Epiweek::parse_yyyyww(&yyyyww.to_string()).unwrap();
            assert_eq!((py, pw), (y, w));
        }
    }
}
