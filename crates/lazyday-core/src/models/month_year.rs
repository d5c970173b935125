use chrono::{Datelike, NaiveDate};
use serde::Serialize;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A calendar month as the calendar grid needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthYear {
    pub year: i32,
    /// 1-based month number
    pub month: u32,
    pub month_name: &'static str,
    /// Day of week of the 1st, 0 = Sunday
    pub first_dow: u32,
    /// Number of days in the month
    pub last_date: u32,
    /// First day of the month
    pub start_date: NaiveDate,
}

impl MonthYear {
    /// Details for the month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self::from_year_month(date.year(), date.month())
    }

    fn from_year_month(year: i32, month: u32) -> Self {
        let start_date = first_of_month(year, month);
        let next_start = if month == 12 {
            first_of_month(year + 1, 1)
        } else {
            first_of_month(year, month + 1)
        };
        let last_date = next_start.signed_duration_since(start_date).num_days() as u32;

        Self {
            year,
            month,
            month_name: MONTH_NAMES[(month - 1) as usize],
            first_dow: start_date.weekday().num_days_from_sunday(),
            last_date,
            start_date,
        }
    }

    /// The month `increment` months away from this one.
    pub fn offset(&self, increment: i32) -> Self {
        let zero_based = self.year * 12 + (self.month as i32 - 1) + increment;
        let year = zero_based.div_euclid(12);
        let month = zero_based.rem_euclid(12) as u32 + 1;
        Self::from_year_month(year, month)
    }

    pub fn next(&self) -> Self {
        self.offset(1)
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Day 1 exists in every month of every year chrono supports
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

impl std::fmt::Display for MonthYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.month_name, self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_details() {
        let my = MonthYear::containing(date(2024, 3, 17));
        assert_eq!(my.year, 2024);
        assert_eq!(my.month, 3);
        assert_eq!(my.month_name, "March");
        assert_eq!(my.last_date, 31);
        // 2024-03-01 was a Friday
        assert_eq!(my.first_dow, 5);
        assert_eq!(my.start_date, date(2024, 3, 1));
        assert_eq!(my.to_string(), "March 2024");
    }

    #[test]
    fn test_leap_february() {
        assert_eq!(MonthYear::containing(date(2024, 2, 10)).last_date, 29);
        assert_eq!(MonthYear::containing(date(2023, 2, 10)).last_date, 28);
    }

    #[test]
    fn test_offset_across_year_boundaries() {
        let dec = MonthYear::containing(date(2024, 12, 5));
        let jan = dec.next();
        assert_eq!((jan.year, jan.month), (2025, 1));
        assert_eq!(jan.offset(-1), dec);

        let back = MonthYear::containing(date(2024, 1, 1)).offset(-13);
        assert_eq!((back.year, back.month), (2022, 12));
    }
}
