use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

/// Which dates a `service_id` runs on, merged from `calendar.txt` and
/// `calendar_dates.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCalendar {
    pub service_id: String,
    /// monday first
    pub weekdays: [bool; 7],
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub added: HashSet<NaiveDate>,
    pub removed: HashSet<NaiveDate>,
}

impl ServiceCalendar {
    /// A service with no weekly pattern; it only runs on added dates.
    pub fn exceptions_only(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            weekdays: [false; 7],
            start_date: None,
            end_date: None,
            added: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    pub fn weekly(
        service_id: impl Into<String>,
        weekdays: [bool; 7],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            weekdays,
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Self::exceptions_only(service_id)
        }
    }

    /// Records a `calendar_dates.txt` row. 1 = added, 2 = removed; other
    /// exception types are ignored.
    pub fn add_exception(&mut self, date: NaiveDate, exception_type: u8) {
        match exception_type {
            1 => {
                self.removed.remove(&date);
                self.added.insert(date);
            }
            2 => {
                self.added.remove(&date);
                self.removed.insert(date);
            }
            _ => {}
        }
    }

    pub fn is_active(&self, date: NaiveDate) -> bool {
        // Exceptions override the weekly pattern.
        if self.added.contains(&date) {
            return true;
        }
        if self.removed.contains(&date) {
            return false;
        }

        let (Some(start), Some(end)) = (self.start_date, self.end_date) else {
            return false;
        };
        if date < start || date > end {
            return false;
        }
        self.weekdays[date.weekday().num_days_from_monday() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekdays_only() -> ServiceCalendar {
        ServiceCalendar::weekly(
            "WD",
            [true, true, true, true, true, false, false],
            date(2026, 1, 1),
            date(2026, 12, 31),
        )
    }

    #[test]
    fn test_weekly_pattern() {
        let cal = weekdays_only();
        // 2026-10-19 is a Monday
        assert!(cal.is_active(date(2026, 10, 19)));
        assert!(cal.is_active(date(2026, 10, 23)));
        assert!(!cal.is_active(date(2026, 10, 24)));
        assert!(!cal.is_active(date(2026, 10, 25)));
    }

    #[test]
    fn test_outside_date_range() {
        let cal = weekdays_only();
        assert!(!cal.is_active(date(2025, 12, 31)));
        assert!(!cal.is_active(date(2027, 1, 4)));
    }

    #[test]
    fn test_exceptions_override_pattern() {
        let mut cal = weekdays_only();
        cal.add_exception(date(2026, 10, 19), 2);
        cal.add_exception(date(2026, 10, 24), 1);

        assert!(!cal.is_active(date(2026, 10, 19)));
        assert!(cal.is_active(date(2026, 10, 24)));
    }

    #[test]
    fn test_exceptions_only_service() {
        let mut cal = ServiceCalendar::exceptions_only("HOLIDAY");
        cal.add_exception(date(2026, 12, 25), 1);

        assert!(cal.is_active(date(2026, 12, 25)));
        assert!(!cal.is_active(date(2026, 12, 26)));
    }

    #[test]
    fn test_unknown_exception_type_is_ignored() {
        let mut cal = weekdays_only();
        cal.add_exception(date(2026, 10, 19), 7);
        assert!(cal.is_active(date(2026, 10, 19)));
    }
}
