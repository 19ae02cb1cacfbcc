//! Date normalization

use chrono::NaiveDate;

const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Normalize a date to `YYYY-MM-DD`.
///
/// Accepts ISO dates and day-first slash dates. Anything else yields `None`
/// so the column is stored as NULL rather than as free text.
pub fn format_date(value: &str) -> Option<String> {
    let value = value.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date_passes_through() {
        assert_eq!(format_date("2024-03-15"), Some("2024-03-15".to_string()));
    }

    #[test]
    fn test_day_first_slash_date() {
        assert_eq!(format_date("15/03/2024"), Some("2024-03-15".to_string()));
        assert_eq!(format_date(" 01/12/2023 "), Some("2023-12-01".to_string()));
    }

    #[test]
    fn test_unrecognized_dates() {
        assert_eq!(format_date(""), None);
        assert_eq!(format_date("March 15, 2024"), None);
        // month-first dates with a day above 12 are not valid day-first dates
        assert_eq!(format_date("03/15/2024"), None);
        assert_eq!(format_date("2024-02-30"), None);
    }
}
