//! Request parameter validators and small helpers shared by handlers.
//!
//! Validators report problems as a flag plus human readable messages instead
//! of failing, so a handler can return every problem at once.

use chrono::{Datelike, Local, NaiveDate, Utc};
use sha2::{Digest, Sha256};

pub const MSG_YEAR_AND_MONTH_REQUIRED: &str = "The year and month are required!";
pub const MSG_INVALID_YEAR: &str = "The year is not valid";
pub const MSG_INVALID_MONTH: &str = "The month is not valid";

/// Result of a filter validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterValidation {
    pub is_valid: bool,
    pub messages: Vec<String>,
}

impl FilterValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            messages: Vec::new(),
        }
    }

    fn reject(&mut self, message: &str) {
        self.is_valid = false;
        self.messages.push(message.to_string());
    }
}

/// Validate optional `year` and `month` query filters.
///
/// The year must be all digits and not after the current year; the month must
/// be all digits between 1 and 12. Empty strings count as absent. With
/// `optional == false` both values are required.
pub fn check_month_and_year_filter_parameters(
    year: Option<&str>,
    month: Option<&str>,
    optional: bool,
) -> FilterValidation {
    let year = year.filter(|y| !y.is_empty());
    let month = month.filter(|m| !m.is_empty());
    let mut result = FilterValidation::valid();

    if !optional && (year.is_none() || month.is_none()) {
        result.reject(MSG_YEAR_AND_MONTH_REQUIRED);
    }

    if let Some(year) = year {
        let current_year = Local::now().year();
        let valid = is_digits(year)
            && year
                .parse::<i32>()
                .map(|y| y <= current_year)
                .unwrap_or(false);
        if !valid {
            result.reject(MSG_INVALID_YEAR);
        }
    }

    if let Some(month) = month {
        if !is_a_valid_month(month) {
            result.reject(MSG_INVALID_MONTH);
        }
    }

    result
}

/// True if `month` is all digits and between 1 and 12.
pub fn is_a_valid_month(month: &str) -> bool {
    is_digits(month)
        && month
            .parse::<u32>()
            .map(|m| (1..=12).contains(&m))
            .unwrap_or(false)
}

/// True if both dates parse as `%Y-%m-%d`, `start <= end` and `end` is not
/// in the future.
pub fn references_are_valid(start_reference: &str, end_reference: &str) -> bool {
    let parse = |value: &str| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();

    match (parse(start_reference), parse(end_reference)) {
        (Some(start), Some(end)) => start <= end && end <= Local::now().date_naive(),
        _ => false,
    }
}

/// Number of days in `month` of `year`, or `None` for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };

    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Hex SHA-256 of `value`. `None` for an empty input.
///
/// With `random`, the current time and a random nonce are appended before
/// hashing, so equal inputs give different digests.
pub fn string_to_hash256(value: &str, random: bool) -> Option<String> {
    if value.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    if random {
        let now = Utc::now();
        hasher.update(format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros()));
        hasher.update(rand::random::<u64>().to_be_bytes());
    }

    Some(hex::encode(hasher.finalize()))
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_year() -> i32 {
        Local::now().year()
    }

    #[test]
    fn every_past_year_and_month_is_valid() {
        for year in [2000, 2023, current_year()] {
            for month in 1..=12 {
                let result = check_month_and_year_filter_parameters(
                    Some(&year.to_string()),
                    Some(&month.to_string()),
                    false,
                );
                assert_eq!(result, FilterValidation::valid(), "{}-{}", year, month);
            }
        }
    }

    #[test]
    fn next_year_is_rejected() {
        let next = (current_year() + 1).to_string();
        let result = check_month_and_year_filter_parameters(Some(&next), Some("1"), true);

        assert!(!result.is_valid);
        assert_eq!(result.messages, vec![MSG_INVALID_YEAR]);
    }

    #[test]
    fn out_of_range_or_textual_months_are_rejected() {
        for month in ["13", "0", "abc", "-1", "1.5"] {
            let result = check_month_and_year_filter_parameters(Some("2024"), Some(month), true);
            assert!(!result.is_valid, "{}", month);
            assert_eq!(result.messages, vec![MSG_INVALID_MONTH]);
        }
    }

    #[test]
    fn missing_values_only_fail_when_required() {
        assert!(check_month_and_year_filter_parameters(None, None, true).is_valid);
        assert!(check_month_and_year_filter_parameters(Some(""), None, true).is_valid);

        let result = check_month_and_year_filter_parameters(Some("2024"), None, false);
        assert!(!result.is_valid);
        assert_eq!(result.messages, vec![MSG_YEAR_AND_MONTH_REQUIRED]);
    }

    #[test]
    fn all_problems_are_reported() {
        let result = check_month_and_year_filter_parameters(Some("20x4"), Some("13"), false);
        assert_eq!(result.messages, vec![MSG_INVALID_YEAR, MSG_INVALID_MONTH]);
    }

    #[test]
    fn reference_ranges() {
        assert!(references_are_valid("2024-01-01", "2024-02-01"));
        assert!(references_are_valid("2024-01-01", "2024-01-01"));
        assert!(!references_are_valid("2024-02-01", "2024-01-01"));
        assert!(!references_are_valid("2099-01-01", "2099-02-01"));
        assert!(!references_are_valid("2024-13-01", "2024-12-01"));
        assert!(!references_are_valid("01/01/2024", "2024-02-01"));
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 4), Some(30));
        assert_eq!(days_in_month(2024, 13), None);
    }

    #[test]
    fn hashes_are_hex_sha256() {
        assert_eq!(
            string_to_hash256("abc", false).as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(string_to_hash256("", false), None);
    }

    #[test]
    fn random_hashes_differ() {
        let first = string_to_hash256("report.pdf", true).unwrap();
        let second = string_to_hash256("report.pdf", true).unwrap();
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
    }
}
