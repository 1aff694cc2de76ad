//! Polars `AnyValue` helpers for the tabular boundary.
//!
//! Date columns are accepted as ISO `YYYY-MM-DD` strings or as numeric day
//! numbers (days since 1970-01-01); both are read into `i64` day numbers.

use chrono::NaiveDate;
use polars::prelude::{AnyValue, DataFrame};
use tve_model::episode::date_to_day;

pub fn any_to_string(value: AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(value) => value.to_string(),
        AnyValue::StringOwned(value) => value.to_string(),
        AnyValue::Float64(value) => format_numeric(value),
        AnyValue::Float32(value) => format_numeric(f64::from(value)),
        value => value.to_string(),
    }
}

pub fn format_numeric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub fn any_to_f64(value: AnyValue) -> Option<f64> {
    match value {
        AnyValue::Null => None,
        AnyValue::Float32(value) => Some(f64::from(value)),
        AnyValue::Float64(value) => Some(value),
        AnyValue::Int8(value) => Some(f64::from(value)),
        AnyValue::Int16(value) => Some(f64::from(value)),
        AnyValue::Int32(value) => Some(f64::from(value)),
        AnyValue::Int64(value) => Some(value as f64),
        AnyValue::UInt8(value) => Some(f64::from(value)),
        AnyValue::UInt16(value) => Some(f64::from(value)),
        AnyValue::UInt32(value) => Some(f64::from(value)),
        AnyValue::UInt64(value) => Some(value as f64),
        AnyValue::String(value) => parse_f64(value),
        AnyValue::StringOwned(value) => parse_f64(&value),
        _ => None,
    }
}

/// Read a cell as a day number.
///
/// Accepts integer and float columns (interpreted as day numbers) and string
/// columns holding either ISO dates or numeric text. Returns `None` for null
/// or unparseable values.
pub fn any_to_day(value: AnyValue) -> Option<i64> {
    match value {
        AnyValue::Null => None,
        AnyValue::Int8(value) => Some(i64::from(value)),
        AnyValue::Int16(value) => Some(i64::from(value)),
        AnyValue::Int32(value) => Some(i64::from(value)),
        AnyValue::Int64(value) => Some(value),
        AnyValue::UInt8(value) => Some(i64::from(value)),
        AnyValue::UInt16(value) => Some(i64::from(value)),
        AnyValue::UInt32(value) => Some(i64::from(value)),
        AnyValue::UInt64(value) => i64::try_from(value).ok(),
        AnyValue::Float32(value) => Some(value as i64),
        AnyValue::Float64(value) => Some(value as i64),
        AnyValue::String(value) => parse_day(value),
        AnyValue::StringOwned(value) => parse_day(&value),
        _ => None,
    }
}

/// Parse a string cell as a day number: ISO date first, numeric fallback.
pub fn parse_day(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date_to_day(date));
    }
    trimmed.parse::<i64>().ok()
}

pub fn parse_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Cell accessor returning `AnyValue::Null` for any out-of-range access.
pub fn cell(df: &DataFrame, name: &str, idx: usize) -> AnyValue<'static> {
    match df.column(name) {
        Ok(series) => series.get(idx).map(|v| v.into_static()).unwrap_or(AnyValue::Null),
        Err(_) => AnyValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_day_accepts_iso_dates() {
        assert_eq!(parse_day("1970-01-01"), Some(0));
        assert_eq!(parse_day("1970-01-11"), Some(10));
        assert_eq!(parse_day(" 2024-01-15 "), Some(19737));
    }

    #[test]
    fn parse_day_accepts_numeric_text() {
        assert_eq!(parse_day("120"), Some(120));
        assert_eq!(parse_day("-30"), Some(-30));
        assert_eq!(parse_day(""), None);
        assert_eq!(parse_day("not a date"), None);
    }

    #[test]
    fn any_to_day_handles_numeric_types() {
        assert_eq!(any_to_day(AnyValue::Int32(365)), Some(365));
        assert_eq!(any_to_day(AnyValue::Float64(12.0)), Some(12));
        assert_eq!(any_to_day(AnyValue::Null), None);
    }

    #[test]
    fn any_to_f64_parses_strings() {
        assert_eq!(any_to_f64(AnyValue::String("2.5")), Some(2.5));
        assert_eq!(any_to_f64(AnyValue::String("")), None);
        assert_eq!(any_to_f64(AnyValue::Int64(3)), Some(3.0));
    }

    #[test]
    fn format_numeric_trims_integral_floats() {
        assert_eq!(format_numeric(1.0), "1");
        assert_eq!(format_numeric(1.5), "1.5");
    }
}
