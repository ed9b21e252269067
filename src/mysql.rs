//! MySQL source access.
//!
//! Pool construction plus the conversions from `mysql_async::Value` into the
//! chrono/decimal/string types the extractors need. Conversion works directly
//! on the wire values rather than driver feature flags, so DATETIME columns
//! are interpreted as UTC in exactly one place.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mysql_async::{Pool, Row, Value};
use rust_decimal::Decimal;

/// Create a new MySQL connection pool
pub fn new_mysql_pool(connection_string: &str) -> Result<Pool> {
    let pool = Pool::from_url(connection_string)?;
    Ok(pool)
}

/// A source column that could not be read as the expected type. Carries the
/// column name so poison rows can be logged against their primary key.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("missing column `{0}`")]
    MissingColumn(&'static str),
    #[error("column `{column}` has unexpected value {value:?}")]
    Unexpected { column: &'static str, value: Value },
}

fn raw(row: &Row, column: &'static str) -> Result<Value, ValueError> {
    row.get::<Value, &str>(column)
        .ok_or(ValueError::MissingColumn(column))
}

fn unexpected(column: &'static str, value: Value) -> ValueError {
    ValueError::Unexpected { column, value }
}

pub fn i64_from(column: &'static str, value: Value) -> Result<i64, ValueError> {
    match value {
        Value::Int(i) => Ok(i),
        Value::UInt(u) => Ok(u as i64),
        Value::Bytes(b) => String::from_utf8_lossy(&b)
            .parse()
            .map_err(|_| unexpected(column, Value::Bytes(b))),
        value => Err(unexpected(column, value)),
    }
}

pub fn bool_from(column: &'static str, value: Value) -> Result<bool, ValueError> {
    match value {
        Value::Int(i) => Ok(i != 0),
        Value::UInt(u) => Ok(u != 0),
        Value::Bytes(b) => Ok(matches!(b.as_slice(), b"1" | b"true" | b"TRUE")),
        value => Err(unexpected(column, value)),
    }
}

/// Strings are read leniently: numeric columns render to their decimal form.
pub fn opt_string_from(column: &'static str, value: Value) -> Result<Option<String>, ValueError> {
    match value {
        Value::NULL => Ok(None),
        Value::Bytes(b) => Ok(Some(String::from_utf8_lossy(&b).into_owned())),
        Value::Int(i) => Ok(Some(i.to_string())),
        Value::UInt(u) => Ok(Some(u.to_string())),
        Value::Float(f) => Ok(Some(f.to_string())),
        Value::Double(d) => Ok(Some(d.to_string())),
        value => Err(unexpected(column, value)),
    }
}

pub fn decimal_from(column: &'static str, value: Value) -> Result<Decimal, ValueError> {
    match value {
        Value::Bytes(b) => String::from_utf8_lossy(&b)
            .parse()
            .map_err(|_| unexpected(column, Value::Bytes(b))),
        Value::Int(i) => Ok(Decimal::from(i)),
        Value::UInt(u) => Ok(Decimal::from(u)),
        Value::Double(d) => Decimal::try_from(d).map_err(|_| unexpected(column, Value::Double(d))),
        Value::Float(f) => {
            Decimal::try_from(f as f64).map_err(|_| unexpected(column, Value::Float(f)))
        }
        value => Err(unexpected(column, value)),
    }
}

pub fn f64_from(column: &'static str, value: Value) -> Result<f64, ValueError> {
    match value {
        Value::Double(d) => Ok(d),
        Value::Float(f) => Ok(f as f64),
        Value::Int(i) => Ok(i as f64),
        Value::UInt(u) => Ok(u as f64),
        Value::Bytes(b) => String::from_utf8_lossy(&b)
            .parse()
            .map_err(|_| unexpected(column, Value::Bytes(b))),
        value => Err(unexpected(column, value)),
    }
}

/// DATETIME columns carry no zone on the wire; they are stored and read as UTC.
pub fn opt_datetime_from(
    column: &'static str,
    value: Value,
) -> Result<Option<DateTime<Utc>>, ValueError> {
    match value {
        Value::NULL => Ok(None),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| {
                    d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
                })
                .ok_or_else(|| {
                    unexpected(
                        column,
                        Value::Date(year, month, day, hour, minute, second, micros),
                    )
                })?;
            Ok(Some(Utc.from_utc_datetime(&naive)))
        }
        Value::Bytes(b) => {
            let text = String::from_utf8_lossy(&b);
            let naive = chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| {
                    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                        .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
                })
                .map_err(|_| unexpected(column, Value::Bytes(b.clone())))?;
            Ok(Some(Utc.from_utc_datetime(&naive)))
        }
        value => Err(unexpected(column, value)),
    }
}

// Row-level wrappers used by the extractors.

pub fn get_i64(row: &Row, column: &'static str) -> Result<i64, ValueError> {
    i64_from(column, raw(row, column)?)
}

pub fn get_opt_i64(row: &Row, column: &'static str) -> Result<Option<i64>, ValueError> {
    match raw(row, column)? {
        Value::NULL => Ok(None),
        value => i64_from(column, value).map(Some),
    }
}

pub fn get_bool(row: &Row, column: &'static str) -> Result<bool, ValueError> {
    bool_from(column, raw(row, column)?)
}

/// NULL becomes the empty string; use [`get_opt_string`] where a null is
/// semantically meaningful.
pub fn get_string(row: &Row, column: &'static str) -> Result<String, ValueError> {
    Ok(get_opt_string(row, column)?.unwrap_or_default())
}

pub fn get_opt_string(row: &Row, column: &'static str) -> Result<Option<String>, ValueError> {
    opt_string_from(column, raw(row, column)?)
}

pub fn get_decimal(row: &Row, column: &'static str) -> Result<Decimal, ValueError> {
    decimal_from(column, raw(row, column)?)
}

pub fn get_opt_decimal(row: &Row, column: &'static str) -> Result<Option<Decimal>, ValueError> {
    match raw(row, column)? {
        Value::NULL => Ok(None),
        value => decimal_from(column, value).map(Some),
    }
}

pub fn get_f64(row: &Row, column: &'static str) -> Result<f64, ValueError> {
    f64_from(column, raw(row, column)?)
}

pub fn get_datetime(row: &Row, column: &'static str) -> Result<DateTime<Utc>, ValueError> {
    get_opt_datetime(row, column)?.ok_or_else(|| unexpected(column, Value::NULL))
}

pub fn get_opt_datetime(
    row: &Row,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, ValueError> {
    opt_datetime_from(column, raw(row, column)?)
}

/// Render a UTC timestamp the way MySQL expects DATETIME literals in
/// parameter position.
pub fn to_sql_datetime(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_from_wire_and_text() {
        let a = opt_datetime_from("A", Value::Date(2024, 6, 1, 12, 30, 0, 0))
            .unwrap()
            .unwrap();
        let b = opt_datetime_from("B", Value::Bytes(b"2024-06-01 12:30:00".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(to_sql_datetime(a), "2024-06-01 12:30:00.000000");
    }

    #[test]
    fn date_only_text_is_midnight() {
        let d = opt_datetime_from("D", Value::Bytes(b"2024-06-01".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(d.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }

    #[test]
    fn decimal_parses_exactly() {
        let d = decimal_from("Price", Value::Bytes(b"19.99".to_vec())).unwrap();
        assert_eq!(d.to_string(), "19.99");
        assert_eq!(decimal_from("Qty", Value::Int(3)).unwrap(), Decimal::from(3));
    }

    #[test]
    fn lenient_strings_and_nulls() {
        assert_eq!(
            opt_string_from("S", Value::Bytes(b"abc".to_vec())).unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(opt_string_from("N", Value::NULL).unwrap(), None);
        assert_eq!(
            opt_string_from("I", Value::Int(7)).unwrap(),
            Some("7".to_string())
        );
    }

    #[test]
    fn bool_from_tinyint() {
        assert!(bool_from("B", Value::Int(1)).unwrap());
        assert!(!bool_from("B", Value::Int(0)).unwrap());
        assert!(bool_from("B", Value::Bytes(b"1".to_vec())).unwrap());
    }

    #[test]
    fn type_errors_carry_the_column_name() {
        let err = i64_from("TotalAmount", Value::Date(2024, 1, 1, 0, 0, 0, 0)).unwrap_err();
        assert!(err.to_string().contains("`TotalAmount`"));
    }
}
