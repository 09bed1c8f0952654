//! Current-versus-original comparison for dirty checking.

use bson::Bson;

use crate::dates::as_date_time;
use crate::definition::FieldKind;

/// Whether a current value is equivalent to the original one.
///
/// A missing value and `null` are the same. Date fields compare as canonical
/// timestamps, numeric fields after numeric coercion. Plain fields compare
/// numbers across BSON number types but never a string with a number.
pub fn original_is_equivalent(
    kind: FieldKind,
    current: Option<&Bson>,
    original: Option<&Bson>,
    date_format: &str,
) -> bool {
    let current = current.unwrap_or(&Bson::Null);
    let original = original.unwrap_or(&Bson::Null);

    if current == original {
        return true;
    }
    if matches!(current, Bson::Null) || matches!(original, Bson::Null) {
        return false;
    }

    match kind {
        FieldKind::Date => match (
            as_date_time(current, date_format),
            as_date_time(original, date_format),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        FieldKind::Numeric => numbers_equal(coerce_numeric(current), coerce_numeric(original)),
        FieldKind::Plain => numbers_equal(as_number(current), as_number(original)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(i) => Some(Number::Int(i64::from(*i))),
        Bson::Int64(i) => Some(Number::Int(*i)),
        Bson::Double(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

fn coerce_numeric(value: &Bson) -> Option<Number> {
    match value {
        Bson::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Number::Int)
                .or_else(|_| s.parse::<f64>().map(Number::Float))
                .ok()
        }
        other => as_number(other),
    }
}

fn numbers_equal(a: Option<Number>, b: Option<Number>) -> bool {
    match (a, b) {
        (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
        (Some(x), Some(y)) => {
            let (x, y) = (to_f64(x), to_f64(y));
            x.is_finite() && y.is_finite() && (x - y).abs() < f64::EPSILON * 4.0
        }
        _ => false,
    }
}

fn to_f64(n: Number) -> f64 {
    match n {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DEFAULT_DATE_FORMAT;
    use chrono::{TimeZone, Utc};

    fn eq(kind: FieldKind, a: Bson, b: Bson) -> bool {
        original_is_equivalent(kind, Some(&a), Some(&b), DEFAULT_DATE_FORMAT)
    }

    #[test]
    fn test_identical_values() {
        assert!(eq(FieldKind::Plain, Bson::String("x".into()), Bson::String("x".into())));
        assert!(original_is_equivalent(FieldKind::Plain, None, None, DEFAULT_DATE_FORMAT));
        assert!(original_is_equivalent(
            FieldKind::Plain,
            Some(&Bson::Null),
            None,
            DEFAULT_DATE_FORMAT
        ));
    }

    #[test]
    fn test_date_string_equals_native_timestamp() {
        let native = Bson::DateTime(bson::DateTime::from_chrono(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        assert!(eq(FieldKind::Date, Bson::String("2024-01-01 00:00:00".into()), native.clone()));
        assert!(!eq(FieldKind::Date, Bson::String("2024-01-01 00:00:01".into()), native));
    }

    #[test]
    fn test_unparseable_date_is_dirty() {
        assert!(!eq(
            FieldKind::Date,
            Bson::String("garbage".into()),
            Bson::String("2024-01-01 00:00:00".into())
        ));
    }

    #[test]
    fn test_numeric_field_coerces_strings() {
        assert!(eq(FieldKind::Numeric, Bson::String("5".into()), Bson::Int32(5)));
        assert!(eq(FieldKind::Numeric, Bson::String("5.0".into()), Bson::Int64(5)));
        assert!(!eq(FieldKind::Numeric, Bson::String("five".into()), Bson::Int32(5)));
    }

    #[test]
    fn test_plain_field_keeps_strings_apart() {
        assert!(!eq(FieldKind::Plain, Bson::String("5".into()), Bson::Int32(5)));
        assert!(eq(FieldKind::Plain, Bson::Int32(5), Bson::Int64(5)));
        assert!(eq(FieldKind::Plain, Bson::Double(5.0), Bson::Int32(5)));
    }

    #[test]
    fn test_null_against_value_is_dirty() {
        assert!(!eq(FieldKind::Numeric, Bson::Null, Bson::Int32(0)));
        assert!(!original_is_equivalent(
            FieldKind::Plain,
            Some(&Bson::Int32(1)),
            None,
            DEFAULT_DATE_FORMAT
        ));
    }
}
