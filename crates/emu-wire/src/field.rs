//! Field codec: coerce raw field text into typed scalars.
//!
//! Every function distinguishes a field that is *missing* (`Ok(None)`) from a
//! field whose text does not fit the expected type (`Err`). Only the latter is
//! a decode failure.

use thiserror::Error;

use crate::consts::UNIX_TIME_OFFSET;
use crate::fragment::FieldMap;

/// A field value could not be coerced to its declared primitive type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field {field}: '{value}' is not a hex integer")]
    InvalidHex { field: String, value: String },
    #[error("field {field}: '{value}' overflows a 64-bit value")]
    Overflow { field: String, value: String },
}

/// Parse `0x`-prefixed (or bare) base-16 text.
pub fn parse_hex_text(field: &str, text: &str) -> Result<u64, FieldError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FieldError::InvalidHex {
            field: field.to_string(),
            value: text.to_string(),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|_| FieldError::Overflow {
        field: field.to_string(),
        value: text.to_string(),
    })
}

/// Read `key` as a hex integer; `None` when the field is missing.
pub fn parse_hex_integer(fields: &FieldMap, key: &str) -> Result<Option<u64>, FieldError> {
    fields
        .get(key)
        .map(|text| parse_hex_text(key, text))
        .transpose()
}

/// Read `key` as a device flag: `Y` is true, `N` is false, anything else is absent.
pub fn parse_bool(fields: &FieldMap, key: &str) -> Option<bool> {
    match fields.get(key)? {
        "Y" => Some(true),
        "N" => Some(false),
        _ => None,
    }
}

/// Read `key` as a device timestamp (seconds since 2000-01-01 UTC) and shift
/// it onto the Unix epoch.
pub fn parse_timestamp(fields: &FieldMap, key: &str) -> Result<Option<u64>, FieldError> {
    let Some(raw) = parse_hex_integer(fields, key)? else {
        return Ok(None);
    };
    raw.checked_add(UNIX_TIME_OFFSET)
        .map(Some)
        .ok_or_else(|| FieldError::Overflow {
            field: key.to_string(),
            value: fields.get(key).unwrap_or_default().to_string(),
        })
}

/// Read `key` as plain text.
pub fn parse_text(fields: &FieldMap, key: &str) -> Option<String> {
    fields.get(key).map(str::to_string)
}

/// Combine a scaled reading with its multiplier and divisor.
///
/// Returns `None` ("unavailable") when any of the three fields is missing,
/// `0.0` when the reading is zero or the divisor is zero, and otherwise
/// `multiplier * value / divisor` as a floating-point quotient.
pub fn parse_amount(
    fields: &FieldMap,
    value_key: &str,
    multiplier_key: &str,
    divisor_key: &str,
) -> Result<Option<f64>, FieldError> {
    let value = parse_hex_integer(fields, value_key)?;
    let multiplier = parse_hex_integer(fields, multiplier_key)?;
    let divisor = parse_hex_integer(fields, divisor_key)?;
    let (Some(value), Some(multiplier), Some(divisor)) = (value, multiplier, divisor) else {
        return Ok(None);
    };
    if value == 0 || divisor == 0 {
        return Ok(Some(0.0));
    }
    Ok(Some(multiplier as f64 * value as f64 / divisor as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn hex_accepts_prefixed_and_bare_digits() {
        assert_eq!(parse_hex_text("F", "0x003c").unwrap(), 60);
        assert_eq!(parse_hex_text("F", "0X3C").unwrap(), 60);
        assert_eq!(parse_hex_text("F", "ff").unwrap(), 255);
        assert_eq!(
            parse_hex_text("F", "0xd8d5b90000001234").unwrap(),
            0xd8d5_b900_0000_1234
        );
    }

    #[test]
    fn hex_rejects_garbage() {
        for bad in ["0x", "", "0xZZ", "12.5", "-0x1"] {
            let err = parse_hex_text("Demand", bad).unwrap_err();
            assert!(matches!(err, FieldError::InvalidHex { ref field, .. } if field == "Demand"));
        }
        let err = parse_hex_text("Demand", "0x1ffffffffffffffff").unwrap_err();
        assert!(matches!(err, FieldError::Overflow { .. }));
    }

    #[test]
    fn missing_hex_field_is_absent() {
        assert_eq!(parse_hex_integer(&map(&[]), "Tier").unwrap(), None);
    }

    #[test]
    fn bool_recognises_only_y_and_n() {
        let fields = map(&[("A", "Y"), ("B", "N"), ("C", "yes")]);
        assert_eq!(parse_bool(&fields, "A"), Some(true));
        assert_eq!(parse_bool(&fields, "B"), Some(false));
        assert_eq!(parse_bool(&fields, "C"), None);
        assert_eq!(parse_bool(&fields, "D"), None);
    }

    #[test]
    fn timestamp_shifts_device_epoch() {
        let fields = map(&[("TimeStamp", "0x00000000"), ("UTCTime", "0x1c6f1b2a")]);
        assert_eq!(parse_timestamp(&fields, "TimeStamp").unwrap(), Some(946_684_800));
        assert_eq!(
            parse_timestamp(&fields, "UTCTime").unwrap(),
            Some(0x1c6f_1b2a + 946_684_800)
        );
        assert_eq!(parse_timestamp(&fields, "LocalTime").unwrap(), None);
    }

    #[test]
    fn amount_scales_by_multiplier_and_divisor() {
        let fields = map(&[
            ("Demand", "0x00001000"),
            ("Multiplier", "0x00000001"),
            ("Divisor", "0x000003e8"),
        ]);
        let demand = parse_amount(&fields, "Demand", "Multiplier", "Divisor")
            .unwrap()
            .unwrap();
        assert!((demand - 4.096).abs() < 1e-12);
    }

    #[test]
    fn amount_zero_divisor_is_zero() {
        let fields = map(&[
            ("Demand", "0x00001000"),
            ("Multiplier", "0x00000001"),
            ("Divisor", "0x00000000"),
        ]);
        assert_eq!(
            parse_amount(&fields, "Demand", "Multiplier", "Divisor").unwrap(),
            Some(0.0)
        );
    }

    #[test]
    fn amount_zero_value_is_zero() {
        let fields = map(&[
            ("Demand", "0x00000000"),
            ("Multiplier", "0x00000002"),
            ("Divisor", "0x000003e8"),
        ]);
        assert_eq!(
            parse_amount(&fields, "Demand", "Multiplier", "Divisor").unwrap(),
            Some(0.0)
        );
    }

    #[test]
    fn amount_missing_input_is_unavailable() {
        let fields = map(&[("Demand", "0x00001000"), ("Divisor", "0x000003e8")]);
        assert_eq!(
            parse_amount(&fields, "Demand", "Multiplier", "Divisor").unwrap(),
            None
        );
    }

    #[test]
    fn amount_propagates_coercion_failure() {
        let fields = map(&[
            ("Demand", "lots"),
            ("Multiplier", "0x1"),
            ("Divisor", "0x1"),
        ]);
        assert!(parse_amount(&fields, "Demand", "Multiplier", "Divisor").is_err());
    }
}
