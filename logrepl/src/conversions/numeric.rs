use bigdecimal::{BigDecimal, ParseBigDecimalError};
use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Error returned when a string is not a valid Postgres numeric.
#[derive(Debug, Error)]
#[error("invalid numeric value: {0}")]
pub struct ParseNumericError(#[from] ParseBigDecimalError);

/// A rust variant of the Postgres Numeric type. The full spectrum of Postgres'
/// Numeric value range is supported, including the special values.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum PgNumeric {
    NaN,
    PositiveInf,
    NegativeInf,
    Value(BigDecimal),
}

impl FromStr for PgNumeric {
    type Err = ParseNumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match BigDecimal::from_str(s) {
            Ok(n) => Ok(PgNumeric::Value(n)),
            Err(e) => {
                if s.eq_ignore_ascii_case("infinity") {
                    Ok(PgNumeric::PositiveInf)
                } else if s.eq_ignore_ascii_case("-infinity") {
                    Ok(PgNumeric::NegativeInf)
                } else if s.eq_ignore_ascii_case("nan") {
                    Ok(PgNumeric::NaN)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgNumeric::NaN => write!(f, "NaN"),
            PgNumeric::PositiveInf => write!(f, "Infinity"),
            PgNumeric::NegativeInf => write!(f, "-Infinity"),
            PgNumeric::Value(n) => write!(f, "{n}"),
        }
    }
}

/// Numerics are serialized as strings so no precision is lost in JSON consumers.
impl Serialize for PgNumeric {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl Default for PgNumeric {
    fn default() -> Self {
        PgNumeric::Value(BigDecimal::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_special_values() {
        assert_eq!("NaN".parse::<PgNumeric>().unwrap(), PgNumeric::NaN);
        assert_eq!(
            "Infinity".parse::<PgNumeric>().unwrap(),
            PgNumeric::PositiveInf
        );
        assert_eq!(
            "-Infinity".parse::<PgNumeric>().unwrap(),
            PgNumeric::NegativeInf
        );
    }

    #[test]
    fn parses_and_displays_decimal_values() {
        let value = "12345.6789".parse::<PgNumeric>().unwrap();
        assert_eq!(value.to_string(), "12345.6789");
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#""12345.6789""#
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("twelve".parse::<PgNumeric>().is_err());
    }
}
