use crate::bail;
use crate::error::{CdcResult, ErrorKind};

/// Converts a Postgres bytea hex string to a byte array.
///
/// Postgres's hex-encoded bytea format uses the `\x` prefix followed by pairs of hexadecimal
/// digits, each pair representing one byte.
pub fn parse_bytea_hex(bytea_hex_string: &str) -> CdcResult<Vec<u8>> {
    let Some(digits) = bytea_hex_string.strip_prefix("\\x") else {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The prefix '\\x' is missing"
        );
    };

    if digits.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The number of digits is odd"
        );
    }

    let mut result = Vec::with_capacity(digits.len() / 2);
    for i in (0..digits.len()).step_by(2) {
        let Some(pair) = digits.get(i..i + 2) else {
            bail!(
                ErrorKind::ConversionError,
                "Could not convert from bytea hex string to byte array",
                "The string contains non ascii characters"
            );
        };
        result.push(u8::from_str_radix(pair, 16)?);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bytea_hex_empty() {
        let result = parse_bytea_hex("\\x").unwrap();
        assert_eq!(result, Vec::<u8>::new());
    }

    #[test]
    fn parse_bytea_hex_multiple_bytes() {
        let result = parse_bytea_hex("\\x48656c6c6f").unwrap();
        assert_eq!(result, b"Hello");
    }

    #[test]
    fn parse_bytea_hex_mixed_case() {
        let result = parse_bytea_hex("\\xaBcD").unwrap();
        assert_eq!(result, vec![0xab, 0xcd]);
    }

    #[test]
    fn parse_bytea_hex_missing_prefix() {
        let err = parse_bytea_hex("41").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert!(err.to_string().contains("prefix '\\x' is missing"));
    }

    #[test]
    fn parse_bytea_hex_odd_length() {
        let err = parse_bytea_hex("\\x41424").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert!(err.to_string().contains("number of digits is odd"));
    }

    #[test]
    fn parse_bytea_hex_invalid_digits() {
        let err = parse_bytea_hex("\\x4g").unwrap_err();
        assert!(err.to_string().contains("invalid digit"));
        assert!(parse_bytea_hex("\\x4🤔").is_err());
        assert!(parse_bytea_hex("\\x4 1").is_err());
    }
}
