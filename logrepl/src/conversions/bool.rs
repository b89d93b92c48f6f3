use crate::bail;
use crate::error::{CdcResult, ErrorKind};

/// Parses a Postgres boolean in its text output form (`t` or `f`).
pub fn parse_bool(s: &str) -> CdcResult<bool> {
    if s == "t" {
        Ok(true)
    } else if s == "f" {
        Ok(false)
    } else {
        bail!(
            ErrorKind::InvalidData,
            "Invalid boolean value",
            format!("Boolean value must be 't' or 'f' (received: {s})")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_postgres_output() {
        assert!(parse_bool("t").unwrap());
        assert!(!parse_bool("f").unwrap());
    }

    #[test]
    fn parse_bool_rejects_other_spellings() {
        let err = parse_bool("true").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("received: true"));
    }
}
