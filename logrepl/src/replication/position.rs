//! Resumable stream positions.
//!
//! A position records the kind of phase that produced it and the last handled LSN, and is
//! handed out as an opaque [`PositionToken`]. Only CDC positions are produced and accepted here.

use postgres::types::parse_lsn;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_postgres::types::PgLsn;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};

/// Phase that produced a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    Initial,
    Snapshot,
    Cdc,
}

/// Decoded form of a [`PositionToken`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "type")]
    pub kind: PositionKind,
    /// LSN in its Postgres textual form, e.g. `16/B374D848`.
    pub last_lsn: String,
}

/// Opaque, serializable cursor to resume streaming from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionToken(String);

impl PositionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes `last_lsn` as a CDC position token.
pub fn encode_cdc_position(last_lsn: PgLsn) -> CdcResult<PositionToken> {
    let position = Position {
        kind: PositionKind::Cdc,
        last_lsn: last_lsn.to_string(),
    };

    Ok(PositionToken(serde_json::to_string(&position)?))
}

/// Decodes a token produced by [`encode_cdc_position`].
///
/// Tokens of other kinds are rejected instead of being read as a CDC position.
pub fn decode_cdc_position(token: &PositionToken) -> CdcResult<PgLsn> {
    let position: Position = serde_json::from_str(token.as_str()).map_err(|err| {
        crate::cdc_error!(
            ErrorKind::InvalidPosition,
            "Position token is malformed",
            err.to_string(),
            source: err
        )
    })?;

    if position.kind != PositionKind::Cdc {
        bail!(
            ErrorKind::InvalidPosition,
            "Position token is not a CDC position",
            format!("unexpected position kind {:?}", position.kind)
        );
    }

    if position.last_lsn.is_empty() {
        bail!(
            ErrorKind::InvalidPosition,
            "Position token has no LSN",
            token.as_str()
        );
    }

    Ok(parse_lsn(&position.last_lsn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_lsns() {
        for value in [0u64, 1, 0x16_B374_D848, u64::MAX] {
            let lsn = PgLsn::from(value);
            let token = encode_cdc_position(lsn).unwrap();
            assert_eq!(decode_cdc_position(&token).unwrap(), lsn);
        }
    }

    #[test]
    fn token_is_tagged_json() {
        let token = encode_cdc_position(PgLsn::from(0x16_B374_D848)).unwrap();
        assert_eq!(token.as_str(), r#"{"type":"cdc","last_lsn":"16/B374D848"}"#);
    }

    #[test]
    fn rejects_foreign_kinds() {
        let token = PositionToken::new(r#"{"type":"snapshot","last_lsn":"0/16"}"#);
        let err = decode_cdc_position(&token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);

        let token = PositionToken::new(r#"{"type":"initial","last_lsn":""}"#);
        assert_eq!(
            decode_cdc_position(&token).unwrap_err().kind(),
            ErrorKind::InvalidPosition
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in [
            "",
            "not json",
            r#"{"type":"cdc"}"#,
            r#"{"type":"cdc","last_lsn":""}"#,
            r#"{"type":"cdc","last_lsn":"xyz"}"#,
        ] {
            let err = decode_cdc_position(&PositionToken::new(token)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPosition, "token {token:?}");
        }
    }
}
