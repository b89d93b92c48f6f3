use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::Type;
use uuid::Uuid;

use crate::cdc_error;
use crate::conversions::bool::parse_bool;
use crate::conversions::hex::parse_bytea_hex;
use crate::conversions::numeric::PgNumeric;
use crate::error::{CdcResult, ErrorKind};
use crate::types::Cell;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

const INFINITY: &str = "infinity";
const NEGATIVE_INFINITY: &str = "-infinity";
/// Suffix Postgres appends to dates before year 1, e.g. `0044-03-15 BC`.
const BC_SUFFIX: &str = " BC";

/// Parses the text representation of a column value, as sent by `pgoutput`, into a [`Cell`].
///
/// Types without a dedicated variant keep their raw text in [`Cell::String`]. So do the
/// `infinity` and `-infinity` dates and timestamps, which chrono cannot represent.
pub fn parse_cell_from_postgres_text(typ: &Type, str: &str) -> CdcResult<Cell> {
    match *typ {
        Type::DATE | Type::TIMESTAMP | Type::TIMESTAMPTZ
            if str == INFINITY || str == NEGATIVE_INFINITY =>
        {
            Ok(Cell::String(str.to_string()))
        }
        Type::BOOL => Ok(Cell::Bool(parse_bool(str)?)),
        Type::CHAR | Type::BPCHAR | Type::VARCHAR | Type::NAME | Type::TEXT => {
            Ok(Cell::String(str.to_string()))
        }
        Type::INT2 => Ok(Cell::I16(str.parse()?)),
        Type::INT4 => Ok(Cell::I32(str.parse()?)),
        Type::INT8 => Ok(Cell::I64(str.parse()?)),
        Type::OID => Ok(Cell::U32(str.parse()?)),
        Type::FLOAT4 => Ok(Cell::F32(str.parse()?)),
        Type::FLOAT8 => Ok(Cell::F64(str.parse()?)),
        Type::NUMERIC => Ok(Cell::Numeric(str.parse::<PgNumeric>()?)),
        Type::BYTEA => Ok(Cell::Bytes(parse_bytea_hex(str)?)),
        Type::DATE => {
            let (value, bc) = split_era(str);
            let date = NaiveDate::parse_from_str(value, DATE_FORMAT)?;
            Ok(Cell::Date(with_era(date, bc, str)?))
        }
        Type::TIME => Ok(Cell::Time(NaiveTime::parse_from_str(str, TIME_FORMAT)?)),
        Type::TIMESTAMP => {
            let (value, bc) = split_era(str);
            let timestamp = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)?;
            Ok(Cell::Timestamp(with_era(timestamp, bc, str)?))
        }
        Type::TIMESTAMPTZ => {
            let (value, bc) = split_era(str);
            let timestamp = DateTime::parse_from_str(value, TIMESTAMPTZ_FORMAT)?;
            Ok(Cell::TimestampTz(
                with_era(timestamp, bc, str)?.with_timezone(&Utc),
            ))
        }
        Type::UUID => Ok(Cell::Uuid(Uuid::parse_str(str)?)),
        Type::JSON | Type::JSONB => Ok(Cell::Json(serde_json::from_str(str)?)),
        _ => Ok(Cell::String(str.to_string())),
    }
}

fn split_era(str: &str) -> (&str, bool) {
    match str.strip_suffix(BC_SUFFIX) {
        Some(value) => (value, true),
        None => (str, false),
    }
}

/// Converts a BC year to chrono's astronomical numbering, where 1 BC is year 0.
fn with_era<T: Datelike>(value: T, bc: bool, str: &str) -> CdcResult<T> {
    if !bc {
        return Ok(value);
    }

    let year = 1 - value.year();
    value.with_year(year).ok_or_else(|| {
        cdc_error!(
            ErrorKind::ConversionError,
            "Date is out of range",
            format!("{str} has no astronomical year {year}")
        )
    })
}
