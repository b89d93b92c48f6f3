use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(PgNumeric),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Cells serialize to plain JSON scalars. Numerics and temporal values use their Postgres text
/// form and bytes are base64 encoded.
impl Serialize for Cell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(value) => serializer.serialize_bool(*value),
            Cell::String(value) => serializer.serialize_str(value),
            Cell::I16(value) => serializer.serialize_i16(*value),
            Cell::I32(value) => serializer.serialize_i32(*value),
            Cell::U32(value) => serializer.serialize_u32(*value),
            Cell::I64(value) => serializer.serialize_i64(*value),
            Cell::F32(value) => serializer.serialize_f32(*value),
            Cell::F64(value) => serializer.serialize_f64(*value),
            Cell::Numeric(value) => value.serialize(serializer),
            Cell::Date(value) => serializer.collect_str(value),
            Cell::Time(value) => serializer.collect_str(value),
            Cell::Timestamp(value) => serializer.collect_str(value),
            Cell::TimestampTz(value) => serializer.serialize_str(&value.to_rfc3339()),
            Cell::Uuid(value) => serializer.collect_str(value),
            Cell::Json(value) => value.serialize(serializer),
            Cell::Bytes(value) => serializer.serialize_str(&STANDARD.encode(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_to_plain_json_values() {
        assert_eq!(serde_json::to_value(Cell::Null).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(Cell::I32(7)).unwrap(), json!(7));
        assert_eq!(
            serde_json::to_value(Cell::String("a".to_string())).unwrap(),
            json!("a")
        );
        assert_eq!(
            serde_json::to_value(Cell::Bytes(b"Hello".to_vec())).unwrap(),
            json!("SGVsbG8=")
        );
        assert_eq!(
            serde_json::to_value(Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
                .unwrap(),
            json!("2024-01-02")
        );
    }
}
