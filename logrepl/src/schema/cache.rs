use std::collections::{BTreeMap, HashMap};
use std::str;

use crate::conversions::text::parse_cell_from_postgres_text;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::message::{Tuple, TupleValue};
use crate::schema::{Relation, RelationId};
use crate::types::Cell;
use crate::{bail, cdc_error};

/// Column values of a decoded tuple keyed by column name.
pub type DecodedValues = BTreeMap<String, Cell>;

/// Cache of the relations announced during one replication session.
///
/// The cache is owned by a single change handler, which both updates it on relation messages and
/// reads it for data messages, so no synchronization is involved. Sharing one session across
/// tasks requires putting the cache behind a lock.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<RelationId, Relation>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a relation, replacing any previous schema with the same id.
    pub fn add(&mut self, relation: Relation) {
        self.relations.insert(relation.id, relation);
    }

    /// Returns the relation registered under `id`.
    ///
    /// A miss means a data message arrived before the relation message describing it.
    pub fn get(&self, id: RelationId) -> CdcResult<&Relation> {
        self.relations.get(&id).ok_or_else(|| {
            cdc_error!(
                ErrorKind::RelationNotFound,
                "Relation not found",
                format!("relation {id} was not announced before its data messages")
            )
        })
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Decodes `tuple` against the current schema of relation `id`.
    ///
    /// Null values produce a [`Cell::Null`] entry. Decoding fails as a whole if any column cannot
    /// be produced: unchanged TOAST markers, binary values and tuples shorter than the relation
    /// are errors.
    pub fn decode(&self, id: RelationId, tuple: &Tuple) -> CdcResult<DecodedValues> {
        let relation = self.get(id)?;
        let mut values = DecodedValues::new();

        for (i, column) in relation.columns.iter().enumerate() {
            let Some(value) = tuple.values().get(i) else {
                bail!(
                    ErrorKind::ConversionError,
                    "Tuple data does not contain data at the specified index",
                    format!(
                        "relation {} has {} columns but the tuple has {} values",
                        relation.qualified_name(),
                        relation.columns.len(),
                        tuple.values().len()
                    )
                );
            };

            let cell = match value {
                TupleValue::Null => Cell::Null,
                TupleValue::UnchangedToast => {
                    bail!(
                        ErrorKind::UnchangedToastValue,
                        "Column value was not sent",
                        format!("column {} holds an unchanged toast value", column.name)
                    );
                }
                TupleValue::Binary(_) => {
                    bail!(
                        ErrorKind::ConversionError,
                        "Binary format is not supported in tuple data",
                        format!("column {}", column.name)
                    );
                }
                TupleValue::Text(bytes) => {
                    let text = str::from_utf8(&bytes[..])?;
                    parse_cell_from_postgres_text(&column.typ, text).map_err(|err| {
                        err.context(
                            "Column value decoding failed",
                            format!("column {} of type {}", column.name, column.typ),
                        )
                    })?
                }
            };

            values.insert(column.name.clone(), cell);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationColumn;
    use crate::test_utils::message::{text_tuple, users_relation};
    use bytes::Bytes;
    use tokio_postgres::types::Type;

    #[test]
    fn get_unknown_relation_fails() {
        let cache = RelationCache::new();
        let err = cache.get(RelationId(42)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RelationNotFound);
    }

    #[test]
    fn add_replaces_existing_relation() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let mut changed = users_relation(1);
        changed
            .columns
            .push(RelationColumn::new("email", Type::TEXT));
        cache.add(changed);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(RelationId(1)).unwrap().columns.len(), 3);
    }

    #[test]
    fn decode_maps_columns_by_position() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let values = cache
            .decode(RelationId(1), &text_tuple(&[Some("7"), Some("ada")]))
            .unwrap();

        assert_eq!(values.get("id"), Some(&Cell::I32(7)));
        assert_eq!(values.get("name"), Some(&Cell::String("ada".to_string())));
    }

    #[test]
    fn decode_maps_null_to_null_entry() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let values = cache
            .decode(RelationId(1), &text_tuple(&[Some("7"), None]))
            .unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values.get("name"), Some(&Cell::Null));
    }

    #[test]
    fn decode_rejects_unchanged_toast() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let tuple = Tuple::new(vec![
            TupleValue::Text(Bytes::from_static(b"7")),
            TupleValue::UnchangedToast,
        ]);
        let err = cache.decode(RelationId(1), &tuple).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnchangedToastValue);
    }

    #[test]
    fn decode_rejects_short_and_binary_tuples() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let err = cache
            .decode(RelationId(1), &text_tuple(&[Some("7")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);

        let tuple = Tuple::new(vec![
            TupleValue::Binary(Bytes::from_static(&[0, 0, 0, 7])),
            TupleValue::Null,
        ]);
        let err = cache.decode(RelationId(1), &tuple).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn decode_reports_column_of_malformed_value() {
        let mut cache = RelationCache::new();
        cache.add(users_relation(1));

        let err = cache
            .decode(RelationId(1), &text_tuple(&[Some("seven"), Some("ada")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert!(err.detail().unwrap().contains("column id"));
    }

    #[test]
    fn decode_unknown_relation_fails() {
        let cache = RelationCache::new();
        let err = cache
            .decode(RelationId(9), &text_tuple(&[Some("1")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RelationNotFound);
    }
}
