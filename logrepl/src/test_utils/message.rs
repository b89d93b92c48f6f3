use bytes::Bytes;
use tokio_postgres::types::Type;

use crate::replication::message::{Tuple, TupleValue};
use crate::schema::{Relation, RelationColumn, RelationId};

/// Builds a `public.users (id int4, name text)` relation, with `id` in the replica identity.
pub fn users_relation(id: u32) -> Relation {
    let mut id_column = RelationColumn::new("id", Type::INT4);
    id_column.flags = 1;

    Relation::new(
        RelationId(id),
        "public",
        "users",
        vec![id_column, RelationColumn::new("name", Type::TEXT)],
    )
}

/// Builds a tuple of text values, `None` standing for null.
pub fn text_tuple(values: &[Option<&str>]) -> Tuple {
    let values = values
        .iter()
        .map(|value| match value {
            Some(value) => TupleValue::Text(Bytes::copy_from_slice(value.as_bytes())),
            None => TupleValue::Null,
        })
        .collect();

    Tuple::new(values)
}
