use bincode::{Decode, Encode};

use crate::schema::{ColId, TableSchema};
use crate::storage_error::StorageError;
use crate::value::Value;

/// Stored non-pk column values of one row, kept sorted by ColId. Pk values
/// live in the row key, not here.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct Row {
    columns: Vec<(ColId, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Row {
            columns: Vec::new(),
        }
    }

    /// Fresh row with every current column materialized at its default.
    pub fn from_defaults(schema: &TableSchema) -> Self {
        let mut row = Row::new();
        for col in &schema.columns {
            row.set(col.id, col.default.clone());
        }
        row
    }

    pub fn get(&self, col: ColId) -> Option<&Value> {
        self.columns
            .binary_search_by_key(&col, |(id, _)| *id)
            .ok()
            .map(|i| &self.columns[i].1)
    }

    pub fn set(&mut self, col: ColId, value: Value) {
        match self.columns.binary_search_by_key(&col, |(id, _)| *id) {
            Ok(i) => self.columns[i].1 = value,
            Err(i) => self.columns.insert(i, (col, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColId, &Value)> {
        self.columns.iter().map(|(id, v)| (*id, v))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let payload = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StorageError::Bincode(e.to_string()))?;
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(0u8);
        buf.extend(payload);
        Ok(buf)
    }

    pub fn load_and_migrate(data: &[u8]) -> Result<Self, StorageError> {
        match data.first().copied() {
            Some(0) => bincode::decode_from_slice(&data[1..], bincode::config::standard())
                .map(|(v, _)| v)
                .map_err(|e| StorageError::Bincode(e.to_string())),
            _ => Err(StorageError::Bincode("bad row version".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;

    #[test]
    fn set_keeps_columns_sorted() {
        let mut row = Row::new();
        row.set(3, Value::Integer(3));
        row.set(1, Value::Integer(1));
        row.set(2, Value::Integer(2));
        let ids: Vec<ColId> = row.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn defaults_materialize_every_column() {
        let schema = TableSchema::new(
            "foo",
            &["a"],
            &[
                ColumnSpec::new("b", Value::Integer(4)),
                ColumnSpec::new("c", Value::Null),
            ],
        );
        let row = Row::from_defaults(&schema);
        assert_eq!(row.get(0), Some(&Value::Integer(4)));
        assert_eq!(row.get(1), Some(&Value::Null));
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut row = Row::new();
        row.set(0, Value::text("Javi"));
        let back = Row::load_and_migrate(&row.to_bytes().unwrap()).unwrap();
        assert_eq!(back, row);
    }
}
