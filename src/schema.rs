use bincode::{Decode, Encode};

use crate::storage_error::StorageError;
use crate::value::Value;

/// Stable numeric column identifier. Assigned in add-order when a column
/// first appears, never reused, never re-assigned across alters. Change
/// records address columns by this id; `-1` on the wire is the row
/// tombstone/creation sentinel and is not a real ColId.
pub type ColId = u32;

/// Column definition supplied by the caller when creating or altering a
/// table.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ColumnSpec {
    pub name: String,
    pub default: Value,
}

impl ColumnSpec {
    pub fn new(name: &str, default: Value) -> Self {
        ColumnSpec {
            name: name.to_string(),
            default,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ColumnDef {
    pub id: ColId,
    pub name: String,
    pub default: Value,
}

/// Schema of one relation, tracked or not.
///
/// `epoch` counts committed alter brackets. Columns retained across an alter
/// keep their id (and therefore their clocks); added columns get fresh ids;
/// dropped columns lose their name mapping but their ids are never recycled,
/// so old change records can still be recognized as addressing a column that
/// no longer exists.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct TableSchema {
    pub name: String,
    pub pk: Vec<String>,
    pub columns: Vec<ColumnDef>,
    pub next_col_id: ColId,
    pub epoch: u32,
    pub tracked: bool,
    pub pending_alter: bool,
}

impl TableSchema {
    pub fn new(name: &str, pk: &[&str], columns: &[ColumnSpec]) -> Self {
        let mut defs = Vec::with_capacity(columns.len());
        let mut next = 0;
        for spec in columns {
            defs.push(ColumnDef {
                id: next,
                name: spec.name.clone(),
                default: spec.default.clone(),
            });
            next += 1;
        }
        TableSchema {
            name: name.to_string(),
            pk: pk.iter().map(|s| s.to_string()).collect(),
            columns: defs,
            next_col_id: next,
            epoch: 0,
            tracked: false,
            pending_alter: false,
        }
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_by_id(&self, id: ColId) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn resolve(&self, name: &str) -> Result<&ColumnDef, StorageError> {
        self.column_by_name(name)
            .ok_or_else(|| StorageError::UnknownColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// Apply a committed alter: diff the new column list against the current
    /// one by name. Retained columns keep id and clocks; new columns are
    /// assigned fresh ids and, for pre-existing rows, start with no clock
    /// record at all. Returns the ids of the added columns.
    pub fn apply_alter(&mut self, columns: &[ColumnSpec]) -> Vec<ColId> {
        let mut added = Vec::new();
        let mut new_defs = Vec::with_capacity(columns.len());
        for spec in columns {
            match self.column_by_name(&spec.name) {
                Some(existing) => new_defs.push(ColumnDef {
                    id: existing.id,
                    name: spec.name.clone(),
                    default: spec.default.clone(),
                }),
                None => {
                    let id = self.next_col_id;
                    self.next_col_id += 1;
                    added.push(id);
                    new_defs.push(ColumnDef {
                        id,
                        name: spec.name.clone(),
                        default: spec.default.clone(),
                    });
                }
            }
        }
        self.columns = new_defs;
        self.epoch += 1;
        added
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
            _ => Err(StorageError::Bincode("bad schema version".into())),
        }
    }
}
