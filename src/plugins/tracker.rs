use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use redb::ReadTransaction;
use tracing::debug;

use crate::clock_store::{col_clock_key, encode_col_clock, encode_row_clock, ColumnClock, RowClock};
use crate::database::{
    read_col_clock_txn, read_meta_txn, read_row_clock_txn, read_row_txn, read_rows_txn,
    read_schema_txn, KvWrite, RowOp, WriteBatch, WriteOrigin, META_KEY,
};
use crate::plugins::Plugin;
use crate::row_key::RowKey;
use crate::rows::Row;
use crate::schema::{ColId, TableSchema};
use crate::storage_error::StorageError;
use crate::tables;
use crate::ConvergeDb;

/// Stamps every local transaction with causal metadata.
///
/// Runs first in the plugin chain. For each row op it plans the row write
/// plus the clock records that make the write exportable: one column clock
/// per touched column, a row clock whenever the causal length moves, and the
/// advanced db_version watermark. Ops against untracked tables get plain row
/// writes and no clocks.
pub struct ChangeTracker;

impl ChangeTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(ChangeTracker)
    }
}

#[async_trait]
impl Plugin for ChangeTracker {
    fn attach_db(&self, _db: Arc<ConvergeDb>) {}

    async fn before_update(
        &self,
        _db: &ConvergeDb,
        txn: &ReadTransaction,
        batch: &mut WriteBatch,
        origin: WriteOrigin,
    ) -> Result<(), StorageError> {
        if origin != WriteOrigin::LocalCommit || batch.ops.is_empty() {
            return Ok(());
        }
        let planned = plan_local_ops(txn, &batch.ops)?;
        batch.writes.extend(planned);
        Ok(())
    }
}

enum Emit {
    Col {
        table: String,
        key: Vec<u8>,
        col: ColId,
        col_version: u64,
    },
    Sentinel {
        table: String,
        key: Vec<u8>,
    },
}

/// Turn a transaction's row ops into physical writes against the snapshot in
/// `txn`. All clock emissions of the transaction share one db_version; seq
/// numbers them in op order, columns in column-id order within an op.
pub fn plan_local_ops(
    txn: &ReadTransaction,
    ops: &[RowOp],
) -> Result<Vec<KvWrite>, StorageError> {
    let mut schemas: HashMap<String, TableSchema> = HashMap::new();
    // Overlays so a later op in the same transaction sees earlier ops.
    let mut rows: BTreeMap<(String, Vec<u8>), Option<Row>> = BTreeMap::new();
    let mut row_dirty: BTreeMap<(String, Vec<u8>), bool> = BTreeMap::new();
    let mut causal: BTreeMap<(String, Vec<u8>), Option<u64>> = BTreeMap::new();
    let mut new_causal: BTreeMap<(String, Vec<u8>), u64> = BTreeMap::new();
    let mut col_versions: HashMap<(String, Vec<u8>, ColId), Option<u64>> = HashMap::new();
    let mut emits: Vec<Emit> = Vec::new();

    for op in ops {
        let table = match op {
            RowOp::Upsert { table, .. } | RowOp::Delete { table, .. } => table.clone(),
        };
        if !schemas.contains_key(&table) {
            let schema = read_schema_txn(txn, &table)?
                .ok_or_else(|| StorageError::UnknownTable(table.clone()))?;
            if schema.pending_alter {
                return Err(StorageError::AlterInProgress(table.clone()));
            }
            schemas.insert(table.clone(), schema);
        }
        let schema = &schemas[&table];

        let pk = match op {
            RowOp::Upsert { pk, .. } | RowOp::Delete { pk, .. } => pk,
        };
        if pk.len() != schema.pk.len() {
            return Err(StorageError::PkArityMismatch {
                table: table.clone(),
                expected: schema.pk.len(),
                got: pk.len(),
            });
        }
        let key_bytes = RowKey::from_values(pk).into_vec();
        let slot = (table.clone(), key_bytes.clone());

        if !rows.contains_key(&slot) {
            rows.insert(slot.clone(), read_row_txn(txn, &table, &key_bytes)?);
            row_dirty.insert(slot.clone(), false);
        }
        if !causal.contains_key(&slot) {
            let cl = read_row_clock_txn(txn, &table, &key_bytes)?.map(|c| c.causal_length);
            causal.insert(slot.clone(), cl);
        }
        let effective_cl = new_causal
            .get(&slot)
            .copied()
            .or(causal[&slot])
            .unwrap_or(0);
        let alive = effective_cl % 2 == 1;

        match op {
            RowOp::Upsert { columns, .. } => {
                // Resolve all names before touching anything.
                let mut resolved: Vec<(ColId, &crate::value::Value)> = Vec::new();
                for (name, value) in columns {
                    let def = schema.resolve(name)?;
                    resolved.push((def.id, value));
                }
                resolved.sort_by_key(|(id, _)| *id);

                if !schema.tracked {
                    let mut current = rows[&slot]
                        .clone()
                        .unwrap_or_else(|| Row::from_defaults(schema));
                    for (id, value) in &resolved {
                        current.set(*id, (*value).clone());
                    }
                    rows.insert(slot.clone(), Some(current));
                    row_dirty.insert(slot.clone(), true);
                    continue;
                }

                if !alive {
                    // Create (or resurrect): causal length steps to the next
                    // odd value; unsupplied columns take defaults without any
                    // clock.
                    new_causal.insert(slot.clone(), effective_cl + 1);
                    let mut fresh = Row::from_defaults(schema);
                    for (id, value) in &resolved {
                        fresh.set(*id, (*value).clone());
                    }
                    rows.insert(slot.clone(), Some(fresh));
                    row_dirty.insert(slot.clone(), true);

                    if resolved.is_empty() {
                        emits.push(Emit::Sentinel {
                            table: table.clone(),
                            key: key_bytes.clone(),
                        });
                    }
                    for (id, _) in &resolved {
                        let v = next_col_version(
                            txn,
                            &mut col_versions,
                            &table,
                            &key_bytes,
                            *id,
                        )?;
                        emits.push(Emit::Col {
                            table: table.clone(),
                            key: key_bytes.clone(),
                            col: *id,
                            col_version: v,
                        });
                    }
                } else {
                    let mut current = rows[&slot]
                        .clone()
                        .unwrap_or_else(|| Row::from_defaults(schema));
                    for (id, value) in &resolved {
                        if current.get(*id) == Some(*value) {
                            // Writing the value already present is not a
                            // change and bumps nothing.
                            continue;
                        }
                        current.set(*id, (*value).clone());
                        row_dirty.insert(slot.clone(), true);
                        let v = next_col_version(
                            txn,
                            &mut col_versions,
                            &table,
                            &key_bytes,
                            *id,
                        )?;
                        emits.push(Emit::Col {
                            table: table.clone(),
                            key: key_bytes.clone(),
                            col: *id,
                            col_version: v,
                        });
                    }
                    rows.insert(slot.clone(), Some(current));
                }
            }
            RowOp::Delete { .. } => {
                if !schema.tracked {
                    if rows[&slot].is_some() {
                        rows.insert(slot.clone(), None);
                        row_dirty.insert(slot.clone(), true);
                    }
                    continue;
                }
                if !alive {
                    // Deleting an absent or already tombstoned row is a
                    // complete no-op.
                    continue;
                }
                new_causal.insert(slot.clone(), effective_cl + 1);
                rows.insert(slot.clone(), None);
                row_dirty.insert(slot.clone(), true);
                // Column clocks survive the tombstone; only the sentinel is
                // exported while the row is dead.
                emits.push(Emit::Sentinel {
                    table: table.clone(),
                    key: key_bytes.clone(),
                });
            }
        }
    }

    let mut writes: Vec<KvWrite> = Vec::new();
    for ((table, key), dirty) in &row_dirty {
        if !*dirty {
            continue;
        }
        let rows_table = tables::rows_table_name(table);
        match &rows[&(table.clone(), key.clone())] {
            Some(row) => writes.push(KvWrite::Put {
                table: rows_table,
                key: key.clone(),
                value: row.to_bytes()?,
            }),
            None => writes.push(KvWrite::Remove {
                table: rows_table,
                key: key.clone(),
            }),
        }
    }

    if emits.is_empty() && new_causal.is_empty() {
        return Ok(writes);
    }

    let meta = read_meta_txn(txn)?;
    let db_version = meta.db_version + 1;
    let site_id = meta.site_id;

    // Row clock stamp: the sentinel's seq when one was emitted, otherwise
    // the row's first column emit of this transaction.
    let mut row_stamp: BTreeMap<(String, Vec<u8>), u64> = BTreeMap::new();
    for (seq, emit) in emits.iter().enumerate() {
        let seq = seq as u64;
        match emit {
            Emit::Sentinel { table, key } => {
                row_stamp.insert((table.clone(), key.clone()), seq);
            }
            Emit::Col { table, key, col, col_version } => {
                row_stamp
                    .entry((table.clone(), key.clone()))
                    .or_insert(seq);
                let clock = ColumnClock {
                    col_version: *col_version,
                    db_version,
                    seq,
                    site_id,
                };
                writes.push(KvWrite::Put {
                    table: tables::col_clock_table_name(table),
                    key: col_clock_key(key, *col),
                    value: encode_col_clock(&clock)?,
                });
            }
        }
    }

    for ((table, key), cl) in &new_causal {
        let seq = row_stamp
            .get(&(table.clone(), key.clone()))
            .copied()
            .unwrap_or(0);
        let clock = RowClock {
            causal_length: *cl,
            db_version,
            seq,
            site_id,
        };
        writes.push(KvWrite::Put {
            table: tables::row_clock_table_name(table),
            key: key.clone(),
            value: encode_row_clock(&clock)?,
        });
    }

    let new_meta = crate::meta::ReplicaMeta {
        site_id,
        db_version,
    };
    writes.push(KvWrite::Put {
        table: tables::META_TABLE_NAME.to_string(),
        key: META_KEY.to_vec(),
        value: new_meta.to_bytes()?,
    });

    debug!(db_version, emits = emits.len(), "planned local transaction");
    Ok(writes)
}

fn next_col_version(
    txn: &ReadTransaction,
    overlay: &mut HashMap<(String, Vec<u8>, ColId), Option<u64>>,
    table: &str,
    key: &[u8],
    col: ColId,
) -> Result<u64, StorageError> {
    let slot = (table.to_string(), key.to_vec(), col);
    if !overlay.contains_key(&slot) {
        let stored = read_col_clock_txn(txn, table, key, col)?.map(|c| c.col_version);
        overlay.insert(slot.clone(), stored);
    }
    let next = overlay[&slot].unwrap_or(0) + 1;
    overlay.insert(slot, Some(next));
    Ok(next)
}

/// Plan the adoption of an untracked table. Every live row gets a row clock
/// at causal length 1 and one column clock per stored column, all at column
/// version 1 and sharing a single fresh db_version. Already-tracked tables
/// plan nothing.
pub fn plan_tracking(
    txn: &ReadTransaction,
    table: &str,
) -> Result<Vec<KvWrite>, StorageError> {
    let mut schema = read_schema_txn(txn, table)?
        .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
    if schema.tracked {
        return Ok(Vec::new());
    }
    if schema.pending_alter {
        return Err(StorageError::AlterInProgress(table.to_string()));
    }
    schema.tracked = true;

    let mut writes = vec![
        KvWrite::Put {
            table: tables::SCHEMA_TABLE_NAME.to_string(),
            key: table.as_bytes().to_vec(),
            value: schema.to_bytes()?,
        },
        KvWrite::EnsureTable {
            table: tables::row_clock_table_name(table),
        },
        KvWrite::EnsureTable {
            table: tables::col_clock_table_name(table),
        },
    ];

    let existing = read_rows_txn(txn, table)?;
    if existing.is_empty() {
        return Ok(writes);
    }

    let meta = read_meta_txn(txn)?;
    let db_version = meta.db_version + 1;
    let site_id = meta.site_id;
    let rc_table = tables::row_clock_table_name(table);
    let cc_table = tables::col_clock_table_name(table);

    let mut seq: u64 = 0;
    for (key, row) in &existing {
        let row_seq = seq;
        let mut emitted = false;
        for (col, _) in row.iter() {
            let clock = ColumnClock {
                col_version: 1,
                db_version,
                seq,
                site_id,
            };
            writes.push(KvWrite::Put {
                table: cc_table.clone(),
                key: col_clock_key(key, col),
                value: encode_col_clock(&clock)?,
            });
            seq += 1;
            emitted = true;
        }
        if !emitted {
            // Column-less rows still need an exportable existence marker.
            seq += 1;
        }
        writes.push(KvWrite::Put {
            table: rc_table.clone(),
            key: key.clone(),
            value: encode_row_clock(&RowClock {
                causal_length: 1,
                db_version,
                seq: row_seq,
                site_id,
            })?,
        });
    }

    let new_meta = crate::meta::ReplicaMeta {
        site_id,
        db_version,
    };
    writes.push(KvWrite::Put {
        table: tables::META_TABLE_NAME.to_string(),
        key: META_KEY.to_vec(),
        value: new_meta.to_bytes()?,
    });

    debug!(table, rows = existing.len(), db_version, "adopted table");
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::schema::ColumnSpec;
    use crate::value::Value;
    use crate::ConvergeDb;

    async fn fresh_db(name: &str) -> (tempfile::TempDir, std::sync::Arc<ConvergeDb>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        let db = ConvergeDb::open(path.to_str().unwrap(), vec![]).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn tracked_upsert_advances_watermark() {
        let (_dir, db) = fresh_db("t.redb").await;
        db.create_table("user", &["id"], &[ColumnSpec::new("name", Value::Null)])
            .unwrap();
        db.track_table("user").await.unwrap();
        assert_eq!(db.db_version().await.unwrap(), 0);

        db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
            .await
            .unwrap();
        assert_eq!(db.db_version().await.unwrap(), 1);

        db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Erin"))])
            .await
            .unwrap();
        assert_eq!(db.db_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rewriting_same_value_is_a_noop() {
        let (_dir, db) = fresh_db("t.redb").await;
        db.create_table("user", &["id"], &[ColumnSpec::new("name", Value::Null)])
            .unwrap();
        db.track_table("user").await.unwrap();

        db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
            .await
            .unwrap();
        let v = db.db_version().await.unwrap();
        db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
            .await
            .unwrap();
        assert_eq!(db.db_version().await.unwrap(), v);
    }

    #[tokio::test]
    async fn untracked_writes_consume_no_versions() {
        let (_dir, db) = fresh_db("t.redb").await;
        db.create_table("cache", &["k"], &[ColumnSpec::new("v", Value::Null)])
            .unwrap();
        db.upsert("cache", &[Value::Integer(1)], &[("v", Value::Integer(10))])
            .await
            .unwrap();
        assert_eq!(db.db_version().await.unwrap(), 0);
        assert!(db.changes_since(0, None).await.unwrap().is_empty());
        assert_eq!(
            db.get_row("cache", &[Value::Integer(1)]).await.unwrap(),
            Some(vec![("v".to_string(), Value::Integer(10))])
        );
    }

    #[tokio::test]
    async fn delete_then_recreate_steps_causal_length() {
        let (_dir, db) = fresh_db("t.redb").await;
        db.create_table("user", &["id"], &[ColumnSpec::new("name", Value::Null)])
            .unwrap();
        db.track_table("user").await.unwrap();
        let k = [Value::Integer(1)];

        db.upsert("user", &k, &[("name", Value::text("Javi"))])
            .await
            .unwrap();
        db.delete_row("user", &k).await.unwrap();
        assert_eq!(db.get_row("user", &k).await.unwrap(), None);

        // double delete is a no-op
        let v = db.db_version().await.unwrap();
        db.delete_row("user", &k).await.unwrap();
        assert_eq!(db.db_version().await.unwrap(), v);

        db.upsert("user", &k, &[("name", Value::text("Erin"))])
            .await
            .unwrap();
        let changes = db.changes_since(0, None).await.unwrap();
        assert!(changes.iter().all(|c| c.causal_length == 3));
        assert!(db.get_row("user", &k).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tracking_backfills_existing_rows() {
        let (_dir, db) = fresh_db("t.redb").await;
        db.create_table(
            "user",
            &["id"],
            &[
                ColumnSpec::new("name", Value::Null),
                ColumnSpec::new("age", Value::Integer(0)),
            ],
        )
        .unwrap();
        db.upsert(
            "user",
            &[Value::Integer(1)],
            &[("name", Value::text("Javi")), ("age", Value::Integer(40))],
        )
        .await
        .unwrap();
        assert_eq!(db.db_version().await.unwrap(), 0);

        db.track_table("user").await.unwrap();
        assert_eq!(db.db_version().await.unwrap(), 1);

        let changes = db.changes_since(0, None).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.col_version == 1));
        assert!(changes.iter().all(|c| c.db_version == 1));

        // idempotent
        db.track_table("user").await.unwrap();
        assert_eq!(db.db_version().await.unwrap(), 1);
    }
}
