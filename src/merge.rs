use std::collections::{BTreeMap, HashMap};

use redb::ReadTransaction;
use tracing::debug;

use crate::changes::ChangeRecord;
use crate::clock_store::{col_clock_key, encode_col_clock, encode_row_clock, ColumnClock, RowClock};
use crate::config;
use crate::database::{
    read_col_clock_txn, read_flag_txn, read_meta_txn, read_row_clock_txn, read_row_txn,
    read_schema_txn, KvWrite, META_KEY,
};
use crate::row_key::RowKey;
use crate::rows::Row;
use crate::schema::{ColId, TableSchema};
use crate::storage_error::StorageError;
use crate::tables;

/// One record the merge could not resolve against local state. The record
/// itself is handed back so a caller can log or re-queue it.
#[derive(Clone, Debug)]
pub struct RejectedRecord {
    pub record: ChangeRecord,
    pub reason: StorageError,
}

/// Outcome of one merge batch. `applied` counts records that were resolved
/// (winning, losing or already-known alike); `rejected` holds the ones that
/// could not be addressed at all.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub rejected: Vec<RejectedRecord>,
}

pub struct MergePlan {
    pub writes: Vec<KvWrite>,
    pub report: ApplyReport,
}

type RowSlot = (String, Vec<u8>);
type ColSlot = (String, Vec<u8>, ColId);

struct MergeCtx<'a> {
    txn: &'a ReadTransaction,
    schemas: HashMap<String, Option<TableSchema>>,
    rows: BTreeMap<RowSlot, (Option<Row>, bool)>,
    row_clocks: BTreeMap<RowSlot, (Option<RowClock>, bool)>,
    col_clocks: BTreeMap<ColSlot, (Option<ColumnClock>, bool)>,
    next_seq: u64,
    site_tiebreak: bool,
}

impl<'a> MergeCtx<'a> {
    fn schema(&mut self, table: &str) -> Result<Option<&TableSchema>, StorageError> {
        if !self.schemas.contains_key(table) {
            let s = read_schema_txn(self.txn, table)?;
            self.schemas.insert(table.to_string(), s);
        }
        Ok(self.schemas[table].as_ref())
    }

    fn row(&mut self, table: &str, key: &[u8]) -> Result<Option<Row>, StorageError> {
        let slot = (table.to_string(), key.to_vec());
        if !self.rows.contains_key(&slot) {
            let r = read_row_txn(self.txn, table, key)?;
            self.rows.insert(slot.clone(), (r, false));
        }
        Ok(self.rows[&slot].0.clone())
    }

    fn set_row(&mut self, table: &str, key: &[u8], row: Option<Row>) {
        self.rows
            .insert((table.to_string(), key.to_vec()), (row, true));
    }

    fn row_clock(&mut self, table: &str, key: &[u8]) -> Result<Option<RowClock>, StorageError> {
        let slot = (table.to_string(), key.to_vec());
        if !self.row_clocks.contains_key(&slot) {
            let c = read_row_clock_txn(self.txn, table, key)?;
            self.row_clocks.insert(slot.clone(), (c, false));
        }
        Ok(self.row_clocks[&slot].0)
    }

    fn set_row_clock(&mut self, table: &str, key: &[u8], clock: RowClock) {
        self.row_clocks
            .insert((table.to_string(), key.to_vec()), (Some(clock), true));
    }

    fn col_clock(
        &mut self,
        table: &str,
        key: &[u8],
        col: ColId,
    ) -> Result<Option<ColumnClock>, StorageError> {
        let slot = (table.to_string(), key.to_vec(), col);
        if !self.col_clocks.contains_key(&slot) {
            let c = read_col_clock_txn(self.txn, table, key, col)?;
            self.col_clocks.insert(slot.clone(), (c, false));
        }
        Ok(self.col_clocks[&slot].0)
    }

    fn set_col_clock(&mut self, table: &str, key: &[u8], col: ColId, clock: ColumnClock) {
        self.col_clocks
            .insert((table.to_string(), key.to_vec(), col), (Some(clock), true));
    }

    fn changed(&self) -> bool {
        self.rows.values().any(|(_, d)| *d)
            || self.row_clocks.values().any(|(_, d)| *d)
            || self.col_clocks.values().any(|(_, d)| *d)
    }
}

/// Plan the application of a peer batch against the snapshot in `txn`.
///
/// Structurally invalid records fail the whole batch before anything is
/// planned. Records addressing unknown or untracked targets are rejected
/// individually; the rest apply atomically. Winning records keep their
/// origin col_version and site_id but are re-stamped with this replica's
/// next db_version, so they flow onward from here with a local watermark.
pub fn plan_merge(
    txn: &ReadTransaction,
    records: &[ChangeRecord],
) -> Result<MergePlan, StorageError> {
    // Hard pass: a malformed or clock-invalid record poisons the batch.
    for r in records {
        r.validate()?;
        RowKey::from_bytes(r.row_key.clone()).decode()?;
    }

    let mut ctx = MergeCtx {
        txn,
        schemas: HashMap::new(),
        rows: BTreeMap::new(),
        row_clocks: BTreeMap::new(),
        col_clocks: BTreeMap::new(),
        next_seq: 0,
        site_tiebreak: read_flag_txn(txn, config::MERGE_EQUAL_VALUES)?,
    };
    let mut report = ApplyReport::default();

    for record in records {
        match resolve_target(&mut ctx, record)? {
            Err(reason) => {
                debug!(table = %record.table, %reason, "rejected change record");
                report.rejected.push(RejectedRecord {
                    record: record.clone(),
                    reason,
                });
                continue;
            }
            Ok(()) => {}
        }
        if record.is_sentinel() {
            apply_sentinel(&mut ctx, record)?;
        } else {
            apply_column(&mut ctx, record)?;
        }
        report.applied += 1;
    }

    let mut writes = Vec::new();
    if ctx.changed() {
        let meta = read_meta_txn(txn)?;
        let db_version = meta.db_version + 1;

        for ((table, key), (row, dirty)) in &ctx.rows {
            if !*dirty {
                continue;
            }
            let rows_table = tables::rows_table_name(table);
            match row {
                Some(r) => writes.push(KvWrite::Put {
                    table: rows_table,
                    key: key.clone(),
                    value: r.to_bytes()?,
                }),
                None => writes.push(KvWrite::Remove {
                    table: rows_table,
                    key: key.clone(),
                }),
            }
        }
        for ((table, key), (clock, dirty)) in &ctx.row_clocks {
            if !*dirty {
                continue;
            }
            if let Some(mut c) = *clock {
                c.db_version = db_version;
                writes.push(KvWrite::Put {
                    table: tables::row_clock_table_name(table),
                    key: key.clone(),
                    value: encode_row_clock(&c)?,
                });
            }
        }
        for ((table, key, col), (clock, dirty)) in &ctx.col_clocks {
            if !*dirty {
                continue;
            }
            if let Some(mut c) = *clock {
                c.db_version = db_version;
                writes.push(KvWrite::Put {
                    table: tables::col_clock_table_name(table),
                    key: col_clock_key(key, *col),
                    value: encode_col_clock(&c)?,
                });
            }
        }

        let new_meta = crate::meta::ReplicaMeta {
            site_id: meta.site_id,
            db_version,
        };
        writes.push(KvWrite::Put {
            table: tables::META_TABLE_NAME.to_string(),
            key: META_KEY.to_vec(),
            value: new_meta.to_bytes()?,
        });
        debug!(
            db_version,
            applied = report.applied,
            rejected = report.rejected.len(),
            "planned merge batch"
        );
    }

    Ok(MergePlan { writes, report })
}

/// Per-record addressing checks. `Ok(Err(reason))` is a soft rejection that
/// skips only this record.
fn resolve_target(
    ctx: &mut MergeCtx,
    record: &ChangeRecord,
) -> Result<Result<(), StorageError>, StorageError> {
    let Some(schema) = ctx.schema(&record.table)? else {
        return Ok(Err(StorageError::UnknownTable(record.table.clone())));
    };
    if !schema.tracked {
        return Ok(Err(StorageError::Untracked(record.table.clone())));
    }
    if schema.pending_alter {
        return Ok(Err(StorageError::AlterInProgress(record.table.clone())));
    }
    let arity = RowKey::from_bytes(record.row_key.clone()).decode()?.len();
    if arity != schema.pk.len() {
        return Ok(Err(StorageError::PkArityMismatch {
            table: record.table.clone(),
            expected: schema.pk.len(),
            got: arity,
        }));
    }
    if !record.is_sentinel() {
        let col = record.col_id as ColId;
        if schema.column_by_id(col).is_none() {
            return Ok(Err(StorageError::UnknownColumn {
                table: record.table.clone(),
                column: format!("#{col}"),
            }));
        }
    }
    Ok(Ok(()))
}

fn apply_sentinel(ctx: &mut MergeCtx, record: &ChangeRecord) -> Result<(), StorageError> {
    let table = record.table.as_str();
    let key = record.row_key.as_slice();
    let local_cl = ctx.row_clock(table, key)?.map_or(0, |c| c.causal_length);
    let in_cl = record.causal_length;
    if in_cl <= local_cl {
        // Stale or already known; causal length never regresses.
        return Ok(());
    }
    step_causal_length(ctx, record, in_cl)?;
    Ok(())
}

fn apply_column(ctx: &mut MergeCtx, record: &ChangeRecord) -> Result<(), StorageError> {
    let table = record.table.to_string();
    let key = record.row_key.clone();
    let col = record.col_id as ColId;

    let local_cl = ctx.row_clock(&table, &key)?.map_or(0, |c| c.causal_length);
    let in_cl = record.causal_length;
    if in_cl < local_cl {
        // The whole row state this record describes has been superseded by a
        // later delete or recreate.
        return Ok(());
    }
    if in_cl > local_cl {
        // The record proves a row generation we have not seen; catching the
        // row clock up is itself a change.
        step_causal_length(ctx, record, in_cl)?;
    }

    let incoming_wins = match ctx.col_clock(&table, &key, col)? {
        // An absent clock carries no causal claim and loses to any explicit
        // write.
        None => true,
        Some(local) => {
            if record.col_version != local.col_version {
                record.col_version > local.col_version
            } else {
                let current = ctx
                    .row(&table, &key)?
                    .and_then(|r| r.get(col).cloned())
                    .unwrap_or(crate::value::Value::Null);
                match record.value.cmp(&current) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => {
                        ctx.site_tiebreak && record.site_id > local.site_id
                    }
                }
            }
        }
    };

    if incoming_wins {
        let mut row = ctx.row(&table, &key)?.unwrap_or_default();
        row.set(col, record.value.clone());
        ctx.set_row(&table, &key, Some(row));
        let seq = ctx.next_seq;
        ctx.next_seq += 1;
        ctx.set_col_clock(
            &table,
            &key,
            col,
            ColumnClock {
                col_version: record.col_version,
                db_version: 0, // patched when the batch's watermark is known
                seq,
                site_id: record.site_id,
            },
        );
    }
    Ok(())
}

/// Advance a row's causal length to `new_cl`, flipping liveness as the
/// parity dictates. Tombstoning removes the row's data but leaves its column
/// clocks; resurrection materializes defaults for whatever column records do
/// not follow in the same batch.
fn step_causal_length(
    ctx: &mut MergeCtx,
    record: &ChangeRecord,
    new_cl: u64,
) -> Result<(), StorageError> {
    let table = record.table.to_string();
    let key = record.row_key.clone();
    let seq = ctx.next_seq;
    ctx.next_seq += 1;
    ctx.set_row_clock(
        &table,
        &key,
        RowClock {
            causal_length: new_cl,
            db_version: 0, // patched at plan end
            seq,
            site_id: record.site_id,
        },
    );
    if new_cl % 2 == 0 {
        if ctx.row(&table, &key)?.is_some() {
            ctx.set_row(&table, &key, None);
        }
    } else if ctx.row(&table, &key)?.is_none() {
        let defaults = {
            let schema = ctx
                .schema(&table)?
                .ok_or_else(|| StorageError::UnknownTable(table.clone()))?;
            Row::from_defaults(schema)
        };
        ctx.set_row(&table, &key, Some(defaults));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::changes::ChangeRecord;
    use crate::row_key::RowKey;
    use crate::schema::ColumnSpec;
    use crate::site_id::SiteId;
    use crate::storage_error::StorageError;
    use crate::value::Value;
    use crate::ConvergeDb;

    async fn user_db(name: &str) -> (tempfile::TempDir, std::sync::Arc<ConvergeDb>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        let db = ConvergeDb::open(path.to_str().unwrap(), vec![]).await.unwrap();
        db.create_table("user", &["id"], &[ColumnSpec::new("name", Value::Null)])
            .unwrap();
        db.track_table("user").await.unwrap();
        (dir, db)
    }

    fn record(table: &str, col_version: u64, value: Value) -> ChangeRecord {
        ChangeRecord {
            table: table.to_string(),
            row_key: RowKey::from_values(&[Value::Integer(1)]).into_vec(),
            col_id: 0,
            value,
            col_version,
            db_version: 1,
            site_id: SiteId::from_bytes([9; 16]),
            causal_length: 1,
            seq: 0,
        }
    }

    #[tokio::test]
    async fn unknown_targets_reject_without_poisoning_the_batch() {
        let (_dir, db) = user_db("m.redb").await;
        let good = record("user", 1, Value::text("Javi"));
        let bad = record("ghost", 1, Value::text("x"));
        let report = db.apply_changes(vec![bad, good]).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].reason,
            StorageError::UnknownTable(_)
        ));
        assert_eq!(
            db.get_row("user", &[Value::Integer(1)]).await.unwrap(),
            Some(vec![("name".to_string(), Value::text("Javi"))])
        );
    }

    #[tokio::test]
    async fn malformed_record_fails_the_whole_batch() {
        let (_dir, db) = user_db("m.redb").await;
        let good = record("user", 1, Value::text("Javi"));
        let mut bad = record("user", 1, Value::text("x"));
        bad.causal_length = 0;
        assert!(db.apply_changes(vec![good, bad]).await.is_err());
        // nothing applied
        assert_eq!(db.get_row("user", &[Value::Integer(1)]).await.unwrap(), None);
        assert_eq!(db.db_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reapplying_a_batch_consumes_no_versions() {
        let (_dir, db) = user_db("m.redb").await;
        let batch = vec![record("user", 1, Value::text("Javi"))];
        db.apply_changes(batch.clone()).await.unwrap();
        let v = db.db_version().await.unwrap();
        let report = db.apply_changes(batch).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(db.db_version().await.unwrap(), v);
    }

    #[tokio::test]
    async fn higher_column_version_beats_smaller_value() {
        let (_dir, db) = user_db("m.redb").await;
        db.apply_changes(vec![record("user", 1, Value::text("zzz"))])
            .await
            .unwrap();
        db.apply_changes(vec![record("user", 2, Value::text("aaa"))])
            .await
            .unwrap();
        assert_eq!(
            db.get_row("user", &[Value::Integer(1)]).await.unwrap(),
            Some(vec![("name".to_string(), Value::text("aaa"))])
        );
    }

    #[tokio::test]
    async fn equal_versions_fall_back_to_value_order() {
        let (_dir, db) = user_db("m.redb").await;
        db.apply_changes(vec![record("user", 1, Value::text("bbb"))])
            .await
            .unwrap();
        db.apply_changes(vec![record("user", 1, Value::text("aaa"))])
            .await
            .unwrap();
        assert_eq!(
            db.get_row("user", &[Value::Integer(1)]).await.unwrap(),
            Some(vec![("name".to_string(), Value::text("bbb"))])
        );
        db.apply_changes(vec![record("user", 1, Value::text("ccc"))])
            .await
            .unwrap();
        assert_eq!(
            db.get_row("user", &[Value::Integer(1)]).await.unwrap(),
            Some(vec![("name".to_string(), Value::text("ccc"))])
        );
    }

    #[tokio::test]
    async fn sentinel_tombstone_wins_over_live_row() {
        let (_dir, db) = user_db("m.redb").await;
        db.upsert("user", &[Value::Integer(1)], &[("name", Value::text("Javi"))])
            .await
            .unwrap();

        let mut tomb = record("user", 2, Value::Null);
        tomb.col_id = crate::changes::SENTINEL_COL;
        tomb.causal_length = 2;
        db.apply_changes(vec![tomb]).await.unwrap();
        assert_eq!(db.get_row("user", &[Value::Integer(1)]).await.unwrap(), None);
    }
}
