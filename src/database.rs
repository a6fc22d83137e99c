use redb::ReadableTable;
use redb::{Database, ReadTransaction};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::changes::{self, ChangeRecord, SENTINEL_COL};
use crate::clock_store::{
    decode_col_clock, decode_row_clock, split_col_clock_key, ColumnClock, RowClock,
};
use crate::config;
use crate::merge::{self, ApplyReport};
use crate::meta::ReplicaMeta;
use crate::plugins::{tracker::ChangeTracker, Plugin};
use crate::row_key::RowKey;
use crate::rows::Row;
use crate::schema::{ColumnSpec, TableSchema};
use crate::site_id::SiteId;
use crate::storage_error::StorageError;
use crate::tables;
use crate::value::Value;

pub(crate) const META_KEY: &[u8] = &[0];

/// One row-level intent inside a local transaction.
#[derive(Clone, Debug)]
pub enum RowOp {
    Upsert {
        table: String,
        pk: Vec<Value>,
        columns: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        pk: Vec<Value>,
    },
}

impl RowOp {
    pub fn upsert(table: &str, pk: &[Value], columns: &[(&str, Value)]) -> Self {
        RowOp::Upsert {
            table: table.to_string(),
            pk: pk.to_vec(),
            columns: columns
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        }
    }

    pub fn delete(table: &str, pk: &[Value]) -> Self {
        RowOp::Delete {
            table: table.to_string(),
            pk: pk.to_vec(),
        }
    }
}

/// One planned physical write, addressed by redb table name.
#[derive(Clone, Debug)]
pub enum KvWrite {
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Remove {
        table: String,
        key: Vec<u8>,
    },
    /// Open (and thereby create) a table without writing to it.
    EnsureTable {
        table: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A local transaction; the tracker stamps clocks and change records.
    LocalCommit,
    /// Application of a peer changeset; clocks arrive pre-planned.
    Merge,
    /// A write initiated by a plugin, tagged with its name hash.
    Plugin(u16),
}

pub struct WriteBatch {
    pub ops: Vec<RowOp>,
    pub writes: Vec<KvWrite>,
}

pub enum WriteRequest {
    Mutate {
        ops: Vec<RowOp>,
        respond_to: oneshot::Sender<Result<(), StorageError>>,
    },
    ApplyChanges {
        records: Vec<ChangeRecord>,
        respond_to: oneshot::Sender<Result<ApplyReport, StorageError>>,
    },
    TrackTable {
        table: String,
        respond_to: oneshot::Sender<Result<(), StorageError>>,
    },
    BeginAlter {
        table: String,
        respond_to: oneshot::Sender<Result<(), StorageError>>,
    },
    CommitAlter {
        table: String,
        columns: Vec<ColumnSpec>,
        respond_to: oneshot::Sender<Result<(), StorageError>>,
    },
    SetConfig {
        key: String,
        on: bool,
        respond_to: oneshot::Sender<Result<(), StorageError>>,
    },
}

/// Embeddable convergent-table engine.
///
/// All writes funnel through one background task, so a merge batch and a
/// local transaction never interleave: each is planned against a consistent
/// snapshot and applied atomically in a single redb write transaction.
pub struct ConvergeDb {
    db: Arc<Database>,
    write_tx: mpsc::Sender<WriteRequest>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ConvergeDb {
    pub async fn open(
        path: &str,
        extra_plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Arc<Self>, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Other(e.to_string()))?;
        let db_arc = Arc::new(db);

        // Bootstrap engine tables and the replica identity. The site id is
        // minted exactly once per database file.
        {
            let txn = db_arc
                .begin_write()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            {
                let mut meta_t = txn
                    .open_table(tables::META_TABLE)
                    .map_err(|e| StorageError::Other(e.to_string()))?;
                let fresh = meta_t
                    .get(META_KEY)
                    .map_err(|e| StorageError::Other(e.to_string()))?
                    .is_none();
                if fresh {
                    let meta = ReplicaMeta {
                        site_id: SiteId::new(),
                        db_version: 0,
                    };
                    meta_t
                        .insert(META_KEY, meta.to_bytes()?)
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                }
            }
            txn.open_table(tables::SCHEMA_TABLE)
                .map_err(|e| StorageError::Other(e.to_string()))?;
            txn.open_table(tables::CONFIG_TABLE)
                .map_err(|e| StorageError::Other(e.to_string()))?;
            txn.commit()
                .map_err(|e| StorageError::Other(e.to_string()))?;
        }

        let mut plugins: Vec<Arc<dyn Plugin>> = vec![ChangeTracker::new()];
        plugins.extend(extra_plugins);

        let (write_tx, mut write_rx) = mpsc::channel(100);
        let sys = Arc::new(ConvergeDb {
            db: db_arc,
            write_tx,
            plugins,
        });
        let sys2 = sys.clone();
        tokio::spawn(async move {
            while let Some(req) = write_rx.recv().await {
                sys2.handle_write(req).await;
            }
        });
        for p in &sys.plugins {
            p.attach_db(sys.clone());
        }
        Ok(sys)
    }

    /// Register a relation. Creation is a local, setup-time concern; use
    /// [`track_table`](Self::track_table) to make it participate in
    /// replication.
    pub fn create_table(
        &self,
        name: &str,
        pk: &[&str],
        columns: &[ColumnSpec],
    ) -> Result<(), StorageError> {
        if tables::name_is_reserved(name) {
            return Err(StorageError::Other(format!(
                "table name {} collides with an engine table",
                name
            )));
        }
        if pk.is_empty() {
            return Err(StorageError::Other(format!(
                "table {} needs at least one primary key column",
                name
            )));
        }
        for spec in columns {
            if pk.contains(&spec.name.as_str()) {
                return Err(StorageError::Other(format!(
                    "column {} is part of the primary key",
                    spec.name
                )));
            }
        }
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        {
            let mut schema_t = txn
                .open_table(tables::SCHEMA_TABLE)
                .map_err(|e| StorageError::Other(e.to_string()))?;
            let exists = schema_t
                .get(name.as_bytes())
                .map_err(|e| StorageError::Other(e.to_string()))?
                .is_some();
            if exists {
                return Err(StorageError::Other(format!(
                    "table {} already exists",
                    name
                )));
            }
            let schema = TableSchema::new(name, pk, columns);
            schema_t
                .insert(name.as_bytes(), schema.to_bytes()?)
                .map_err(|e| StorageError::Other(e.to_string()))?;
        }
        {
            let rows_name = tables::rows_table_name(name);
            txn.open_table(tables::dyn_table(&rows_name))
                .map_err(|e| StorageError::Other(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    // ----------- Write API (serialized through the write loop) -----------

    /// Run one local transaction. Every change record it produces shares one
    /// db_version; seq numbers the records 0,1,2,… across the transaction.
    pub async fn write(&self, ops: Vec<RowOp>) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::Mutate {
            ops,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    pub async fn upsert(
        &self,
        table: &str,
        pk: &[Value],
        columns: &[(&str, Value)],
    ) -> Result<(), StorageError> {
        self.write(vec![RowOp::upsert(table, pk, columns)]).await
    }

    pub async fn delete_row(&self, table: &str, pk: &[Value]) -> Result<(), StorageError> {
        self.write(vec![RowOp::delete(table, pk)]).await
    }

    /// Mark a table as tracked. Rows that already exist are adopted: each
    /// live row gets a full set of clock records at column version 1, paid
    /// for with one db_version.
    pub async fn track_table(&self, table: &str) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::TrackTable {
            table: table.to_string(),
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    /// Ingest a batch of peer change records. Unresolvable records come back
    /// in the report; the rest of the batch still applies, atomically.
    pub async fn apply_changes(
        &self,
        records: Vec<ChangeRecord>,
    ) -> Result<ApplyReport, StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::ApplyChanges {
            records,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    /// Decode and ingest a wire batch. A batch that fails to decode is
    /// rejected whole.
    pub async fn apply_changes_wire(&self, data: &[u8]) -> Result<ApplyReport, StorageError> {
        let records = changes::decode_batch(data)?;
        self.apply_changes(records).await
    }

    pub async fn begin_alter(&self, table: &str) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::BeginAlter {
            table: table.to_string(),
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    /// Commit a schema bracket. `columns` is the complete new non-pk column
    /// list; columns are matched to the old schema by name.
    pub async fn commit_alter(
        &self,
        table: &str,
        columns: Vec<ColumnSpec>,
    ) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::CommitAlter {
            table: table.to_string(),
            columns,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    pub async fn set_config(&self, key: &str, on: bool) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteRequest::SetConfig {
            key: key.to_string(),
            on,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| StorageError::Other(format!("Write task dropped: {}", e)))?
    }

    async fn send(&self, req: WriteRequest) -> Result<(), StorageError> {
        self.write_tx
            .send(req)
            .await
            .map_err(|e| StorageError::Other(format!("Write queue dropped: {}", e)))
    }

    // ----------- Read API -----------

    pub fn begin_read_txn(&self) -> Result<ReadTransaction, StorageError> {
        self.db
            .begin_read()
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    pub async fn site_id(&self) -> Result<SiteId, StorageError> {
        Ok(read_meta_txn(&self.begin_read_txn()?)?.site_id)
    }

    pub async fn db_version(&self) -> Result<u64, StorageError> {
        Ok(read_meta_txn(&self.begin_read_txn()?)?.db_version)
    }

    pub async fn config_flag(&self, key: &str) -> Result<bool, StorageError> {
        if !config::is_known_key(key) {
            return Err(StorageError::UnknownConfigKey(key.to_string()));
        }
        let rtxn = self.begin_read_txn()?;
        read_flag_txn(&rtxn, key)
    }

    pub async fn table_schema(&self, name: &str) -> Result<TableSchema, StorageError> {
        read_schema_txn(&self.begin_read_txn()?, name)?
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    /// Current non-pk column values of a row, by column name. Tombstoned and
    /// unknown rows read as `None`.
    pub async fn get_row(
        &self,
        table: &str,
        pk: &[Value],
    ) -> Result<Option<Vec<(String, Value)>>, StorageError> {
        let rtxn = self.begin_read_txn()?;
        let schema = read_schema_txn(&rtxn, table)?
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        if pk.len() != schema.pk.len() {
            return Err(StorageError::PkArityMismatch {
                table: table.to_string(),
                expected: schema.pk.len(),
                got: pk.len(),
            });
        }
        let key = RowKey::from_values(pk);
        match read_row_txn(&rtxn, table, key.as_bytes())? {
            None => Ok(None),
            Some(row) => Ok(Some(
                row.iter()
                    .filter_map(|(id, v)| {
                        schema.column_by_id(id).map(|d| (d.name.clone(), v.clone()))
                    })
                    .collect(),
            )),
        }
    }

    /// Export all change records with local db_version > `since`, optionally
    /// excluding records whose winning write originated at `exclude`.
    /// Ordered by (db_version, row key, seq); re-issuing with the same
    /// watermark is idempotent.
    pub async fn changes_since(
        &self,
        since: u64,
        exclude: Option<&SiteId>,
    ) -> Result<Vec<ChangeRecord>, StorageError> {
        let rtxn = self.begin_read_txn()?;
        let mut out = Vec::new();

        for schema in read_all_schemas_txn(&rtxn)? {
            if !schema.tracked {
                continue;
            }
            let Some(rc_t) = open_read_table(&rtxn, &tables::row_clock_table_name(&schema.name))?
            else {
                continue;
            };

            let mut row_clocks: BTreeMap<Vec<u8>, RowClock> = BTreeMap::new();
            for item in rc_t.iter().map_err(|e| StorageError::Other(e.to_string()))? {
                let (k, v) = item.map_err(|e| StorageError::Other(e.to_string()))?;
                row_clocks.insert(k.value().to_vec(), decode_row_clock(&v.value())?);
            }

            let rows_t = open_read_table(&rtxn, &tables::rows_table_name(&schema.name))?;
            let mut row_cache: HashMap<Vec<u8>, Option<Row>> = HashMap::new();
            let mut col_counts: HashMap<Vec<u8>, usize> = HashMap::new();

            if let Some(cc_t) =
                open_read_table(&rtxn, &tables::col_clock_table_name(&schema.name))?
            {
                for item in cc_t.iter().map_err(|e| StorageError::Other(e.to_string()))? {
                    let (k, v) = item.map_err(|e| StorageError::Other(e.to_string()))?;
                    let key = k.value().to_vec();
                    let (row_key, col) = split_col_clock_key(&key)?;
                    *col_counts.entry(row_key.to_vec()).or_default() += 1;

                    let Some(rc) = row_clocks.get(row_key) else {
                        continue;
                    };
                    if !rc.is_live() {
                        // tombstoned rows export only their sentinel
                        continue;
                    }
                    let clock = decode_col_clock(&v.value())?;
                    if clock.db_version <= since {
                        continue;
                    }
                    if exclude == Some(&clock.site_id) {
                        continue;
                    }
                    let Some(def) = schema.column_by_id(col) else {
                        // column dropped by a later alter; unaddressable
                        continue;
                    };
                    let row = row_cache.entry(row_key.to_vec()).or_insert_with(|| {
                        rows_t.as_ref().and_then(|t| {
                            t.get(row_key)
                                .ok()
                                .flatten()
                                .and_then(|g| Row::load_and_migrate(&g.value()).ok())
                        })
                    });
                    let Some(value) = row.as_ref().and_then(|r| r.get(def.id)).cloned() else {
                        continue;
                    };
                    out.push(ChangeRecord {
                        table: schema.name.clone(),
                        row_key: row_key.to_vec(),
                        col_id: def.id as i64,
                        value,
                        col_version: clock.col_version,
                        db_version: clock.db_version,
                        site_id: clock.site_id,
                        causal_length: rc.causal_length,
                        seq: clock.seq,
                    });
                }
            }

            // Sentinels: every tombstone exports one, and so does a live row
            // with no column clocks (a bare create carries only existence).
            for (key, rc) in &row_clocks {
                let has_cols = col_counts.get(key).copied().unwrap_or(0) > 0;
                if rc.is_live() && has_cols {
                    continue;
                }
                if rc.db_version <= since {
                    continue;
                }
                if exclude == Some(&rc.site_id) {
                    continue;
                }
                out.push(ChangeRecord {
                    table: schema.name.clone(),
                    row_key: key.clone(),
                    col_id: SENTINEL_COL,
                    value: Value::Null,
                    col_version: rc.causal_length,
                    db_version: rc.db_version,
                    site_id: rc.site_id,
                    causal_length: rc.causal_length,
                    seq: rc.seq,
                });
            }
        }

        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(out)
    }

    // ----------- Write-loop handlers -----------

    async fn handle_write(&self, req: WriteRequest) {
        match req {
            WriteRequest::Mutate { ops, respond_to } => {
                let res = self.run_batch(ops, WriteOrigin::LocalCommit).await;
                let _ = respond_to.send(res);
            }
            WriteRequest::ApplyChanges {
                records,
                respond_to,
            } => {
                let res = self.run_merge(records).await;
                let _ = respond_to.send(res);
            }
            WriteRequest::TrackTable { table, respond_to } => {
                let res = self.run_track(&table).await;
                let _ = respond_to.send(res);
            }
            WriteRequest::BeginAlter { table, respond_to } => {
                let res = self.run_begin_alter(&table).await;
                let _ = respond_to.send(res);
            }
            WriteRequest::CommitAlter {
                table,
                columns,
                respond_to,
            } => {
                let res = self.run_commit_alter(&table, &columns).await;
                let _ = respond_to.send(res);
            }
            WriteRequest::SetConfig {
                key,
                on,
                respond_to,
            } => {
                let res = self.run_set_config(&key, on).await;
                let _ = respond_to.send(res);
            }
        }
    }

    async fn run_batch(&self, ops: Vec<RowOp>, origin: WriteOrigin) -> Result<(), StorageError> {
        let rtxn = self.begin_read_txn()?;
        let mut batch = WriteBatch {
            ops,
            writes: Vec::new(),
        };
        for p in &self.plugins {
            p.before_update(self, &rtxn, &mut batch, origin).await?;
        }
        self.apply_writes(batch.writes)
    }

    async fn run_merge(&self, records: Vec<ChangeRecord>) -> Result<ApplyReport, StorageError> {
        let rtxn = self.begin_read_txn()?;
        let plan = merge::plan_merge(&rtxn, &records)?;
        let mut batch = WriteBatch {
            ops: Vec::new(),
            writes: plan.writes,
        };
        for p in &self.plugins {
            p.before_update(self, &rtxn, &mut batch, WriteOrigin::Merge)
                .await?;
        }
        self.apply_writes(batch.writes)?;
        Ok(plan.report)
    }

    async fn run_track(&self, table: &str) -> Result<(), StorageError> {
        let rtxn = self.begin_read_txn()?;
        let writes = crate::plugins::tracker::plan_tracking(&rtxn, table)?;
        self.apply_writes(writes)
    }

    async fn run_begin_alter(&self, table: &str) -> Result<(), StorageError> {
        let rtxn = self.begin_read_txn()?;
        let mut schema = read_schema_txn(&rtxn, table)?
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        if schema.pending_alter {
            return Err(StorageError::AlterInProgress(table.to_string()));
        }
        schema.pending_alter = true;
        self.apply_writes(vec![KvWrite::Put {
            table: tables::SCHEMA_TABLE_NAME.to_string(),
            key: table.as_bytes().to_vec(),
            value: schema.to_bytes()?,
        }])
    }

    async fn run_commit_alter(
        &self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> Result<(), StorageError> {
        let rtxn = self.begin_read_txn()?;
        let mut schema = read_schema_txn(&rtxn, table)?
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        if !schema.pending_alter {
            return Err(StorageError::NoAlterInProgress(table.to_string()));
        }
        for spec in columns {
            if schema.pk.contains(&spec.name) {
                return Err(StorageError::Other(format!(
                    "column {} is part of the primary key",
                    spec.name
                )));
            }
        }
        let added = schema.apply_alter(columns);
        schema.pending_alter = false;

        let mut writes = vec![KvWrite::Put {
            table: tables::SCHEMA_TABLE_NAME.to_string(),
            key: table.as_bytes().to_vec(),
            value: schema.to_bytes()?,
        }];

        // Pre-existing rows get the new columns' defaults materialized, but
        // no clock records: nobody has written those cells yet.
        if !added.is_empty() {
            let rows_name = tables::rows_table_name(table);
            for (key, mut row) in read_rows_txn(&rtxn, table)? {
                let mut dirty = false;
                for id in &added {
                    if row.get(*id).is_none() {
                        if let Some(def) = schema.column_by_id(*id) {
                            row.set(*id, def.default.clone());
                            dirty = true;
                        }
                    }
                }
                if dirty {
                    writes.push(KvWrite::Put {
                        table: rows_name.clone(),
                        key,
                        value: row.to_bytes()?,
                    });
                }
            }
        }
        self.apply_writes(writes)
    }

    async fn run_set_config(&self, key: &str, on: bool) -> Result<(), StorageError> {
        if !config::is_known_key(key) {
            return Err(StorageError::UnknownConfigKey(key.to_string()));
        }
        self.apply_writes(vec![KvWrite::Put {
            table: tables::CONFIG_TABLE_NAME.to_string(),
            key: key.as_bytes().to_vec(),
            value: config::encode_flag(on),
        }])
    }

    fn apply_writes(&self, writes: Vec<KvWrite>) -> Result<(), StorageError> {
        if writes.is_empty() {
            return Ok(());
        }
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        for w in &writes {
            match w {
                KvWrite::Put { table, key, value } => {
                    let mut t = txn
                        .open_table(tables::dyn_table(table))
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                    t.insert(key.as_slice(), value.clone())
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                }
                KvWrite::Remove { table, key } => {
                    let mut t = txn
                        .open_table(tables::dyn_table(table))
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                    t.remove(key.as_slice())
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                }
                KvWrite::EnsureTable { table } => {
                    txn.open_table(tables::dyn_table(table))
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                }
            }
        }
        txn.commit()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }
}

// ----------- Shared snapshot readers -----------

pub(crate) fn open_read_table(
    rtxn: &ReadTransaction,
    name: &str,
) -> Result<Option<redb::ReadOnlyTable<&'static [u8], Vec<u8>>>, StorageError> {
    match rtxn.open_table(tables::dyn_table(name)) {
        Ok(t) => Ok(Some(t)),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(StorageError::Other(e.to_string())),
    }
}

pub(crate) fn read_meta_txn(rtxn: &ReadTransaction) -> Result<ReplicaMeta, StorageError> {
    let t = rtxn
        .open_table(tables::META_TABLE)
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let raw = t
        .get(META_KEY)
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or(StorageError::NotFound)?;
    ReplicaMeta::load_and_migrate(&raw.value())
}

pub(crate) fn read_schema_txn(
    rtxn: &ReadTransaction,
    name: &str,
) -> Result<Option<TableSchema>, StorageError> {
    let t = rtxn
        .open_table(tables::SCHEMA_TABLE)
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let got = t
        .get(name.as_bytes())
        .map_err(|e| StorageError::Other(e.to_string()))?;
    match got {
        Some(v) => Ok(Some(TableSchema::load_and_migrate(&v.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn read_all_schemas_txn(
    rtxn: &ReadTransaction,
) -> Result<Vec<TableSchema>, StorageError> {
    let t = rtxn
        .open_table(tables::SCHEMA_TABLE)
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let mut out = Vec::new();
    for item in t.iter().map_err(|e| StorageError::Other(e.to_string()))? {
        let (_, v) = item.map_err(|e| StorageError::Other(e.to_string()))?;
        out.push(TableSchema::load_and_migrate(&v.value())?);
    }
    Ok(out)
}

pub(crate) fn read_row_txn(
    rtxn: &ReadTransaction,
    table: &str,
    key: &[u8],
) -> Result<Option<Row>, StorageError> {
    let Some(t) = open_read_table(rtxn, &tables::rows_table_name(table))? else {
        return Ok(None);
    };
    let got = t.get(key).map_err(|e| StorageError::Other(e.to_string()))?;
    match got {
        Some(v) => Ok(Some(Row::load_and_migrate(&v.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn read_rows_txn(
    rtxn: &ReadTransaction,
    table: &str,
) -> Result<Vec<(Vec<u8>, Row)>, StorageError> {
    let Some(t) = open_read_table(rtxn, &tables::rows_table_name(table))? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for item in t.iter().map_err(|e| StorageError::Other(e.to_string()))? {
        let (k, v) = item.map_err(|e| StorageError::Other(e.to_string()))?;
        out.push((k.value().to_vec(), Row::load_and_migrate(&v.value())?));
    }
    Ok(out)
}

pub(crate) fn read_row_clock_txn(
    rtxn: &ReadTransaction,
    table: &str,
    key: &[u8],
) -> Result<Option<RowClock>, StorageError> {
    let Some(t) = open_read_table(rtxn, &tables::row_clock_table_name(table))? else {
        return Ok(None);
    };
    crate::clock_store::get_row_clock(&t, key)
}

pub(crate) fn read_col_clock_txn(
    rtxn: &ReadTransaction,
    table: &str,
    key: &[u8],
    col: crate::schema::ColId,
) -> Result<Option<ColumnClock>, StorageError> {
    let Some(t) = open_read_table(rtxn, &tables::col_clock_table_name(table))? else {
        return Ok(None);
    };
    crate::clock_store::get_col_clock(&t, key, col)
}

pub(crate) fn read_flag_txn(rtxn: &ReadTransaction, key: &str) -> Result<bool, StorageError> {
    let t = rtxn
        .open_table(tables::CONFIG_TABLE)
        .map_err(|e| StorageError::Other(e.to_string()))?;
    config::get_flag(&t, key)
}
