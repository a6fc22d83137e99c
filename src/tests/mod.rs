use std::sync::Arc;

use tempfile::TempDir;

use crate::ConvergeDb;

mod sync_test;

pub async fn fresh_db(name: &str) -> (TempDir, Arc<ConvergeDb>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    let db = ConvergeDb::open(path.to_str().unwrap(), vec![])
        .await
        .unwrap();
    (dir, db)
}

/// Ship everything `src` has seen since `since` into `dst`. Returns the
/// watermark to use for the next incremental pull from `src`.
pub async fn sync_once(src: &ConvergeDb, dst: &ConvergeDb, since: u64) -> u64 {
    let changes = src.changes_since(since, None).await.unwrap();
    let report = dst.apply_changes(changes).await.unwrap();
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    src.db_version().await.unwrap()
}
