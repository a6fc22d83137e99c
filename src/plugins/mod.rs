use std::sync::Arc;

use async_trait::async_trait;
use redb::ReadTransaction;

pub mod tracker;

use crate::{ConvergeDb, WriteBatch, WriteOrigin, storage_error::StorageError};

// Just to hash a plugin name into something nice and stable.
pub const fn fnv1a_16(s: &str) -> u16 {
    let mut hash: u32 = 0x811C_9DC5; // 32-bit offset basis
    let mut i = 0;
    let bytes = s.as_bytes();
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    (hash & 0xFFFF) as u16
}

/// Write hook. Plugins run in registration order inside the write pipeline,
/// after the batch's intent is known and before anything is committed. The
/// read transaction shows pre-batch state; planned physical writes are
/// appended to the batch.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn attach_db(&self, db: Arc<ConvergeDb>);

    async fn before_update(
        &self,
        db: &ConvergeDb,
        txn: &ReadTransaction,
        batch: &mut WriteBatch,
        origin: WriteOrigin,
    ) -> Result<(), StorageError>;
}

/*───────────────────────────────────────────────────────────────*/
/* tests                                                         */
/*───────────────────────────────────────────────────────────────*/
