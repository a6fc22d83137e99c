use bincode::{Decode, Encode};

use crate::site_id::SiteId;
use crate::storage_error::StorageError;

/// Process-wide replica state: the site identity and the monotonic
/// db_version watermark. Generated once on first open, persisted, never
/// reset. db_version advances exactly once per local transaction that
/// produced at least one real change; pure no-op merges must not move it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ReplicaMetaV0 {
    pub site_id: SiteId,
    pub db_version: u64,
}

pub type ReplicaMeta = ReplicaMetaV0;

impl ReplicaMeta {
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
            _ => Err(StorageError::Bincode("bad replica meta version".into())),
        }
    }
}
