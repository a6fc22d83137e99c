use bincode::{Decode, Encode};

use crate::site_id::SiteId;
use crate::storage_error::StorageError;
use crate::value::Value;

/// Column id carried by a record that represents the row's tombstone or
/// creation marker rather than a real column.
pub const SENTINEL_COL: i64 = -1;

/// Exported representation of one column's last-known causal state, or of a
/// row's tombstone/creation marker when `col_id` is the sentinel.
///
/// `db_version` and `seq` are stamps of the exporting replica (a merged
/// record is re-stamped when it wins locally); `col_version`, `site_id` and
/// `causal_length` travel unchanged with the logical write they describe.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ChangeRecord {
    pub table: String,
    pub row_key: Vec<u8>,
    pub col_id: i64,
    pub value: Value,
    pub col_version: u64,
    pub db_version: u64,
    pub site_id: SiteId,
    pub causal_length: u64,
    pub seq: u64,
}

impl ChangeRecord {
    pub fn is_sentinel(&self) -> bool {
        self.col_id == SENTINEL_COL
    }

    /// Export order: (db_version, row key, seq). seq is unique within one
    /// local transaction, so multi-column writes replay as a contiguous set.
    pub fn sort_key(&self) -> (u64, Vec<u8>, u64) {
        (self.db_version, self.row_key.clone(), self.seq)
    }

    /// Structural validation of a single record. Semantic staleness is the
    /// merge engine's business; this only rejects shapes no well-formed peer
    /// can produce.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.causal_length == 0 {
            return Err(StorageError::ClockRegression(format!(
                "record for {} carries causal length 0",
                self.table
            )));
        }
        if self.is_sentinel() {
            if !self.value.is_null() {
                return Err(StorageError::MalformedRecord(
                    "sentinel record with a non-null value".into(),
                ));
            }
        } else {
            if self.col_id < 0 {
                return Err(StorageError::MalformedRecord(format!(
                    "negative column id {}",
                    self.col_id
                )));
            }
            if self.col_version == 0 {
                return Err(StorageError::ClockRegression(format!(
                    "record for {} carries column version 0",
                    self.table
                )));
            }
            if self.causal_length % 2 == 0 {
                return Err(StorageError::ClockRegression(format!(
                    "column record for {} on a tombstoned row (causal length {})",
                    self.table, self.causal_length
                )));
            }
        }
        Ok(())
    }
}

const WIRE_VERSION: u8 = 0;

/// Encode a batch for shipping to a peer.
pub fn encode_batch(records: &[ChangeRecord]) -> Result<Vec<u8>, StorageError> {
    let payload = bincode::encode_to_vec(records, bincode::config::standard())
        .map_err(|e| StorageError::Bincode(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(WIRE_VERSION);
    buf.extend(payload);
    Ok(buf)
}

/// Decode a wire batch. Any decode failure rejects the whole batch before a
/// single record is looked at; partial application could desynchronize
/// clocks.
pub fn decode_batch(data: &[u8]) -> Result<Vec<ChangeRecord>, StorageError> {
    match data.first().copied() {
        Some(WIRE_VERSION) => {
            bincode::decode_from_slice::<Vec<ChangeRecord>, _>(
                &data[1..],
                bincode::config::standard(),
            )
            .map(|(v, _)| v)
            .map_err(|e| StorageError::MalformedRecord(e.to_string()))
        }
        _ => Err(StorageError::MalformedRecord(
            "unknown change batch wire version".into(),
        )),
    }
}
