use bincode::{Decode, Encode};
use redb::ReadableTable;

use crate::schema::ColId;
use crate::site_id::SiteId;
use crate::storage_error::StorageError;

/// Per-row causal state. The causal length increments on every creation and
/// every deletion of the row, never on plain column updates, and never
/// resets: odd means alive, even means tombstoned. The remaining fields are
/// the local export stamp for the row's sentinel record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RowClock {
    pub causal_length: u64,
    pub db_version: u64,
    pub seq: u64,
    pub site_id: SiteId,
}

impl RowClock {
    pub fn is_live(&self) -> bool {
        self.causal_length % 2 == 1
    }
}

/// Per-(row, column) causal state. A column slot is tri-state: no entry at
/// all carries no causal information and always loses to an explicit write;
/// this is distinct from any stored version, including the lowest one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ColumnClock {
    pub col_version: u64,
    pub db_version: u64,
    pub seq: u64,
    pub site_id: SiteId,
}

pub fn encode_row_clock(c: &RowClock) -> Result<Vec<u8>, StorageError> {
    versioned(bincode::encode_to_vec(c, bincode::config::standard()))
}

pub fn decode_row_clock(data: &[u8]) -> Result<RowClock, StorageError> {
    match data.first().copied() {
        Some(0) => bincode::decode_from_slice(&data[1..], bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| StorageError::Bincode(e.to_string())),
        _ => Err(StorageError::Bincode("bad row clock version".into())),
    }
}

pub fn encode_col_clock(c: &ColumnClock) -> Result<Vec<u8>, StorageError> {
    versioned(bincode::encode_to_vec(c, bincode::config::standard()))
}

pub fn decode_col_clock(data: &[u8]) -> Result<ColumnClock, StorageError> {
    match data.first().copied() {
        Some(0) => bincode::decode_from_slice(&data[1..], bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| StorageError::Bincode(e.to_string())),
        _ => Err(StorageError::Bincode("bad column clock version".into())),
    }
}

fn versioned(payload: Result<Vec<u8>, bincode::error::EncodeError>) -> Result<Vec<u8>, StorageError> {
    let payload = payload.map_err(|e| StorageError::Bincode(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(0u8);
    buf.extend(payload);
    Ok(buf)
}

/// Column clock entries are keyed by the row key followed by the fixed-width
/// big-endian ColId, so one row's slots are contiguous and in column-id
/// order.
pub fn col_clock_key(row_key: &[u8], col: ColId) -> Vec<u8> {
    let mut k = Vec::with_capacity(row_key.len() + 4);
    k.extend_from_slice(row_key);
    k.extend_from_slice(&col.to_be_bytes());
    k
}

pub fn split_col_clock_key(key: &[u8]) -> Result<(&[u8], ColId), StorageError> {
    if key.len() < 4 {
        return Err(StorageError::Other("short column clock key".into()));
    }
    let (row, id_raw) = key.split_at(key.len() - 4);
    let mut raw = [0u8; 4];
    raw.copy_from_slice(id_raw);
    Ok((row, ColId::from_be_bytes(raw)))
}

pub fn get_row_clock<T>(table: &T, row_key: &[u8]) -> Result<Option<RowClock>, StorageError>
where
    T: ReadableTable<&'static [u8], Vec<u8>>,
{
    let got = table
        .get(row_key)
        .map_err(|e| StorageError::Other(e.to_string()))?;
    match got {
        Some(v) => Ok(Some(decode_row_clock(&v.value())?)),
        None => Ok(None),
    }
}

pub fn get_col_clock<T>(
    table: &T,
    row_key: &[u8],
    col: ColId,
) -> Result<Option<ColumnClock>, StorageError>
where
    T: ReadableTable<&'static [u8], Vec<u8>>,
{
    let key = col_clock_key(row_key, col);
    let got = table
        .get(key.as_slice())
        .map_err(|e| StorageError::Other(e.to_string()))?;
    match got {
        Some(v) => Ok(Some(decode_col_clock(&v.value())?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causal_length_parity_encodes_liveness() {
        let site = SiteId::from_bytes([1; 16]);
        let alive = RowClock {
            causal_length: 3,
            db_version: 5,
            seq: 0,
            site_id: site,
        };
        let dead = RowClock {
            causal_length: 4,
            ..alive
        };
        assert!(alive.is_live());
        assert!(!dead.is_live());
    }

    #[test]
    fn clocks_round_trip() {
        let site = SiteId::from_bytes([7; 16]);
        let rc = RowClock {
            causal_length: 2,
            db_version: 9,
            seq: 3,
            site_id: site,
        };
        assert_eq!(decode_row_clock(&encode_row_clock(&rc).unwrap()).unwrap(), rc);

        let cc = ColumnClock {
            col_version: 11,
            db_version: 4,
            seq: 1,
            site_id: site,
        };
        assert_eq!(decode_col_clock(&encode_col_clock(&cc).unwrap()).unwrap(), cc);
    }

    #[test]
    fn col_clock_keys_split_back() {
        let key = col_clock_key(b"rowkey", 42);
        let (row, col) = split_col_clock_key(&key).unwrap();
        assert_eq!(row, b"rowkey");
        assert_eq!(col, 42);
    }

    #[test]
    fn col_clock_keys_sort_by_column_within_row() {
        let a = col_clock_key(b"r", 1);
        let b = col_clock_key(b"r", 2);
        assert!(a < b);
    }
}
