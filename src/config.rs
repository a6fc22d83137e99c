use redb::ReadableTable;

use crate::storage_error::StorageError;

/// When enabled, a merge that ties on both column version and value is
/// resolved by site id instead of keeping the first writer. Off by default.
/// Read inside the merge transaction, never cached across merges.
pub const MERGE_EQUAL_VALUES: &str = "merge-equal-values";

pub const KNOWN_KEYS: &[&str] = &[MERGE_EQUAL_VALUES];

pub fn is_known_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key)
}

pub fn encode_flag(on: bool) -> Vec<u8> {
    vec![u8::from(on)]
}

pub fn get_flag<T>(table: &T, key: &str) -> Result<bool, StorageError>
where
    T: ReadableTable<&'static [u8], Vec<u8>>,
{
    let got = table
        .get(key.as_bytes())
        .map_err(|e| StorageError::Other(e.to_string()))?;
    Ok(match got {
        Some(v) => v.value().first().copied() == Some(1),
        None => false,
    })
}
