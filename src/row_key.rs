use smallvec::SmallVec;

use crate::storage_error::StorageError;
use crate::value::Value;

/// Canonical byte encoding of a primary-key tuple.
///
/// Values are encoded in pk-definition order with a leading type tag each, so
/// two replicas always produce identical bytes for the same logical key
/// regardless of how the write listed its columns. Integers and reals use an
/// order-preserving big-endian transform; the raw bytes double as a stable
/// sort key for change-record export.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct RowKey(Vec<u8>);

const TAG_NULL: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_REAL: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_BLOB: u8 = 0x05;

impl RowKey {
    pub fn from_values(values: &[Value]) -> Self {
        let mut buf = Vec::with_capacity(values.len() * 9);
        for v in values {
            match v {
                Value::Null => buf.push(TAG_NULL),
                Value::Integer(i) => {
                    buf.push(TAG_INTEGER);
                    // flip the sign bit so byte order matches numeric order
                    buf.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
                }
                Value::Real(f) => {
                    buf.push(TAG_REAL);
                    let bits = f.to_bits();
                    let ordered = if bits >> 63 == 0 {
                        bits ^ (1 << 63)
                    } else {
                        !bits
                    };
                    buf.extend_from_slice(&ordered.to_be_bytes());
                }
                Value::Text(s) => {
                    buf.push(TAG_TEXT);
                    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
                Value::Blob(b) => {
                    buf.push(TAG_BLOB);
                    buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
                    buf.extend_from_slice(b);
                }
            }
        }
        RowKey(buf)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        RowKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Decode back into the pk value tuple. Pk tuples are short, hence the
    /// inline small vector.
    pub fn decode(&self) -> Result<SmallVec<[Value; 4]>, StorageError> {
        let mut out: SmallVec<[Value; 4]> = SmallVec::new();
        let b = &self.0;
        let mut i = 0usize;
        while i < b.len() {
            let tag = b[i];
            i += 1;
            match tag {
                TAG_NULL => out.push(Value::Null),
                TAG_INTEGER => {
                    let raw = Self::take8(b, &mut i)?;
                    out.push(Value::Integer((u64::from_be_bytes(raw) ^ (1 << 63)) as i64));
                }
                TAG_REAL => {
                    let raw = Self::take8(b, &mut i)?;
                    let ordered = u64::from_be_bytes(raw);
                    let bits = if ordered >> 63 == 1 {
                        ordered ^ (1 << 63)
                    } else {
                        !ordered
                    };
                    out.push(Value::Real(f64::from_bits(bits)));
                }
                TAG_TEXT | TAG_BLOB => {
                    if i + 4 > b.len() {
                        return Err(StorageError::MalformedRecord("truncated row key".into()));
                    }
                    let mut len_raw = [0u8; 4];
                    len_raw.copy_from_slice(&b[i..i + 4]);
                    i += 4;
                    let len = u32::from_be_bytes(len_raw) as usize;
                    if i + len > b.len() {
                        return Err(StorageError::MalformedRecord("truncated row key".into()));
                    }
                    let body = b[i..i + len].to_vec();
                    i += len;
                    if tag == TAG_TEXT {
                        let s = String::from_utf8(body).map_err(|e| {
                            StorageError::MalformedRecord(format!("row key text: {}", e))
                        })?;
                        out.push(Value::Text(s));
                    } else {
                        out.push(Value::Blob(body));
                    }
                }
                other => {
                    return Err(StorageError::MalformedRecord(format!(
                        "unknown row key tag {:#04x}",
                        other
                    )));
                }
            }
        }
        Ok(out)
    }

    fn take8(b: &[u8], i: &mut usize) -> Result<[u8; 8], StorageError> {
        if *i + 8 > b.len() {
            return Err(StorageError::MalformedRecord("truncated row key".into()));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b[*i..*i + 8]);
        *i += 8;
        Ok(raw)
    }
}

impl AsRef<[u8]> for RowKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
