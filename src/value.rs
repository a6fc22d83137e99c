use bincode::{Decode, Encode};
use std::cmp::Ordering;

/// A typed column value.
///
/// Values carry a deterministic total order: first by type rank
/// (Null < Integer < Real < Text < Blob), then within the type. Reals are
/// ordered by `f64::total_cmp`, so even NaN payloads compare the same way on
/// every replica. The merge tie-break depends on this order being identical
/// everywhere.
#[derive(Clone, Debug, Encode, Decode)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Text(s.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Real(_) => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_order_numerically() {
        assert!(Value::Integer(-3) < Value::Integer(0));
        assert!(Value::Integer(4) > Value::Integer(2));
    }

    #[test]
    fn cross_type_order_is_by_rank() {
        assert!(Value::Null < Value::Integer(i64::MIN));
        assert!(Value::Integer(i64::MAX) < Value::Real(f64::NEG_INFINITY));
        assert!(Value::Real(f64::INFINITY) < Value::text(""));
        assert!(Value::Text("zzz".into()) < Value::Blob(vec![]));
    }

    #[test]
    fn reals_use_total_order() {
        assert!(Value::Real(-0.0) < Value::Real(0.0));
        assert_eq!(Value::Real(f64::NAN), Value::Real(f64::NAN));
        assert!(Value::Real(1.5) > Value::Real(1.0));
    }

    #[test]
    fn equality_matches_ordering() {
        assert_eq!(Value::text("a"), Value::Text("a".into()));
        assert_ne!(Value::Integer(1), Value::Real(1.0));
    }
}
