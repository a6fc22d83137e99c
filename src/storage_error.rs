#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Bincode(String),
    NotFound,

    /// Change record or local write addresses a table this replica does not know.
    UnknownTable(String),
    /// Change record or local write addresses a column the current schema
    /// cannot resolve.
    UnknownColumn {
        table: String,
        column: String,
    },
    /// The table exists but has not been marked as tracked.
    Untracked(String),
    PkArityMismatch {
        table: String,
        expected: usize,
        got: usize,
    },

    /// A wire batch failed to decode, or a record carries a structurally
    /// impossible field. The whole batch is rejected before any state moves.
    MalformedRecord(String),
    /// Causal length or column version would move backward, or a record
    /// carries a zero clock. Never coerced silently.
    ClockRegression(String),

    /// A schema bracket is open on this table; writes are suspended.
    AlterInProgress(String),
    /// `commit_alter` without a matching `begin_alter`.
    NoAlterInProgress(String),

    UnknownConfigKey(String),

    Other(String),
}

impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::Io(e) => StorageError::Io(std::io::Error::new(e.kind(), e.to_string())),
            StorageError::Bincode(s) => StorageError::Bincode(s.clone()),
            StorageError::NotFound => StorageError::NotFound,
            StorageError::UnknownTable(t) => StorageError::UnknownTable(t.clone()),
            StorageError::UnknownColumn { table, column } => StorageError::UnknownColumn {
                table: table.clone(),
                column: column.clone(),
            },
            StorageError::Untracked(t) => StorageError::Untracked(t.clone()),
            StorageError::PkArityMismatch {
                table,
                expected,
                got,
            } => StorageError::PkArityMismatch {
                table: table.clone(),
                expected: *expected,
                got: *got,
            },
            StorageError::MalformedRecord(s) => StorageError::MalformedRecord(s.clone()),
            StorageError::ClockRegression(s) => StorageError::ClockRegression(s.clone()),
            StorageError::AlterInProgress(t) => StorageError::AlterInProgress(t.clone()),
            StorageError::NoAlterInProgress(t) => StorageError::NoAlterInProgress(t.clone()),
            StorageError::UnknownConfigKey(k) => StorageError::UnknownConfigKey(k.clone()),
            StorageError::Other(s) => StorageError::Other(s.clone()),
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Bincode(e) => write!(f, "Serialization error: {}", e),
            StorageError::NotFound => write!(f, "Entity not found"),
            StorageError::UnknownTable(t) => write!(f, "Unknown table: {}", t),
            StorageError::UnknownColumn { table, column } => {
                write!(f, "Unknown column {}.{}", table, column)
            }
            StorageError::Untracked(t) => write!(f, "Table is not tracked: {}", t),
            StorageError::PkArityMismatch {
                table,
                expected,
                got,
            } => write!(
                f,
                "Primary key arity mismatch on {}: expected {}, got {}",
                table, expected, got
            ),
            StorageError::MalformedRecord(s) => write!(f, "Malformed change record: {}", s),
            StorageError::ClockRegression(s) => write!(f, "Clock invariant violated: {}", s),
            StorageError::AlterInProgress(t) => write!(f, "Alter in progress on {}", t),
            StorageError::NoAlterInProgress(t) => write!(f, "No alter in progress on {}", t),
            StorageError::UnknownConfigKey(k) => write!(f, "Unknown config key: {}", k),
            StorageError::Other(e) => write!(f, "Other: {}", e),
        }
    }
}
impl std::error::Error for StorageError {}
impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}
