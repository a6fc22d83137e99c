use redb::TableDefinition;

/// Engine-internal tables. User relations must not collide with these, so
/// `create_table` rejects names starting with the reserved prefix.
pub const RESERVED_PREFIX: &str = "__convergedb";

/// Suffixes that derive a relation's clock tables from its name. A relation
/// named `item__row_clock` would shadow the clock table of `item`, so names
/// ending in either suffix are rejected at creation.
pub const ROW_CLOCK_SUFFIX: &str = "__row_clock";
pub const COL_CLOCK_SUFFIX: &str = "__col_clock";

/// Whether a relation name would collide with an engine-internal table or a
/// derived clock table.
pub fn name_is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
        || name.ends_with(ROW_CLOCK_SUFFIX)
        || name.ends_with(COL_CLOCK_SUFFIX)
}

pub const META_TABLE_NAME: &str = "__convergedb_meta";
pub const SCHEMA_TABLE_NAME: &str = "__convergedb_schema";
pub const CONFIG_TABLE_NAME: &str = "__convergedb_config";

pub static META_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new(META_TABLE_NAME);
pub static SCHEMA_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new(SCHEMA_TABLE_NAME);
pub static CONFIG_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new(CONFIG_TABLE_NAME);

/// Definition for a table addressed by its runtime name (user relations and
/// their clock tables).
pub fn dyn_table(name: &str) -> TableDefinition<'_, &'static [u8], Vec<u8>> {
    TableDefinition::new(name)
}

/// Physical redb table holding a relation's rows, keyed by canonical RowKey
/// bytes.
pub fn rows_table_name(table: &str) -> String {
    table.to_string()
}

/// Per-row clocks: causal length plus the local export stamp.
pub fn row_clock_table_name(table: &str) -> String {
    format!("{table}__row_clock")
}

/// Per-(row, column) clocks, keyed by RowKey bytes followed by the big-endian
/// ColId. Absence of an entry is the load-bearing "no clock" state.
pub fn col_clock_table_name(table: &str) -> String {
    format!("{table}__col_clock")
}
