pub mod changes;
pub mod clock_store;
pub mod config;
pub mod database;
pub mod merge;
pub mod meta;
pub mod plugins;
pub mod row_key;
pub mod rows;
pub mod schema;
pub mod site_id;
pub mod storage_error;
pub mod tables;
pub mod value;
pub use database::*;

pub use redb::TableDefinition;

#[cfg(test)]
pub mod tests;
