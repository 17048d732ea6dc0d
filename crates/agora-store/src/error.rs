//! Error types for the store.

use thiserror::Error;

/// Errors surfaced while applying push events to the cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row payload failed to decode as the entity its table implies.
    #[error("failed to decode {table} row: {source}")]
    RowDecode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    /// A delete event's payload did not carry enough of the old row to
    /// identify what was deleted.
    #[error("delete event for {table} does not identify a row")]
    IncompleteDelete { table: String },
}
