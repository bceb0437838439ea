//! Query execution layer
//!
//! Everything between a validated SQL string and a set of JSON rows: the
//! sandbox gate, the live schema-context provider, and the executor seam
//! the orchestrator calls through (mockable in tests).

pub mod context;
pub mod executor;
pub mod sandbox;

pub use context::{ContextProvider, SchemaContextProvider};
pub use executor::{PgQueryExecutor, QueryExecutor};

/// One result row: column name to JSON value. Column order is carried
/// separately on [`QueryResult`] because the map does not preserve it.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a sandboxed query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names in the order the database returned them.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
