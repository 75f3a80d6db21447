use dbrpc_core::error::RpcError;
use dbrpc_core::types::{DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value};

/// Engine-assigned identity of a stored row, stable for the row's lifetime.
pub type RowId = u64;

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub descriptor: RowDescriptor,
    pub rows: Vec<(RowId, Row)>,
}

/// What a storage engine must provide for the dispatcher to serve it.
///
/// Table operations act on the open database and fail when none is open.
/// Column positions in `update_row` index the table's full descriptor.
pub trait DriverBackend: Send {
    fn name(&self) -> &'static str;

    /// Whether result sets can be walked in any direction.
    fn supports_scrolling(&self) -> bool;

    fn list_databases(&self, location: &str) -> Result<Vec<String>, RpcError>;
    fn create_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError>;
    fn open_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError>;
    fn close_database(&mut self) -> Result<(), RpcError>;

    fn list_tables(&self) -> Result<Vec<String>, RpcError>;
    fn describe_table(&self, table: &str) -> Result<RowDescriptor, RpcError>;
    fn create_table(&mut self, definition: &TableDefinition) -> Result<(), RpcError>;
    fn drop_table(&mut self, table: &str) -> Result<(), RpcError>;
    fn num_rows(&self, table: &str) -> Result<i64, RpcError>;

    fn select(&self, table: &str) -> Result<ResultSet, RpcError>;
    fn insert_row(&mut self, table: &str, row: Row) -> Result<RowId, RpcError>;
    fn update_row(&mut self, table: &str, id: RowId, values: &[(usize, Value)]) -> Result<(), RpcError>;
    fn delete_row(&mut self, table: &str, id: RowId) -> Result<(), RpcError>;

    fn create_index(&mut self, index: &IndexInfo) -> Result<(), RpcError>;
    fn drop_index(&mut self, name: &str) -> Result<(), RpcError>;
    fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, RpcError>;
}

pub(crate) fn no_database() -> RpcError {
    RpcError::Backend("no database is open".into())
}
