use crate::backend::{no_database, DriverBackend, ResultSet, RowId};
use crate::store::Database;
use dbrpc_core::error::RpcError;
use dbrpc_core::types::{DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value};
use std::collections::BTreeMap;

/// Databases that live only as long as the driver process. Supports
/// scrollable cursors.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    databases: BTreeMap<(String, String), Database>,
    current: Option<(String, String)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn db(&self) -> Result<&Database, RpcError> {
        self.current
            .as_ref()
            .and_then(|key| self.databases.get(key))
            .ok_or_else(no_database)
    }

    fn db_mut(&mut self) -> Result<&mut Database, RpcError> {
        let key = self.current.as_ref().ok_or_else(no_database)?;
        self.databases.get_mut(key).ok_or_else(no_database)
    }
}

fn key(handle: &DatabaseHandle) -> (String, String) {
    (handle.location.clone(), handle.name.clone())
}

impl DriverBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_scrolling(&self) -> bool {
        true
    }

    fn list_databases(&self, location: &str) -> Result<Vec<String>, RpcError> {
        Ok(self
            .databases
            .keys()
            .filter(|(loc, _)| loc == location)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn create_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        if handle.name.is_empty() {
            return Err(RpcError::Backend("database name is empty".into()));
        }
        let key = key(handle);
        if self.databases.contains_key(&key) {
            return Err(RpcError::Backend(format!("database already exists: {}", handle.name)));
        }
        self.databases.insert(key, Database::new());
        Ok(())
    }

    fn open_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        let key = key(handle);
        if !self.databases.contains_key(&key) {
            return Err(RpcError::Backend(format!("no such database: {}", handle.name)));
        }
        self.current = Some(key);
        Ok(())
    }

    fn close_database(&mut self) -> Result<(), RpcError> {
        self.current.take().map(|_| ()).ok_or_else(no_database)
    }

    fn list_tables(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.db()?.list_tables())
    }

    fn describe_table(&self, table: &str) -> Result<RowDescriptor, RpcError> {
        self.db()?.describe_table(table)
    }

    fn create_table(&mut self, definition: &TableDefinition) -> Result<(), RpcError> {
        self.db_mut()?.create_table(definition)
    }

    fn drop_table(&mut self, table: &str) -> Result<(), RpcError> {
        self.db_mut()?.drop_table(table)
    }

    fn num_rows(&self, table: &str) -> Result<i64, RpcError> {
        self.db()?.num_rows(table)
    }

    fn select(&self, table: &str) -> Result<ResultSet, RpcError> {
        self.db()?.select(table)
    }

    fn insert_row(&mut self, table: &str, row: Row) -> Result<RowId, RpcError> {
        self.db_mut()?.insert_row(table, row)
    }

    fn update_row(&mut self, table: &str, id: RowId, values: &[(usize, Value)]) -> Result<(), RpcError> {
        self.db_mut()?.update_row(table, id, values)
    }

    fn delete_row(&mut self, table: &str, id: RowId) -> Result<(), RpcError> {
        self.db_mut()?.delete_row(table, id)
    }

    fn create_index(&mut self, index: &IndexInfo) -> Result<(), RpcError> {
        self.db_mut()?.create_index(index)
    }

    fn drop_index(&mut self, name: &str) -> Result<(), RpcError> {
        self.db_mut()?.drop_index(name)
    }

    fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, RpcError> {
        self.db()?.list_indexes(table)
    }
}
