//! Table storage shared by the reference engines. One `Database` holds its
//! tables and indexes in memory; engines decide where it comes from and
//! whether it is written back.

use crate::backend::{ResultSet, RowId};
use dbrpc_core::error::RpcError;
use dbrpc_core::types::{IndexInfo, Row, RowDescriptor, TableDefinition, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub descriptor: RowDescriptor,
    pub rows: BTreeMap<RowId, Row>,
    pub next_row_id: RowId,
}

impl Table {
    pub fn new(descriptor: RowDescriptor) -> Self {
        Self {
            descriptor,
            rows: BTreeMap::new(),
            next_row_id: 1,
        }
    }

    /// JSON has one number type; bring integers stored in double columns
    /// back to the column's type.
    pub fn normalize(&mut self) -> Result<(), RpcError> {
        for row in self.rows.values_mut() {
            for (column, value) in self.descriptor.columns.iter().zip(row.values.iter_mut()) {
                if let (dbrpc_core::types::ColumnType::Double, Value::Integer(v)) =
                    (column.column_type, &*value)
                {
                    *value = Value::Double(*v as f64);
                }
            }
            self.descriptor.check_row(row)?;
        }
        if let Some((&last, _)) = self.rows.last_key_value() {
            self.next_row_id = self.next_row_id.max(last + 1);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    pub tables: BTreeMap<String, Table>,
    pub indexes: BTreeMap<String, IndexInfo>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Result<&Table, RpcError> {
        self.tables
            .get(name)
            .ok_or_else(|| RpcError::Backend(format!("no such table: {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, RpcError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| RpcError::Backend(format!("no such table: {name}")))
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn describe_table(&self, name: &str) -> Result<RowDescriptor, RpcError> {
        Ok(self.table(name)?.descriptor.clone())
    }

    pub fn create_table(&mut self, def: &TableDefinition) -> Result<(), RpcError> {
        if def.name.is_empty() {
            return Err(RpcError::Backend("table name is empty".into()));
        }
        if self.tables.contains_key(&def.name) {
            return Err(RpcError::Backend(format!("table already exists: {}", def.name)));
        }
        if def.descriptor.is_empty() {
            return Err(RpcError::Backend(format!("table {} has no columns", def.name)));
        }
        for (i, column) in def.descriptor.columns.iter().enumerate() {
            if def.descriptor.position(&column.name) != Some(i) {
                return Err(RpcError::Backend(format!("duplicate column: {}", column.name)));
            }
        }
        self.tables
            .insert(def.name.clone(), Table::new(def.descriptor.clone()));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), RpcError> {
        self.tables
            .remove(name)
            .ok_or_else(|| RpcError::Backend(format!("no such table: {name}")))?;
        self.indexes.retain(|_, index| index.table != name);
        Ok(())
    }

    pub fn num_rows(&self, name: &str) -> Result<i64, RpcError> {
        Ok(self.table(name)?.rows.len() as i64)
    }

    pub fn select(&self, name: &str) -> Result<ResultSet, RpcError> {
        let table = self.table(name)?;
        Ok(ResultSet {
            descriptor: table.descriptor.clone(),
            rows: table.rows.iter().map(|(id, row)| (*id, row.clone())).collect(),
        })
    }

    pub fn insert_row(&mut self, name: &str, row: Row) -> Result<RowId, RpcError> {
        let table = self.table(name)?;
        table.descriptor.check_row(&row)?;
        self.check_unique(name, None, &row)?;
        let table = self.table_mut(name)?;
        let id = table.next_row_id;
        table.next_row_id += 1;
        table.rows.insert(id, row);
        Ok(id)
    }

    pub fn update_row(&mut self, name: &str, id: RowId, values: &[(usize, Value)]) -> Result<(), RpcError> {
        let table = self.table(name)?;
        let mut row = table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| RpcError::Backend(format!("row {id} of {name} no longer exists")))?;
        for (column, value) in values {
            let slot = row
                .values
                .get_mut(*column)
                .ok_or_else(|| RpcError::NoSuchColumn(format!("#{column}")))?;
            *slot = value.clone();
        }
        table.descriptor.check_row(&row)?;
        self.check_unique(name, Some(id), &row)?;
        self.table_mut(name)?.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_row(&mut self, name: &str, id: RowId) -> Result<(), RpcError> {
        self.table_mut(name)?
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RpcError::Backend(format!("row {id} of {name} no longer exists")))
    }

    pub fn create_index(&mut self, index: &IndexInfo) -> Result<(), RpcError> {
        if self.indexes.contains_key(&index.name) {
            return Err(RpcError::Backend(format!("index already exists: {}", index.name)));
        }
        if index.columns.is_empty() {
            return Err(RpcError::Backend(format!("index {} has no columns", index.name)));
        }
        let table = self.table(&index.table)?;
        let (_, positions) = table.descriptor.project(&index.columns)?;
        if index.unique {
            let mut seen = std::collections::HashSet::new();
            for key in table.rows.values().filter_map(|row| index_key(row, &positions)) {
                if !seen.insert(key) {
                    return Err(RpcError::Backend(format!(
                        "existing rows violate unique index {}",
                        index.name
                    )));
                }
            }
        }
        self.indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<(), RpcError> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RpcError::Backend(format!("no such index: {name}")))
    }

    pub fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, RpcError> {
        self.table(table)?;
        Ok(self
            .indexes
            .values()
            .filter(|index| index.table == table)
            .cloned()
            .collect())
    }

    fn check_unique(&self, name: &str, skip: Option<RowId>, candidate: &Row) -> Result<(), RpcError> {
        let table = self.table(name)?;
        for index in self.indexes.values().filter(|i| i.unique && i.table == name) {
            let (_, positions) = table.descriptor.project(&index.columns)?;
            let Some(key) = index_key(candidate, &positions) else {
                continue;
            };
            let clash = table
                .rows
                .iter()
                .filter(|(id, _)| Some(**id) != skip)
                .any(|(_, row)| index_key(row, &positions).as_ref() == Some(&key));
            if clash {
                return Err(RpcError::Backend(format!(
                    "duplicate key for unique index {}",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

/// Key of `row` under an index, or `None` when any key column is NULL.
/// NULL never equals anything, so such rows are outside every unique check.
/// Doubles compare by bit pattern so the key can be hashed.
fn index_key(row: &Row, positions: &[usize]) -> Option<Vec<String>> {
    positions
        .iter()
        .map(|&i| match row.get(i)? {
            Value::Null => None,
            Value::Integer(v) => Some(format!("i{v}")),
            Value::Double(v) => Some(format!("d{:x}", v.to_bits())),
            Value::Text(v) => Some(format!("t{v}")),
        })
        .collect()
}
