use crate::error::RpcError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Double,
    Text,
}

impl ColumnType {
    pub fn wire_id(self) -> i32 {
        match self {
            ColumnType::Integer => 1,
            ColumnType::Double => 2,
            ColumnType::Text => 3,
        }
    }

    pub fn from_wire_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(ColumnType::Integer),
            2 => Some(ColumnType::Double),
            3 => Some(ColumnType::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `None` for `Null`, which fits any nullable column.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Text(_) => Some(ColumnType::Text),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match value.column_type() {
            None => self.nullable,
            Some(ty) => ty == self.column_type,
        }
    }
}

/// Ordered, named, typed columns of a result. Established when a cursor is
/// opened and used to decode every row fetched through it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RowDescriptor {
    pub columns: Vec<Column>,
}

impl RowDescriptor {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Narrow the descriptor to `names`, in that order. An empty list keeps
    /// every column.
    pub fn project(&self, names: &[String]) -> Result<(RowDescriptor, Vec<usize>), RpcError> {
        if names.is_empty() {
            return Ok((self.clone(), (0..self.len()).collect()));
        }
        let mut columns = Vec::with_capacity(names.len());
        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            let idx = self
                .position(name)
                .ok_or_else(|| RpcError::NoSuchColumn(name.clone()))?;
            columns.push(self.columns[idx].clone());
            indexes.push(idx);
        }
        Ok((RowDescriptor { columns }, indexes))
    }

    pub fn check_row(&self, row: &Row) -> Result<(), RpcError> {
        if row.values.len() != self.columns.len() {
            return Err(RpcError::RowMismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                row.values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(&row.values) {
            if !column.accepts(value) {
                return Err(RpcError::RowMismatch(format!(
                    "column {} cannot hold {:?}",
                    column.name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn project(&self, indexes: &[usize]) -> Row {
        Row {
            values: indexes
                .iter()
                .map(|&i| self.values.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub name: String,
    /// Relative to the driver's workspace. Empty means the workspace root.
    pub location: String,
}

impl DatabaseHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: String::new(),
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub descriptor: RowDescriptor,
}
