use dbrpc_core::cursor::{AccessMode, CursorMode, PositionMode, UpdateColumns};
use dbrpc_core::error::RpcError;
use dbrpc_core::token::Token;
use dbrpc_core::types::{Row, RowDescriptor, Value};
use uuid::Uuid;

/// Client handle to a cursor living in the driver. Holds the token, the
/// descriptor fixed at open time, the last fetched row and the column
/// update flags. The position itself is only known to the driver.
#[derive(Debug)]
pub struct Cursor {
    session_id: Uuid,
    token: Token,
    descriptor: RowDescriptor,
    mode: CursorMode,
    updates: UpdateColumns,
    row: Option<Row>,
}

impl Cursor {
    pub(crate) fn new(session_id: Uuid, token: Token, descriptor: RowDescriptor, mode: CursorMode) -> Self {
        let updates = UpdateColumns::new(mode, descriptor.len());
        Self {
            session_id,
            token,
            descriptor,
            mode,
            updates,
            row: None,
        }
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub(crate) fn mode(&self) -> CursorMode {
        self.mode
    }

    pub(crate) fn flagged_columns(&self) -> Vec<usize> {
        self.updates.flagged()
    }

    pub(crate) fn set_row(&mut self, row: Option<Row>) {
        self.row = row;
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn descriptor(&self) -> &RowDescriptor {
        &self.descriptor
    }

    pub fn access(&self) -> AccessMode {
        self.mode.access
    }

    pub fn position_mode(&self) -> PositionMode {
        self.mode.position_mode
    }

    /// The row produced by the last successful fetch.
    pub fn current_row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, RpcError> {
        self.descriptor()
            .position(name)
            .ok_or_else(|| RpcError::NoSuchColumn(name.to_string()))
    }

    /// Change a value of the current row locally. Nothing reaches the
    /// driver until the column is flagged and the row is updated.
    pub fn set_value(&mut self, column: usize, value: Value) -> Result<(), RpcError> {
        let col = self
            .descriptor
            .column(column)
            .ok_or_else(|| RpcError::NoSuchColumn(format!("#{column}")))?;
        if !col.accepts(&value) {
            return Err(RpcError::RowMismatch(format!(
                "column {} cannot hold {value:?}",
                col.name
            )));
        }
        let row = self
            .row
            .as_mut()
            .ok_or(RpcError::NoCurrentRow("set_value"))?;
        row.values[column] = value;
        Ok(())
    }

    pub fn set_column_for_update(&mut self, column: usize) -> Result<(), RpcError> {
        self.updates.set(column)
    }

    pub fn unset_column_for_update(&mut self, column: usize) -> Result<(), RpcError> {
        self.updates.unset(column)
    }

    pub fn is_column_for_update(&self, column: usize) -> bool {
        self.updates.is_set(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrpc_core::types::{Column, ColumnType};

    fn update_cursor() -> Cursor {
        let descriptor = RowDescriptor::new(vec![
            Column::new("cat", ColumnType::Integer).not_null(),
            Column::new("label", ColumnType::Text),
        ]);
        Cursor::new(
            Uuid::new_v4(),
            Token::from_raw(0),
            descriptor,
            CursorMode::new(AccessMode::Update, PositionMode::ForwardOnly),
        )
    }

    #[test]
    fn set_value_needs_a_row_and_a_matching_type() {
        let mut cursor = update_cursor();
        assert!(matches!(
            cursor.set_value(1, Value::Text("a".into())),
            Err(RpcError::NoCurrentRow("set_value"))
        ));
        cursor.set_row(Some(Row::new(vec![Value::Integer(1), Value::Null])));
        cursor.set_value(1, Value::Text("a".into())).expect("set");
        assert!(matches!(
            cursor.set_value(0, Value::Null),
            Err(RpcError::RowMismatch(_))
        ));
        assert!(matches!(
            cursor.set_value(5, Value::Null),
            Err(RpcError::NoSuchColumn(_))
        ));
        assert_eq!(
            cursor.current_row().map(|r| r.values[1].clone()),
            Some(Value::Text("a".into()))
        );
    }

    #[test]
    fn flags_do_not_touch_the_row() {
        let mut cursor = update_cursor();
        let row = Row::new(vec![Value::Integer(1), Value::Text("x".into())]);
        cursor.set_row(Some(row.clone()));
        let label = cursor.column_index("label").expect("column");
        cursor.set_column_for_update(label).expect("flag");
        assert!(cursor.is_column_for_update(label));
        assert_eq!(cursor.current_row(), Some(&row));
        assert!(cursor.column_index("missing").is_err());
    }
}
