pub mod cursor;
pub mod error;
pub mod token;
pub mod types;

pub use cursor::{
    AccessMode, CursorMode, CursorState, FetchDirection, Position, PositionMode, UpdateColumns,
};
pub use error::{ErrorCategory, RpcError};
pub use token::{Token, TokenTable};
pub use types::{
    Column, ColumnType, DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value,
};
