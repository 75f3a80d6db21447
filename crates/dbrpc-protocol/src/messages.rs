use crate::codec::{decode_row, encode_row, finish, Wire};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dbrpc_core::cursor::{FetchDirection, PositionMode};
use dbrpc_core::error::RpcError;
use dbrpc_core::token::Token;
use dbrpc_core::types::{DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value};

macro_rules! procedures {
    ($($variant:ident = $id:literal,)*) => {
        /// Procedure identifiers, fixed for protocol version 2.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Procedure {
            $($variant,)*
        }

        impl Procedure {
            pub fn id(self) -> i32 {
                match self {
                    $(Procedure::$variant => $id,)*
                }
            }

            pub fn from_id(id: i32) -> Option<Self> {
                match id {
                    $($id => Some(Procedure::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Procedure::$variant => stringify!($variant),)*
                }
            }
        }
    };
}

procedures! {
    Version = 1,
    ListDatabases = 2,
    CreateDatabase = 3,
    OpenDatabase = 4,
    CloseDatabase = 5,
    ListTables = 6,
    DescribeTable = 7,
    CreateTable = 8,
    DropTable = 9,
    GetNumRows = 10,
    OpenSelectCursor = 11,
    OpenUpdateCursor = 12,
    OpenInsertCursor = 13,
    Fetch = 14,
    CloseCursor = 15,
    Insert = 16,
    Update = 17,
    Delete = 18,
    CreateIndex = 19,
    DropIndex = 20,
    ListIndexes = 21,
    Shutdown = 99,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
    NoProcedure,
}

impl Status {
    pub fn wire_id(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Failed => 1,
            Status::NoProcedure => 2,
        }
    }

    pub fn from_wire_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Status::Ok),
            1 => Some(Status::Failed),
            2 => Some(Status::NoProcedure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorRequest {
    pub table: String,
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub position: PositionMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column: i32,
    pub value: Value,
}

impl Wire for ColumnValue {
    fn encode(&self, buf: &mut BytesMut) {
        self.column.encode(buf);
        self.value.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(ColumnValue {
            column: i32::decode(buf)?,
            value: Value::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Version,
    ListDatabases { location: String },
    CreateDatabase(DatabaseHandle),
    OpenDatabase(DatabaseHandle),
    CloseDatabase,
    ListTables,
    DescribeTable { table: String },
    CreateTable(TableDefinition),
    DropTable { table: String },
    GetNumRows { table: String },
    OpenSelectCursor(CursorRequest),
    OpenUpdateCursor(CursorRequest),
    OpenInsertCursor { table: String },
    Fetch { token: Token, direction: FetchDirection },
    CloseCursor { token: Token },
    Insert { token: Token, values: Vec<Value> },
    Update { token: Token, values: Vec<ColumnValue> },
    Delete { token: Token },
    CreateIndex(IndexInfo),
    DropIndex { name: String },
    ListIndexes { table: String },
    Shutdown,
}

impl Request {
    pub fn procedure(&self) -> Procedure {
        match self {
            Request::Version => Procedure::Version,
            Request::ListDatabases { .. } => Procedure::ListDatabases,
            Request::CreateDatabase(_) => Procedure::CreateDatabase,
            Request::OpenDatabase(_) => Procedure::OpenDatabase,
            Request::CloseDatabase => Procedure::CloseDatabase,
            Request::ListTables => Procedure::ListTables,
            Request::DescribeTable { .. } => Procedure::DescribeTable,
            Request::CreateTable(_) => Procedure::CreateTable,
            Request::DropTable { .. } => Procedure::DropTable,
            Request::GetNumRows { .. } => Procedure::GetNumRows,
            Request::OpenSelectCursor(_) => Procedure::OpenSelectCursor,
            Request::OpenUpdateCursor(_) => Procedure::OpenUpdateCursor,
            Request::OpenInsertCursor { .. } => Procedure::OpenInsertCursor,
            Request::Fetch { .. } => Procedure::Fetch,
            Request::CloseCursor { .. } => Procedure::CloseCursor,
            Request::Insert { .. } => Procedure::Insert,
            Request::Update { .. } => Procedure::Update,
            Request::Delete { .. } => Procedure::Delete,
            Request::CreateIndex(_) => Procedure::CreateIndex,
            Request::DropIndex { .. } => Procedure::DropIndex,
            Request::ListIndexes { .. } => Procedure::ListIndexes,
            Request::Shutdown => Procedure::Shutdown,
        }
    }

    /// Procedure id followed by the arguments.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.procedure().id());
        match self {
            Request::Version
            | Request::CloseDatabase
            | Request::ListTables
            | Request::Shutdown => {}
            Request::ListDatabases { location } => location.encode(buf),
            Request::CreateDatabase(handle) | Request::OpenDatabase(handle) => handle.encode(buf),
            Request::DescribeTable { table }
            | Request::DropTable { table }
            | Request::GetNumRows { table }
            | Request::OpenInsertCursor { table }
            | Request::ListIndexes { table } => table.encode(buf),
            Request::CreateTable(def) => def.encode(buf),
            Request::OpenSelectCursor(req) | Request::OpenUpdateCursor(req) => {
                req.table.encode(buf);
                req.columns.encode(buf);
                req.position.encode(buf);
            }
            Request::Fetch { token, direction } => {
                token.encode(buf);
                direction.encode(buf);
            }
            Request::CloseCursor { token } | Request::Delete { token } => token.encode(buf),
            Request::Insert { token, values } => {
                token.encode(buf);
                values.encode(buf);
            }
            Request::Update { token, values } => {
                token.encode(buf);
                values.encode(buf);
            }
            Request::CreateIndex(index) => index.encode(buf),
            Request::DropIndex { name } => name.encode(buf),
        }
    }

    /// Decode the arguments of `procedure` from the rest of a request frame.
    pub fn decode_args(procedure: Procedure, buf: &mut Bytes) -> Result<Self, RpcError> {
        let request = match procedure {
            Procedure::Version => Request::Version,
            Procedure::ListDatabases => Request::ListDatabases {
                location: String::decode(buf)?,
            },
            Procedure::CreateDatabase => Request::CreateDatabase(DatabaseHandle::decode(buf)?),
            Procedure::OpenDatabase => Request::OpenDatabase(DatabaseHandle::decode(buf)?),
            Procedure::CloseDatabase => Request::CloseDatabase,
            Procedure::ListTables => Request::ListTables,
            Procedure::DescribeTable => Request::DescribeTable {
                table: String::decode(buf)?,
            },
            Procedure::CreateTable => Request::CreateTable(TableDefinition::decode(buf)?),
            Procedure::DropTable => Request::DropTable {
                table: String::decode(buf)?,
            },
            Procedure::GetNumRows => Request::GetNumRows {
                table: String::decode(buf)?,
            },
            Procedure::OpenSelectCursor => Request::OpenSelectCursor(decode_cursor_request(buf)?),
            Procedure::OpenUpdateCursor => Request::OpenUpdateCursor(decode_cursor_request(buf)?),
            Procedure::OpenInsertCursor => Request::OpenInsertCursor {
                table: String::decode(buf)?,
            },
            Procedure::Fetch => Request::Fetch {
                token: Token::decode(buf)?,
                direction: FetchDirection::decode(buf)?,
            },
            Procedure::CloseCursor => Request::CloseCursor {
                token: Token::decode(buf)?,
            },
            Procedure::Insert => Request::Insert {
                token: Token::decode(buf)?,
                values: Vec::<Value>::decode(buf)?,
            },
            Procedure::Update => Request::Update {
                token: Token::decode(buf)?,
                values: Vec::<ColumnValue>::decode(buf)?,
            },
            Procedure::Delete => Request::Delete {
                token: Token::decode(buf)?,
            },
            Procedure::CreateIndex => Request::CreateIndex(IndexInfo::decode(buf)?),
            Procedure::DropIndex => Request::DropIndex {
                name: String::decode(buf)?,
            },
            Procedure::ListIndexes => Request::ListIndexes {
                table: String::decode(buf)?,
            },
            Procedure::Shutdown => Request::Shutdown,
        };
        finish(buf)?;
        Ok(request)
    }
}

fn decode_cursor_request(buf: &mut Bytes) -> Result<CursorRequest, RpcError> {
    Ok(CursorRequest {
        table: String::decode(buf)?,
        columns: Vec::<String>::decode(buf)?,
        position: PositionMode::decode(buf)?,
    })
}

/// Payload that follows an `Ok` status.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Unit,
    Version { protocol: i32, driver: String },
    Names(Vec<String>),
    Descriptor(RowDescriptor),
    Count(i64),
    CursorOpened { token: Token, descriptor: RowDescriptor },
    /// `None` once the cursor has no more rows in the requested direction.
    Fetched { row: Option<Row>, descriptor: RowDescriptor },
    Indexes(Vec<IndexInfo>),
}

impl Reply {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), RpcError> {
        match self {
            Reply::Unit => {}
            Reply::Version { protocol, driver } => {
                protocol.encode(buf);
                driver.encode(buf);
            }
            Reply::Names(names) => names.encode(buf),
            Reply::Descriptor(descriptor) => descriptor.encode(buf),
            Reply::Count(count) => count.encode(buf),
            Reply::CursorOpened { token, descriptor } => {
                token.encode(buf);
                descriptor.encode(buf);
            }
            Reply::Fetched { row, descriptor } => match row {
                Some(row) => {
                    true.encode(buf);
                    encode_row(row, descriptor, buf)?;
                }
                None => false.encode(buf),
            },
            Reply::Indexes(indexes) => indexes.encode(buf),
        }
        Ok(())
    }

    /// Decode the payload answering `procedure`. Fetch replies need the
    /// descriptor the cursor was opened with.
    pub fn decode(
        procedure: Procedure,
        buf: &mut Bytes,
        descriptor: Option<&RowDescriptor>,
    ) -> Result<Self, RpcError> {
        let reply = match procedure {
            Procedure::Version => Reply::Version {
                protocol: i32::decode(buf)?,
                driver: String::decode(buf)?,
            },
            Procedure::ListDatabases | Procedure::ListTables => {
                Reply::Names(Vec::<String>::decode(buf)?)
            }
            Procedure::DescribeTable => Reply::Descriptor(RowDescriptor::decode(buf)?),
            Procedure::GetNumRows => Reply::Count(i64::decode(buf)?),
            Procedure::OpenSelectCursor
            | Procedure::OpenUpdateCursor
            | Procedure::OpenInsertCursor => Reply::CursorOpened {
                token: Token::decode(buf)?,
                descriptor: RowDescriptor::decode(buf)?,
            },
            Procedure::Fetch => {
                let descriptor = descriptor
                    .ok_or_else(|| RpcError::protocol("fetch reply decoded without descriptor"))?;
                let row = if bool::decode(buf)? {
                    Some(decode_row(buf, descriptor)?)
                } else {
                    None
                };
                Reply::Fetched {
                    row,
                    descriptor: descriptor.clone(),
                }
            }
            Procedure::ListIndexes => Reply::Indexes(Vec::<IndexInfo>::decode(buf)?),
            Procedure::CreateDatabase
            | Procedure::OpenDatabase
            | Procedure::CloseDatabase
            | Procedure::CreateTable
            | Procedure::DropTable
            | Procedure::CloseCursor
            | Procedure::Insert
            | Procedure::Update
            | Procedure::Delete
            | Procedure::CreateIndex
            | Procedure::DropIndex
            | Procedure::Shutdown => Reply::Unit,
        };
        finish(buf)?;
        Ok(reply)
    }
}

/// Read the status word that opens every reply frame.
pub fn decode_status(buf: &mut Bytes) -> Result<Status, RpcError> {
    if buf.remaining() < 4 {
        return Err(RpcError::protocol("reply frame too short for status"));
    }
    let id = buf.get_i32();
    Status::from_wire_id(id).ok_or_else(|| RpcError::protocol(format!("unknown status {id}")))
}
