use crate::backend::{DriverBackend, RowId};
use dbrpc_core::cursor::{AccessMode, CursorState, FetchDirection, PositionMode};
use dbrpc_core::error::RpcError;
use dbrpc_core::token::{Token, TokenTable};
use dbrpc_core::types::{Row, Value};
use dbrpc_protocol::backend::{recv_request, send_reply, send_status, write_handshake, Incoming};
use dbrpc_protocol::messages::{ColumnValue, CursorRequest, Reply, Request, Status};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Driver-side cursor: the state machine plus the result set it walks.
#[derive(Debug)]
pub struct DriverCursor {
    state: CursorState,
    table: String,
    rows: Vec<(RowId, Row)>,
    /// Position of each cursor column in the table's descriptor.
    columns: Vec<usize>,
}

impl DriverCursor {
    pub fn state(&self) -> &CursorState {
        &self.state
    }

    fn current_row_id(&self, op: &'static str) -> Result<(usize, RowId), RpcError> {
        let index = self
            .state
            .current()
            .filter(|&i| i < self.rows.len())
            .ok_or(RpcError::NoCurrentRow(op))?;
        Ok((index, self.rows[index].0))
    }
}

/// Owns the engine and every cursor token handed to the client.
pub struct Dispatcher {
    backend: Box<dyn DriverBackend>,
    cursors: TokenTable<DriverCursor>,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn DriverBackend>, max_cursors: usize) -> Self {
        Self {
            backend,
            cursors: TokenTable::with_limit(max_cursors),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// Perform one request against the engine. Errors become a `Failed`
    /// status on the wire.
    pub fn handle(&mut self, request: Request) -> Result<Reply, RpcError> {
        match request {
            Request::Version => Ok(Reply::Version {
                protocol: dbrpc_protocol::PROTOCOL_VERSION,
                driver: self.backend.name().to_string(),
            }),
            Request::ListDatabases { location } => {
                Ok(Reply::Names(self.backend.list_databases(&location)?))
            }
            Request::CreateDatabase(handle) => {
                self.backend.create_database(&handle)?;
                Ok(Reply::Unit)
            }
            Request::OpenDatabase(handle) => {
                // A failed open leaves the previous database and its cursors usable.
                self.backend.open_database(&handle)?;
                self.close_all_cursors();
                info!(database = %handle.name, location = %handle.location, "database opened");
                Ok(Reply::Unit)
            }
            Request::CloseDatabase => {
                self.close_all_cursors();
                self.backend.close_database()?;
                Ok(Reply::Unit)
            }
            Request::ListTables => Ok(Reply::Names(self.backend.list_tables()?)),
            Request::DescribeTable { table } => {
                Ok(Reply::Descriptor(self.backend.describe_table(&table)?))
            }
            Request::CreateTable(definition) => {
                self.backend.create_table(&definition)?;
                Ok(Reply::Unit)
            }
            Request::DropTable { table } => {
                self.backend.drop_table(&table)?;
                Ok(Reply::Unit)
            }
            Request::GetNumRows { table } => Ok(Reply::Count(self.backend.num_rows(&table)?)),
            Request::OpenSelectCursor(req) => self.open_cursor(req, AccessMode::ReadOnly),
            Request::OpenUpdateCursor(req) => self.open_cursor(req, AccessMode::Update),
            Request::OpenInsertCursor { table } => self.open_insert_cursor(table),
            Request::Fetch { token, direction } => self.fetch(token, direction),
            Request::CloseCursor { token } => {
                self.cursors.drop_token(token)?;
                Ok(Reply::Unit)
            }
            Request::Insert { token, values } => self.insert(token, values),
            Request::Update { token, values } => self.update(token, values),
            Request::Delete { token } => self.delete(token),
            Request::CreateIndex(index) => {
                self.backend.create_index(&index)?;
                Ok(Reply::Unit)
            }
            Request::DropIndex { name } => {
                self.backend.drop_index(&name)?;
                Ok(Reply::Unit)
            }
            Request::ListIndexes { table } => Ok(Reply::Indexes(self.backend.list_indexes(&table)?)),
            Request::Shutdown => {
                self.shutdown();
                Ok(Reply::Unit)
            }
        }
    }

    fn open_cursor(&mut self, req: CursorRequest, access: AccessMode) -> Result<Reply, RpcError> {
        if req.position == PositionMode::Scrollable && !self.backend.supports_scrolling() {
            return Err(RpcError::NotScrollable);
        }
        let result = self.backend.select(&req.table)?;
        let (descriptor, columns) = result.descriptor.project(&req.columns)?;
        let rows = result
            .rows
            .into_iter()
            .map(|(id, row)| (id, row.project(&columns)))
            .collect();
        let cursor = DriverCursor {
            state: CursorState::new(descriptor.clone(), access, req.position),
            table: req.table,
            rows,
            columns,
        };
        let token = self.cursors.mint(cursor)?;
        debug!(%token, ?access, "cursor opened");
        Ok(Reply::CursorOpened { token, descriptor })
    }

    fn open_insert_cursor(&mut self, table: String) -> Result<Reply, RpcError> {
        let descriptor = self.backend.describe_table(&table)?;
        let cursor = DriverCursor {
            state: CursorState::new(descriptor.clone(), AccessMode::Insert, PositionMode::ForwardOnly),
            columns: (0..descriptor.len()).collect(),
            table,
            rows: Vec::new(),
        };
        let token = self.cursors.mint(cursor)?;
        Ok(Reply::CursorOpened { token, descriptor })
    }

    fn fetch(&mut self, token: Token, direction: FetchDirection) -> Result<Reply, RpcError> {
        let cursor = self.cursors.resolve_mut(token)?;
        let index = cursor.state.fetch(direction, cursor.rows.len())?;
        Ok(Reply::Fetched {
            row: index.map(|i| cursor.rows[i].1.clone()),
            descriptor: cursor.state.descriptor().clone(),
        })
    }

    fn insert(&mut self, token: Token, values: Vec<Value>) -> Result<Reply, RpcError> {
        let cursor = self.cursors.resolve(token)?;
        if cursor.state.access() != AccessMode::Insert {
            return Err(RpcError::WrongAccess("insert"));
        }
        let row = Row::new(values);
        cursor.state.descriptor().check_row(&row)?;
        let table = cursor.table.clone();
        self.backend.insert_row(&table, row)?;
        Ok(Reply::Unit)
    }

    fn update(&mut self, token: Token, values: Vec<ColumnValue>) -> Result<Reply, RpcError> {
        let cursor = self.cursors.resolve(token)?;
        if cursor.state.access() != AccessMode::Update {
            return Err(RpcError::WrongAccess("update"));
        }
        let (index, row_id) = cursor.current_row_id("update")?;
        let descriptor = cursor.state.descriptor();
        let mut changes = Vec::with_capacity(values.len());
        for ColumnValue { column, value } in &values {
            let position = usize::try_from(*column)
                .ok()
                .filter(|&c| c < descriptor.len())
                .ok_or_else(|| RpcError::NoSuchColumn(format!("#{column}")))?;
            if !descriptor.columns[position].accepts(value) {
                return Err(RpcError::RowMismatch(format!(
                    "column {} cannot hold {value:?}",
                    descriptor.columns[position].name
                )));
            }
            changes.push((cursor.columns[position], position, value.clone()));
        }
        let table = cursor.table.clone();
        let table_changes: Vec<(usize, Value)> =
            changes.iter().map(|(t, _, v)| (*t, v.clone())).collect();
        self.backend.update_row(&table, row_id, &table_changes)?;

        let cursor = self.cursors.resolve_mut(token)?;
        for (_, position, value) in changes {
            cursor.rows[index].1.values[position] = value;
        }
        Ok(Reply::Unit)
    }

    fn delete(&mut self, token: Token) -> Result<Reply, RpcError> {
        let cursor = self.cursors.resolve(token)?;
        if cursor.state.access() != AccessMode::Update {
            return Err(RpcError::WrongAccess("delete"));
        }
        let (index, row_id) = cursor.current_row_id("delete")?;
        let table = cursor.table.clone();
        self.backend.delete_row(&table, row_id)?;

        let cursor = self.cursors.resolve_mut(token)?;
        cursor.rows.remove(index);
        cursor.state.row_removed();
        Ok(Reply::Unit)
    }

    fn close_all_cursors(&mut self) {
        let dropped = self.cursors.drain().count();
        if dropped > 0 {
            debug!(dropped, "closed cursors");
        }
    }

    fn shutdown(&mut self) {
        self.close_all_cursors();
        // Nothing to report if no database was open.
        let _ = self.backend.close_database();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The client asked the driver to stop.
    Shutdown,
    /// The client closed its end of the pipe.
    Disconnected,
}

/// Answer requests until the client says `Shutdown` or goes away. Returns
/// an error only when the stream itself is unusable.
pub async fn serve<R, W>(dispatcher: &mut Dispatcher, reader: &mut R, writer: &mut W) -> Result<ServeOutcome, RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_handshake(writer, Some(dispatcher.backend_name())).await?;
    loop {
        let incoming = match recv_request(reader).await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => {
                info!("client closed the session");
                dispatcher.shutdown();
                return Ok(ServeOutcome::Disconnected);
            }
            Err(err) => {
                error!("read error: {err}");
                dispatcher.shutdown();
                return Err(err);
            }
        };
        counter!("driver_requests_total").increment(1);
        let request = match incoming {
            Incoming::Request(request) => request,
            Incoming::Unknown(id) => {
                warn!(procedure = id, "unknown procedure");
                counter!("driver_request_failures_total").increment(1);
                send_status(writer, Status::NoProcedure).await?;
                continue;
            }
            Incoming::Malformed { procedure, error } => {
                warn!(procedure = procedure.name(), "malformed request: {error}");
                counter!("driver_request_failures_total").increment(1);
                send_status(writer, Status::Failed).await?;
                continue;
            }
        };
        let procedure = request.procedure();
        let stop = matches!(request, Request::Shutdown);
        debug!(procedure = procedure.name(), "request");
        match dispatcher.handle(request) {
            Ok(reply) => {
                if let Err(err) = send_reply(writer, &reply).await {
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    warn!(procedure = procedure.name(), "reply not sent: {err}");
                    counter!("driver_request_failures_total").increment(1);
                }
            }
            Err(err) => {
                warn!(procedure = procedure.name(), "{err}");
                counter!("driver_request_failures_total").increment(1);
                send_status(writer, Status::Failed).await?;
            }
        }
        if stop {
            info!("shutdown requested");
            return Ok(ServeOutcome::Shutdown);
        }
    }
}

/// Tell the client the driver could not start.
pub async fn refuse<W: AsyncWrite + Unpin>(writer: &mut W, reason: &str) -> Result<(), RpcError> {
    error!("driver initialization failed: {reason}");
    write_handshake(writer, None).await
}
