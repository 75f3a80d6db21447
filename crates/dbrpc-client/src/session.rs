use crate::catalog::{DriverCatalog, DriverEntry};
use crate::config::ClientConfig;
use crate::cursor::Cursor;
use crate::transport::Transport;
use dbrpc_core::cursor::{AccessMode, CursorMode, FetchDirection, PositionMode};
use dbrpc_core::error::RpcError;
use dbrpc_core::types::{DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition};
use dbrpc_protocol::frontend;
use dbrpc_protocol::{ColumnValue, CursorRequest, Reply, Request};
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One running driver and the conversation held with it. Calls are strictly
/// sequential: each waits for its reply before the next is sent.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    driver: DriverEntry,
    driver_name: String,
    transport: Transport,
    broken: bool,
    call_timeout: Option<Duration>,
    shutdown_grace: Duration,
}

impl Session {
    /// Look up `driver` in the catalog, spawn it and wait for its handshake.
    pub async fn start(driver: &str, config: &ClientConfig) -> Result<Self, RpcError> {
        let catalog = DriverCatalog::load(&config.catalog_path())?;
        let entry = catalog
            .find(driver)
            .cloned()
            .ok_or_else(|| RpcError::UnknownDriver(driver.to_string()))?;
        let mut transport = Transport::open(&entry.command, config.driver_env())?;
        let handshake =
            tokio::time::timeout(config.handshake_timeout(), frontend::read_handshake(transport.recv_stream()))
                .await;
        let driver_name = match handshake {
            Ok(Ok(name)) => name,
            Ok(Err(err)) => {
                let status = transport.close(config.shutdown_grace()).await;
                return Err(handshake_failure(&entry, err.to_string(), status));
            }
            Err(_) => {
                let status = transport.close(config.shutdown_grace()).await;
                return Err(handshake_failure(&entry, "timed out".to_string(), status));
            }
        };
        let id = Uuid::new_v4();
        info!(session = %id, driver = %entry.name, %driver_name, child_id = ?transport.child_id(), "session started");
        Ok(Self {
            id,
            driver: entry,
            driver_name,
            transport,
            broken: false,
            call_timeout: config.call_timeout(),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver(&self) -> &DriverEntry {
        &self.driver
    }

    /// Name the driver reported in its handshake.
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn child_id(&self) -> Option<u32> {
        self.transport.child_id()
    }

    /// A broken session refuses every call; only `shutdown` is left.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn set_call_timeout(&mut self, timeout: Option<Duration>) {
        self.call_timeout = timeout;
    }

    async fn call(&mut self, request: Request, descriptor: Option<&RowDescriptor>) -> Result<Reply, RpcError> {
        if self.broken {
            return Err(RpcError::BrokenSession);
        }
        let procedure = request.procedure();
        let timeout = self.call_timeout;
        let (send, recv) = self.transport.streams()?;
        let exchange = frontend::call(send, recv, &request, descriptor);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or_else(|_| Err(RpcError::Timeout(procedure.name()))),
            None => exchange.await,
        };
        match &result {
            Ok(_) => debug!(session = %self.id, procedure = procedure.name(), "call ok"),
            Err(err) if err.is_recoverable() => {
                debug!(session = %self.id, procedure = procedure.name(), error = %err, "call failed")
            }
            Err(err) => {
                warn!(session = %self.id, procedure = procedure.name(), error = %err, "session broken");
                self.broken = true;
            }
        }
        result
    }

    async fn call_unit(&mut self, request: Request) -> Result<(), RpcError> {
        match self.call(request, None).await? {
            Reply::Unit => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    async fn call_names(&mut self, request: Request) -> Result<Vec<String>, RpcError> {
        match self.call(request, None).await? {
            Reply::Names(names) => Ok(names),
            other => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&mut self, reply: Reply) -> RpcError {
        self.broken = true;
        RpcError::protocol(format!("unexpected reply {reply:?}"))
    }

    /// Protocol version and driver name, as answered by the driver now.
    pub async fn version(&mut self) -> Result<(i32, String), RpcError> {
        match self.call(Request::Version, None).await? {
            Reply::Version { protocol, driver } => Ok((protocol, driver)),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn list_databases(&mut self, location: &str) -> Result<Vec<String>, RpcError> {
        self.call_names(Request::ListDatabases {
            location: location.to_string(),
        })
        .await
    }

    pub async fn create_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        self.call_unit(Request::CreateDatabase(handle.clone())).await
    }

    /// Open a database, closing whichever one was open. Open cursors
    /// become invalid.
    pub async fn open_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        self.call_unit(Request::OpenDatabase(handle.clone())).await
    }

    pub async fn close_database(&mut self) -> Result<(), RpcError> {
        self.call_unit(Request::CloseDatabase).await
    }

    pub async fn list_tables(&mut self) -> Result<Vec<String>, RpcError> {
        self.call_names(Request::ListTables).await
    }

    pub async fn describe_table(&mut self, table: &str) -> Result<RowDescriptor, RpcError> {
        let request = Request::DescribeTable {
            table: table.to_string(),
        };
        match self.call(request, None).await? {
            Reply::Descriptor(descriptor) => Ok(descriptor),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn create_table(&mut self, definition: &TableDefinition) -> Result<(), RpcError> {
        self.call_unit(Request::CreateTable(definition.clone())).await
    }

    pub async fn drop_table(&mut self, table: &str) -> Result<(), RpcError> {
        self.call_unit(Request::DropTable {
            table: table.to_string(),
        })
        .await
    }

    pub async fn num_rows(&mut self, table: &str) -> Result<i64, RpcError> {
        let request = Request::GetNumRows {
            table: table.to_string(),
        };
        match self.call(request, None).await? {
            Reply::Count(count) => Ok(count),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn create_index(&mut self, index: &IndexInfo) -> Result<(), RpcError> {
        self.call_unit(Request::CreateIndex(index.clone())).await
    }

    pub async fn drop_index(&mut self, name: &str) -> Result<(), RpcError> {
        self.call_unit(Request::DropIndex {
            name: name.to_string(),
        })
        .await
    }

    pub async fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, RpcError> {
        let request = Request::ListIndexes {
            table: table.to_string(),
        };
        match self.call(request, None).await? {
            Reply::Indexes(indexes) => Ok(indexes),
            other => Err(self.unexpected(other)),
        }
    }

    /// Open a read-only cursor over `columns` of `table`; an empty column
    /// list selects all of them.
    pub async fn open_select_cursor(
        &mut self,
        table: &str,
        columns: &[&str],
        position: PositionMode,
    ) -> Result<Cursor, RpcError> {
        let request = Request::OpenSelectCursor(cursor_request(table, columns, position));
        self.open_cursor(request, AccessMode::ReadOnly, position).await
    }

    pub async fn open_update_cursor(
        &mut self,
        table: &str,
        columns: &[&str],
        position: PositionMode,
    ) -> Result<Cursor, RpcError> {
        let request = Request::OpenUpdateCursor(cursor_request(table, columns, position));
        self.open_cursor(request, AccessMode::Update, position).await
    }

    pub async fn open_insert_cursor(&mut self, table: &str) -> Result<Cursor, RpcError> {
        let request = Request::OpenInsertCursor {
            table: table.to_string(),
        };
        self.open_cursor(request, AccessMode::Insert, PositionMode::ForwardOnly)
            .await
    }

    async fn open_cursor(
        &mut self,
        request: Request,
        access: AccessMode,
        position: PositionMode,
    ) -> Result<Cursor, RpcError> {
        match self.call(request, None).await? {
            Reply::CursorOpened { token, descriptor } => {
                debug!(session = %self.id, %token, ?access, "cursor opened");
                Ok(Cursor::new(
                    self.id,
                    token,
                    descriptor,
                    CursorMode::new(access, position),
                ))
            }
            other => Err(self.unexpected(other)),
        }
    }

    fn check_owner(&self, cursor: &Cursor) -> Result<(), RpcError> {
        if cursor.session_id() != self.id {
            return Err(RpcError::ForeignCursor);
        }
        Ok(())
    }

    /// Move the cursor and return the row found there. `None` means the
    /// cursor ran past the last (or before the first) row; the cursor's
    /// current row is cleared in that case.
    pub async fn fetch(&mut self, cursor: &mut Cursor, direction: FetchDirection) -> Result<Option<Row>, RpcError> {
        self.check_owner(cursor)?;
        cursor.mode().check_fetch(direction)?;
        let request = Request::Fetch {
            token: cursor.token(),
            direction,
        };
        let reply = self.call(request, Some(cursor.descriptor())).await?;
        match reply {
            Reply::Fetched { row, .. } => {
                cursor.set_row(row.clone());
                Ok(row)
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Release the driver side of the cursor. The token is dead afterwards.
    pub async fn close_cursor(&mut self, cursor: Cursor) -> Result<(), RpcError> {
        self.check_owner(&cursor)?;
        self.call_unit(Request::CloseCursor {
            token: cursor.token(),
        })
        .await
    }

    /// Add `row` through an insert cursor. The row must match the
    /// cursor's descriptor.
    pub async fn insert(&mut self, cursor: &Cursor, row: Row) -> Result<(), RpcError> {
        self.check_owner(cursor)?;
        if cursor.access() != AccessMode::Insert {
            return Err(RpcError::WrongAccess("insert"));
        }
        cursor.descriptor().check_row(&row)?;
        self.call_unit(Request::Insert {
            token: cursor.token(),
            values: row.values,
        })
        .await
    }

    /// Write the flagged columns of the cursor's current row back.
    pub async fn update(&mut self, cursor: &mut Cursor) -> Result<(), RpcError> {
        self.check_owner(cursor)?;
        if cursor.access() != AccessMode::Update {
            return Err(RpcError::WrongAccess("update"));
        }
        let row = cursor
            .current_row()
            .ok_or(RpcError::NoCurrentRow("update"))?;
        let values = cursor
            .flagged_columns()
            .into_iter()
            .filter_map(|column| {
                row.get(column).map(|value| ColumnValue {
                    column: column as i32,
                    value: value.clone(),
                })
            })
            .collect::<Vec<_>>();
        if values.is_empty() {
            return Err(RpcError::NothingToUpdate);
        }
        self.call_unit(Request::Update {
            token: cursor.token(),
            values,
        })
        .await
    }

    /// Remove the cursor's current row.
    pub async fn delete(&mut self, cursor: &mut Cursor) -> Result<(), RpcError> {
        self.check_owner(cursor)?;
        if cursor.access() != AccessMode::Update {
            return Err(RpcError::WrongAccess("delete"));
        }
        self.call_unit(Request::Delete {
            token: cursor.token(),
        })
        .await?;
        cursor.set_row(None);
        Ok(())
    }

    /// Ask the driver to stop, then close the pipes and reap it. A broken
    /// session skips the request and goes straight to closing.
    pub async fn shutdown(mut self) -> Result<ExitStatus, RpcError> {
        if !self.broken {
            let grace = self.shutdown_grace;
            self.call_timeout = Some(grace);
            if let Err(err) = self.call(Request::Shutdown, None).await {
                debug!(session = %self.id, error = %err, "shutdown request not acknowledged");
            }
        }
        let status = self.transport.close(self.shutdown_grace).await?;
        info!(session = %self.id, %status, "session closed");
        Ok(status)
    }
}

fn cursor_request(table: &str, columns: &[&str], position: PositionMode) -> CursorRequest {
    CursorRequest {
        table: table.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        position,
    }
}

fn handshake_failure(
    entry: &DriverEntry,
    reason: String,
    status: Result<ExitStatus, RpcError>,
) -> RpcError {
    let exit = match status {
        Ok(status) => status.to_string(),
        Err(err) => format!("not reaped: {err}"),
    };
    warn!(driver = %entry.name, %reason, %exit, "driver handshake failed");
    RpcError::Handshake(format!("{}: {reason} ({exit})", entry.name))
}
