#[cfg(test)]
mod tests {
    use crate::config::{DriverConfig, EngineKind};
    use crate::dispatcher::{serve, Dispatcher, ServeOutcome};
    use crate::flatfile::FlatFileBackend;
    use crate::memory::MemoryBackend;
    use crate::{run, DriverExit};
    use dbrpc_core::cursor::{FetchDirection, PositionMode};
    use dbrpc_core::error::RpcError;
    use dbrpc_core::token::Token;
    use dbrpc_core::types::{
        Column, ColumnType, DatabaseHandle, Row, RowDescriptor, TableDefinition, Value,
    };
    use dbrpc_protocol::codec::write_frame;
    use dbrpc_protocol::frontend::{call, read_handshake};
    use dbrpc_protocol::messages::{ColumnValue, CursorRequest, Reply, Request};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn streets() -> TableDefinition {
        TableDefinition {
            name: "streets".into(),
            descriptor: RowDescriptor::new(vec![
                Column::new("cat", ColumnType::Integer).not_null(),
                Column::new("name", ColumnType::Text),
                Column::new("length", ColumnType::Double),
            ]),
        }
    }

    fn memory_dispatcher(rows: i64) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(Box::new(MemoryBackend::new()), 16);
        let handle = DatabaseHandle::new("city");
        dispatcher
            .handle(Request::CreateDatabase(handle.clone()))
            .expect("create db");
        dispatcher.handle(Request::OpenDatabase(handle)).expect("open db");
        dispatcher.handle(Request::CreateTable(streets())).expect("create table");
        let Reply::CursorOpened { token, .. } = dispatcher
            .handle(Request::OpenInsertCursor {
                table: "streets".into(),
            })
            .expect("insert cursor")
        else {
            panic!("expected cursor");
        };
        for cat in 1..=rows {
            dispatcher
                .handle(Request::Insert {
                    token,
                    values: vec![
                        Value::Integer(cat),
                        Value::Text(format!("street {cat}")),
                        Value::Double(cat as f64 * 10.0),
                    ],
                })
                .expect("insert");
        }
        dispatcher.handle(Request::CloseCursor { token }).expect("close");
        dispatcher
    }

    fn open(dispatcher: &mut Dispatcher, update: bool, position: PositionMode) -> Token {
        let req = CursorRequest {
            table: "streets".into(),
            columns: Vec::new(),
            position,
        };
        let request = if update {
            Request::OpenUpdateCursor(req)
        } else {
            Request::OpenSelectCursor(req)
        };
        match dispatcher.handle(request).expect("open cursor") {
            Reply::CursorOpened { token, .. } => token,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn fetch(dispatcher: &mut Dispatcher, token: Token, direction: FetchDirection) -> Result<Option<Row>, RpcError> {
        match dispatcher.handle(Request::Fetch { token, direction })? {
            Reply::Fetched { row, .. } => Ok(row),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn next_walks_every_row_then_reports_no_more() {
        let mut dispatcher = memory_dispatcher(3);
        let token = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        let mut cats = Vec::new();
        while let Some(row) = fetch(&mut dispatcher, token, FetchDirection::Next).expect("fetch") {
            cats.push(row.values[0].clone());
        }
        assert_eq!(cats, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert!(fetch(&mut dispatcher, token, FetchDirection::Next).expect("fetch").is_none());
    }

    #[test]
    fn forward_only_cursor_refuses_to_scroll() {
        let mut dispatcher = memory_dispatcher(3);
        let token = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        fetch(&mut dispatcher, token, FetchDirection::Next).expect("first");
        assert!(matches!(
            fetch(&mut dispatcher, token, FetchDirection::Last),
            Err(RpcError::NotScrollable)
        ));
        let row = fetch(&mut dispatcher, token, FetchDirection::Next)
            .expect("fetch")
            .expect("row");
        assert_eq!(row.values[0], Value::Integer(2));
    }

    #[test]
    fn closed_cursor_token_is_not_found() {
        let mut dispatcher = memory_dispatcher(1);
        let token = open(&mut dispatcher, false, PositionMode::Scrollable);
        dispatcher.handle(Request::CloseCursor { token }).expect("close");
        assert!(matches!(
            fetch(&mut dispatcher, token, FetchDirection::Next),
            Err(RpcError::TokenNotFound(_))
        ));
        assert!(matches!(
            dispatcher.handle(Request::CloseCursor { token }),
            Err(RpcError::TokenNotFound(_))
        ));
        assert_eq!(dispatcher.open_cursors(), 0);
    }

    #[test]
    fn update_and_delete_act_on_current_row() {
        let mut dispatcher = memory_dispatcher(3);
        let token = open(&mut dispatcher, true, PositionMode::ForwardOnly);

        // Not positioned yet.
        assert!(matches!(
            dispatcher.handle(Request::Delete { token }),
            Err(RpcError::NoCurrentRow("delete"))
        ));

        fetch(&mut dispatcher, token, FetchDirection::Next).expect("row 1");
        dispatcher
            .handle(Request::Update {
                token,
                values: vec![ColumnValue {
                    column: 1,
                    value: Value::Text("high st".into()),
                }],
            })
            .expect("update");
        fetch(&mut dispatcher, token, FetchDirection::Next).expect("row 2");
        dispatcher.handle(Request::Delete { token }).expect("delete");
        let next = fetch(&mut dispatcher, token, FetchDirection::Next)
            .expect("fetch")
            .expect("row 3");
        assert_eq!(next.values[0], Value::Integer(3));

        let select = open(&mut dispatcher, false, PositionMode::Scrollable);
        let first = fetch(&mut dispatcher, select, FetchDirection::First)
            .expect("fetch")
            .expect("row");
        assert_eq!(first.values[1], Value::Text("high st".into()));
        assert!(matches!(
            dispatcher.handle(Request::GetNumRows {
                table: "streets".into()
            }),
            Ok(Reply::Count(2))
        ));
    }

    #[test]
    fn writes_need_the_right_access_mode() {
        let mut dispatcher = memory_dispatcher(1);
        let token = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        fetch(&mut dispatcher, token, FetchDirection::Next).expect("row");
        assert!(matches!(
            dispatcher.handle(Request::Update { token, values: Vec::new() }),
            Err(RpcError::WrongAccess(_))
        ));
        assert!(matches!(
            dispatcher.handle(Request::Insert { token, values: Vec::new() }),
            Err(RpcError::WrongAccess(_))
        ));

        let update = open(&mut dispatcher, true, PositionMode::ForwardOnly);
        fetch(&mut dispatcher, update, FetchDirection::Next).expect("row");
        let wrong_type = Request::Update {
            token: update,
            values: vec![ColumnValue {
                column: 0,
                value: Value::Text("x".into()),
            }],
        };
        assert!(matches!(dispatcher.handle(wrong_type), Err(RpcError::RowMismatch(_))));
    }

    #[test]
    fn projected_cursor_updates_the_right_table_column() {
        let mut dispatcher = memory_dispatcher(1);
        let reply = dispatcher
            .handle(Request::OpenUpdateCursor(CursorRequest {
                table: "streets".into(),
                columns: vec!["length".into()],
                position: PositionMode::ForwardOnly,
            }))
            .expect("open");
        let Reply::CursorOpened { token, descriptor } = reply else {
            panic!("expected cursor");
        };
        assert_eq!(descriptor.len(), 1);
        fetch(&mut dispatcher, token, FetchDirection::Next).expect("row");
        dispatcher
            .handle(Request::Update {
                token,
                values: vec![ColumnValue {
                    column: 0,
                    value: Value::Double(99.5),
                }],
            })
            .expect("update");
        let all = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        let row = fetch(&mut dispatcher, all, FetchDirection::Next)
            .expect("fetch")
            .expect("row");
        assert_eq!(row.values, vec![
            Value::Integer(1),
            Value::Text("street 1".into()),
            Value::Double(99.5)
        ]);
    }

    #[test]
    fn cursor_limit_is_a_resource_error() {
        let mut dispatcher = memory_dispatcher(0);
        let mut tokens = Vec::new();
        // memory_dispatcher already used and released one token.
        for _ in 0..16 {
            tokens.push(open(&mut dispatcher, false, PositionMode::ForwardOnly));
        }
        let err = dispatcher
            .handle(Request::OpenSelectCursor(CursorRequest {
                table: "streets".into(),
                columns: Vec::new(),
                position: PositionMode::ForwardOnly,
            }))
            .expect_err("exhausted");
        assert!(matches!(err, RpcError::TokensExhausted));
        dispatcher
            .handle(Request::CloseCursor { token: tokens[0] })
            .expect("close");
        let fresh = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        assert!(!tokens.contains(&fresh));
    }

    #[test]
    fn closing_the_database_invalidates_cursors() {
        let mut dispatcher = memory_dispatcher(2);
        let token = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        dispatcher.handle(Request::CloseDatabase).expect("close db");
        assert!(matches!(
            fetch(&mut dispatcher, token, FetchDirection::Next),
            Err(RpcError::TokenNotFound(_))
        ));
    }

    #[test]
    fn failed_database_open_keeps_cursors_alive() {
        let mut dispatcher = memory_dispatcher(2);
        let token = open(&mut dispatcher, false, PositionMode::ForwardOnly);
        fetch(&mut dispatcher, token, FetchDirection::Next).expect("row 1");

        assert!(dispatcher
            .handle(Request::OpenDatabase(DatabaseHandle::new("missing")))
            .is_err());
        assert_eq!(dispatcher.open_cursors(), 1);
        assert!(matches!(
            dispatcher.handle(Request::ListTables),
            Ok(Reply::Names(ref names)) if names == &vec!["streets".to_string()]
        ));
        let row = fetch(&mut dispatcher, token, FetchDirection::Next)
            .expect("fetch")
            .expect("row 2");
        assert_eq!(row.values[0], Value::Integer(2));

        // A successful switch still drops them.
        dispatcher
            .handle(Request::OpenDatabase(DatabaseHandle::new("city")))
            .expect("reopen");
        assert_eq!(dispatcher.open_cursors(), 0);
    }

    #[test]
    fn flatfile_engine_rejects_scrollable_cursors() {
        let dir = TempDir::new().expect("tempdir");
        let mut dispatcher = Dispatcher::new(
            Box::new(FlatFileBackend::open(dir.path()).expect("backend")),
            8,
        );
        let handle = DatabaseHandle::new("db");
        dispatcher
            .handle(Request::CreateDatabase(handle.clone()))
            .expect("create");
        dispatcher.handle(Request::OpenDatabase(handle)).expect("open");
        dispatcher.handle(Request::CreateTable(streets())).expect("table");
        assert!(matches!(
            dispatcher.handle(Request::OpenSelectCursor(CursorRequest {
                table: "streets".into(),
                columns: Vec::new(),
                position: PositionMode::Scrollable,
            })),
            Err(RpcError::NotScrollable)
        ));
        assert_eq!(dispatcher.open_cursors(), 0);
    }

    #[tokio::test]
    async fn serve_answers_until_shutdown() {
        let (mut client_send, mut driver_recv) = tokio::io::duplex(4096);
        let (mut driver_send, mut client_recv) = tokio::io::duplex(4096);
        let driver = tokio::spawn(async move {
            let mut dispatcher = memory_dispatcher(2);
            serve(&mut dispatcher, &mut driver_recv, &mut driver_send).await
        });

        assert_eq!(read_handshake(&mut client_recv).await.expect("handshake"), "memory");
        let tables = call(&mut client_send, &mut client_recv, &Request::ListTables, None)
            .await
            .expect("list");
        assert_eq!(tables, Reply::Names(vec!["streets".into()]));

        // Unknown procedure and bad arguments fail the call, not the session.
        write_frame(&mut client_send, &[0, 0, 0, 77]).await.expect("send");
        let err = dbrpc_protocol::frontend::recv_reply(
            &mut client_recv,
            dbrpc_protocol::Procedure::Version,
            None,
        )
        .await
        .expect_err("no such procedure");
        assert!(matches!(err, RpcError::NoProcedure(_)));
        let err = call(
            &mut client_send,
            &mut client_recv,
            &Request::DescribeTable {
                table: "missing".into(),
            },
            None,
        )
        .await
        .expect_err("missing table");
        assert!(err.is_recoverable());

        let reply = call(&mut client_send, &mut client_recv, &Request::Shutdown, None)
            .await
            .expect("shutdown");
        assert_eq!(reply, Reply::Unit);
        let outcome = driver.await.expect("join").expect("serve");
        assert_eq!(outcome, ServeOutcome::Shutdown);
    }

    #[tokio::test]
    async fn truncated_request_ends_serve_with_protocol_error() {
        let (mut client_send, mut driver_recv) = tokio::io::duplex(256);
        let (mut driver_send, mut client_recv) = tokio::io::duplex(256);
        let driver = tokio::spawn(async move {
            let mut dispatcher = memory_dispatcher(0);
            serve(&mut dispatcher, &mut driver_recv, &mut driver_send).await
        });
        read_handshake(&mut client_recv).await.expect("handshake");
        client_send.write_all(&[0, 0, 0, 8, 0, 0]).await.expect("write");
        drop(client_send);
        let result = driver.await.expect("join");
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }

    #[tokio::test]
    async fn failed_initialization_refuses_the_handshake() {
        let dir = TempDir::new().expect("tempdir");
        let config = DriverConfig {
            engine: EngineKind::FlatFile,
            data_dir: Some(dir.path().join("does-not-exist")),
            ..DriverConfig::default()
        };
        let (mut driver_recv, _client_send) = tokio::io::duplex(64);
        let (mut driver_send, mut client_recv) = tokio::io::duplex(64);
        let exit = run(Ok(config), &mut driver_recv, &mut driver_send).await;
        assert_eq!(exit, DriverExit::InitFailed);
        assert_eq!(exit.code(), 1);
        assert!(matches!(
            read_handshake(&mut client_recv).await,
            Err(RpcError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn configured_database_is_opened_before_handshake() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir(dir.path().join("survey")).expect("db dir");
        let ok = DriverConfig {
            engine: EngineKind::FlatFile,
            data_dir: Some(dir.path().to_path_buf()),
            database: Some("survey".into()),
            ..DriverConfig::default()
        };
        let (mut driver_recv, client_send) = tokio::io::duplex(64);
        let (mut driver_send, mut client_recv) = tokio::io::duplex(64);
        drop(client_send);
        let exit = run(Ok(ok.clone()), &mut driver_recv, &mut driver_send).await;
        assert_eq!(exit, DriverExit::Clean);
        assert_eq!(read_handshake(&mut client_recv).await.expect("handshake"), "flatfile");

        let missing = DriverConfig {
            database: Some("nope".into()),
            ..ok
        };
        let (mut driver_recv, _client_send) = tokio::io::duplex(64);
        let (mut driver_send, _client_recv) = tokio::io::duplex(64);
        let exit = run(Ok(missing), &mut driver_recv, &mut driver_send).await;
        assert_eq!(exit, DriverExit::InitFailed);
    }
}
