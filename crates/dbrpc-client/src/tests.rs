#[cfg(test)]
mod tests {
    use crate::config::ClientConfig;
    use crate::cursor::Cursor;
    use crate::session::Session;
    use dbrpc_core::cursor::{AccessMode, CursorMode, FetchDirection, PositionMode};
    use dbrpc_core::error::{ErrorCategory, RpcError};
    use dbrpc_core::token::Token;
    use dbrpc_core::types::{Column, ColumnType, Row, RowDescriptor, Value};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Writes a version 2 handshake naming itself `fakedrvr`.
    const FAKE_HANDSHAKE: &str = "printf '\\000\\000\\000\\024\\000\\000\\000\\000\\000\\000\\000\\002\\000\\000\\000\\010fakedrvr'";

    fn catalog(entries: &[(&str, String)]) -> (TempDir, ClientConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drivers");
        let text = entries
            .iter()
            .map(|(name, command)| format!("{name}:{command}\n"))
            .collect::<String>();
        std::fs::write(&path, text).expect("write catalog");
        let mut config = ClientConfig::new(path);
        config.handshake_timeout_ms = 5_000;
        config.shutdown_grace_ms = 200;
        (dir, config)
    }

    #[tokio::test]
    async fn unknown_driver_is_a_startup_error() {
        let (_dir, config) = catalog(&[("fake", FAKE_HANDSHAKE.to_string())]);
        let err = Session::start("missing", &config).await.expect_err("unknown");
        assert!(matches!(err, RpcError::UnknownDriver(ref name) if name == "missing"));
        assert_eq!(err.category(), ErrorCategory::Startup);
    }

    #[tokio::test]
    async fn driver_exiting_before_handshake_fails_start() {
        let (_dir, config) = catalog(&[("dead", "exit 3".to_string())]);
        let err = Session::start("dead", &config).await.expect_err("no handshake");
        assert!(matches!(err, RpcError::Handshake(_)));
        assert!(err.to_string().contains('3'));
    }

    #[tokio::test]
    async fn silent_driver_hits_the_handshake_timeout() {
        let (_dir, mut config) = catalog(&[("mute", "exec sleep 30".to_string())]);
        config.handshake_timeout_ms = 100;
        let started = Instant::now();
        let err = Session::start("mute", &config).await.expect_err("timeout");
        assert!(matches!(err, RpcError::Handshake(ref msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn vanished_driver_breaks_the_session() {
        let (_dir, config) = catalog(&[("fake", format!("{FAKE_HANDSHAKE}; exit 0"))]);
        let mut session = Session::start("fake", &config).await.expect("start");
        assert_eq!(session.driver_name(), "fakedrvr");
        assert!(session.child_id().is_some());

        let err = session.list_tables().await.expect_err("driver gone");
        assert!(!err.is_recoverable());
        assert!(session.is_broken());
        assert!(matches!(
            session.list_tables().await,
            Err(RpcError::BrokenSession)
        ));

        let status = session.shutdown().await.expect("reap");
        assert!(status.success());
    }

    #[tokio::test]
    async fn unanswered_call_times_out_and_shutdown_kills() {
        let (_dir, mut config) = catalog(&[("stuck", format!("{FAKE_HANDSHAKE}; exec sleep 30"))]);
        config.call_timeout_ms = Some(200);
        let mut session = Session::start("stuck", &config).await.expect("start");

        let err = session.num_rows("streets").await.expect_err("timeout");
        assert!(matches!(err, RpcError::Timeout("GetNumRows")));
        assert!(session.is_broken());

        let started = Instant::now();
        let status = session.shutdown().await.expect("reap");
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cursor_from_another_session_is_rejected_locally() {
        let (_dir, config) = catalog(&[("stuck", format!("{FAKE_HANDSHAKE}; exec sleep 30"))]);
        let mut session = Session::start("stuck", &config).await.expect("start");
        let descriptor = RowDescriptor::new(vec![Column::new("cat", ColumnType::Integer)]);
        let mut foreign = Cursor::new(
            Uuid::new_v4(),
            Token::from_raw(0),
            descriptor,
            CursorMode::new(AccessMode::ReadOnly, PositionMode::ForwardOnly),
        );

        let err = session
            .fetch(&mut foreign, FetchDirection::Next)
            .await
            .expect_err("foreign");
        assert!(matches!(err, RpcError::ForeignCursor));
        assert!(!session.is_broken());
        session.shutdown().await.expect("reap");
    }

    #[tokio::test]
    async fn illegal_fetch_never_reaches_the_driver() {
        let (_dir, config) = catalog(&[("stuck", format!("{FAKE_HANDSHAKE}; exec sleep 30"))]);
        let mut session = Session::start("stuck", &config).await.expect("start");
        let descriptor = RowDescriptor::new(vec![Column::new("cat", ColumnType::Integer)]);
        let mut cursor = Cursor::new(
            session.id(),
            Token::from_raw(0),
            descriptor,
            CursorMode::new(AccessMode::ReadOnly, PositionMode::ForwardOnly),
        );

        // The stub never answers, so anything sent would hang the test.
        let err = session
            .fetch(&mut cursor, FetchDirection::Prior)
            .await
            .expect_err("forward only");
        assert!(matches!(err, RpcError::NotScrollable));
        let err = session.delete(&mut cursor).await.expect_err("read only");
        assert!(matches!(err, RpcError::WrongAccess(_)));
        assert!(!session.is_broken());
        session.shutdown().await.expect("reap");
    }

    #[tokio::test]
    async fn update_without_row_or_flags_is_refused_locally() {
        let (_dir, config) = catalog(&[("stuck", format!("{FAKE_HANDSHAKE}; exec sleep 30"))]);
        let mut session = Session::start("stuck", &config).await.expect("start");
        let descriptor = RowDescriptor::new(vec![
            Column::new("cat", ColumnType::Integer),
            Column::new("label", ColumnType::Text),
        ]);
        let mut cursor = Cursor::new(
            session.id(),
            Token::from_raw(0),
            descriptor,
            CursorMode::new(AccessMode::Update, PositionMode::ForwardOnly),
        );

        let err = session.update(&mut cursor).await.expect_err("no row");
        assert!(matches!(err, RpcError::NoCurrentRow("update")));
        assert!(err.to_string().contains("positioned on a row"));

        cursor.set_row(Some(Row::new(vec![Value::Integer(1), Value::Null])));
        let err = session.update(&mut cursor).await.expect_err("no flags");
        assert!(matches!(err, RpcError::NothingToUpdate));
        assert!(err.is_recoverable());
        assert!(!session.is_broken());
        session.shutdown().await.expect("reap");
    }
}
