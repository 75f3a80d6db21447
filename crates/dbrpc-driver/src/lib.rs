pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod flatfile;
pub mod memory;
pub mod store;

use backend::DriverBackend;
use config::{DriverConfig, EngineKind};
use dbrpc_core::error::RpcError;
use dbrpc_core::types::DatabaseHandle;
use dispatcher::{refuse, serve, Dispatcher};
use flatfile::FlatFileBackend;
use memory::MemoryBackend;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverExit {
    Clean,
    InitFailed,
    ProtocolError,
}

impl DriverExit {
    pub fn code(self) -> i32 {
        match self {
            DriverExit::Clean => 0,
            DriverExit::InitFailed => 1,
            DriverExit::ProtocolError => 2,
        }
    }
}

/// Construct the configured engine and open the configured database, if
/// any. Failing here fails the handshake.
pub fn build_backend(config: &DriverConfig) -> Result<Box<dyn DriverBackend>, RpcError> {
    let mut backend: Box<dyn DriverBackend> = match config.engine {
        EngineKind::Memory => Box::new(MemoryBackend::new()),
        EngineKind::FlatFile => {
            let root = config
                .data_dir
                .clone()
                .ok_or_else(|| RpcError::Backend("flatfile engine needs a workspace".into()))?;
            Box::new(FlatFileBackend::open(root)?)
        }
    };
    if let Some(name) = &config.database {
        let handle = DatabaseHandle::new(name.clone());
        if config.engine == EngineKind::Memory {
            backend.create_database(&handle)?;
        }
        backend.open_database(&handle)?;
    }
    Ok(backend)
}

/// Run one driver session over `reader`/`writer`: handshake, then serve
/// requests until shutdown or disconnect.
pub async fn run<R, W>(config: anyhow::Result<DriverConfig>, reader: &mut R, writer: &mut W) -> DriverExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let config = match config.and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(err) => {
            let _ = refuse(writer, &err.to_string()).await;
            return DriverExit::InitFailed;
        }
    };
    let backend = match build_backend(&config) {
        Ok(backend) => backend,
        Err(err) => {
            let _ = refuse(writer, &err.to_string()).await;
            return DriverExit::InitFailed;
        }
    };
    info!(engine = backend.name(), "driver ready");
    let mut dispatcher = Dispatcher::new(backend, config.max_cursors);
    match serve(&mut dispatcher, reader, writer).await {
        Ok(outcome) => {
            info!(?outcome, "driver stopped");
            DriverExit::Clean
        }
        Err(_) => DriverExit::ProtocolError,
    }
}

#[cfg(test)]
mod tests;
