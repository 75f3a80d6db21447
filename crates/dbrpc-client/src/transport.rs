use dbrpc_core::error::RpcError;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

pub type SendStream = BufWriter<ChildStdin>;
pub type RecvStream = BufReader<ChildStdout>;

/// A spawned driver and the two pipes wired to its stdin and stdout. The
/// driver's stderr is inherited and carries its diagnostics.
#[derive(Debug)]
pub struct Transport {
    send: Option<SendStream>,
    recv: RecvStream,
    child: Child,
    child_id: Option<u32>,
    exit: Option<ExitStatus>,
}

impl Transport {
    /// Run `command` through `sh -c`. A command the shell cannot execute
    /// makes the child exit with status 127 before it writes anything.
    pub fn open<K, V>(command: &str, env: impl IntoIterator<Item = (K, V)>) -> Result<Self, RpcError>
    where
        K: AsRef<std::ffi::OsStr>,
        V: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RpcError::Startup(format!("{command}: {err}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Startup("driver stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Startup("driver stdout not captured".into()))?;
        let child_id = child.id();
        debug!(?child_id, command, "driver spawned");
        Ok(Self {
            send: Some(BufWriter::new(stdin)),
            recv: BufReader::new(stdout),
            child,
            child_id,
            exit: None,
        })
    }

    pub fn child_id(&self) -> Option<u32> {
        self.child_id
    }

    pub fn is_closed(&self) -> bool {
        self.send.is_none()
    }

    pub fn streams(&mut self) -> Result<(&mut SendStream, &mut RecvStream), RpcError> {
        let send = self.send.as_mut().ok_or(RpcError::BrokenSession)?;
        Ok((send, &mut self.recv))
    }

    pub fn recv_stream(&mut self) -> &mut RecvStream {
        &mut self.recv
    }

    /// Exit status if the driver has already gone, without blocking.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit = Some(status);
            }
        }
        self.exit
    }

    /// Close the send pipe, give the driver `grace` to exit, kill it after
    /// that, and reap it. Safe to call again; later calls report the
    /// status collected by the first.
    pub async fn close(&mut self, grace: Duration) -> Result<ExitStatus, RpcError> {
        self.send.take();
        if let Some(status) = self.try_exit_status() {
            return Ok(status);
        }
        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(waited) => waited?,
            Err(_) => {
                warn!(child_id = ?self.child_id, "driver did not exit, killing it");
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        debug!(child_id = ?self.child_id, %status, "driver reaped");
        self.exit = Some(status);
        Ok(status)
    }
}
