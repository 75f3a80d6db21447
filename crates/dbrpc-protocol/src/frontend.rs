//! Client side of a session: encode calls, decode replies.

use crate::codec::{finish, read_frame, write_frame, PROTOCOL_VERSION};
use crate::messages::{decode_status, Procedure, Reply, Request, Status};
use bytes::BytesMut;
use dbrpc_core::error::RpcError;
use dbrpc_core::types::RowDescriptor;
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn send_request<S: AsyncWrite + Unpin>(stream: &mut S, request: &Request) -> Result<(), RpcError> {
    let mut buf = BytesMut::new();
    request.encode(&mut buf);
    write_frame(stream, &buf).await
}

/// Read the reply to `procedure`. The status is checked before any payload
/// byte is looked at; a failure status carries no payload.
pub async fn recv_reply<S: AsyncRead + Unpin>(
    stream: &mut S,
    procedure: Procedure,
    descriptor: Option<&RowDescriptor>,
) -> Result<Reply, RpcError> {
    let mut frame = read_frame(stream).await?.ok_or_else(|| {
        RpcError::protocol(format!(
            "driver closed the stream before answering {}",
            procedure.name()
        ))
    })?;
    match decode_status(&mut frame)? {
        Status::Ok => Reply::decode(procedure, &mut frame, descriptor),
        Status::Failed => {
            finish(&frame)?;
            Err(RpcError::Failed {
                procedure: procedure.name(),
            })
        }
        Status::NoProcedure => {
            finish(&frame)?;
            Err(RpcError::NoProcedure(procedure.id()))
        }
    }
}

/// One full round trip over the two halves of a session.
pub async fn call<W, R>(
    send: &mut W,
    recv: &mut R,
    request: &Request,
    descriptor: Option<&RowDescriptor>,
) -> Result<Reply, RpcError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    send_request(send, request).await?;
    recv_reply(recv, request.procedure(), descriptor).await
}

/// The first frame a driver writes after it has initialized. Returns the
/// driver's self-reported name.
pub async fn read_handshake<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, RpcError> {
    let mut frame = match read_frame(stream).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(RpcError::Handshake("driver exited before handshake".into())),
        Err(err) => return Err(RpcError::Handshake(err.to_string())),
    };
    let status = decode_status(&mut frame).map_err(|err| RpcError::Handshake(err.to_string()))?;
    if status != Status::Ok {
        return Err(RpcError::Handshake("driver failed to initialize".into()));
    }
    match Reply::decode(Procedure::Version, &mut frame, None) {
        Ok(Reply::Version { protocol, driver }) if protocol == PROTOCOL_VERSION => Ok(driver),
        Ok(Reply::Version { protocol, .. }) => Err(RpcError::Handshake(format!(
            "driver speaks protocol {protocol}, expected {PROTOCOL_VERSION}"
        ))),
        Ok(other) => Err(RpcError::Handshake(format!("unexpected handshake {other:?}"))),
        Err(err) => Err(RpcError::Handshake(err.to_string())),
    }
}
