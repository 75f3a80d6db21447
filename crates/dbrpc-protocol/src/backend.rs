//! Driver side of a session: decode calls, encode replies.

use crate::codec::{read_frame, write_frame, PROTOCOL_VERSION};
use crate::messages::{Procedure, Reply, Request, Status};
use bytes::{Buf, BufMut, BytesMut};
use dbrpc_core::error::RpcError;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    /// The frame named a procedure this protocol version does not define.
    Unknown(i32),
    /// The procedure is known but its arguments did not decode.
    Malformed { procedure: Procedure, error: RpcError },
}

/// Read the next request. `Ok(None)` when the client closed its end.
pub async fn recv_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Incoming>, RpcError> {
    let Some(mut frame) = read_frame(stream).await? else {
        return Ok(None);
    };
    if frame.remaining() < 4 {
        return Err(RpcError::protocol("request frame too short for procedure id"));
    }
    let id = frame.get_i32();
    let Some(procedure) = Procedure::from_id(id) else {
        return Ok(Some(Incoming::Unknown(id)));
    };
    Ok(Some(match Request::decode_args(procedure, &mut frame) {
        Ok(request) => Incoming::Request(request),
        Err(error) => Incoming::Malformed { procedure, error },
    }))
}

/// Send `Ok` and the payload. A payload that cannot be encoded (a row not
/// matching its descriptor) goes out as `Failed` and the error is returned
/// for the caller to log.
pub async fn send_reply<S: AsyncWrite + Unpin>(stream: &mut S, reply: &Reply) -> Result<(), RpcError> {
    let mut buf = BytesMut::new();
    buf.put_i32(Status::Ok.wire_id());
    if let Err(err) = reply.encode(&mut buf) {
        send_status(stream, Status::Failed).await?;
        return Err(err);
    }
    write_frame(stream, &buf).await
}

pub async fn send_status<S: AsyncWrite + Unpin>(stream: &mut S, status: Status) -> Result<(), RpcError> {
    let mut buf = BytesMut::new();
    buf.put_i32(status.wire_id());
    write_frame(stream, &buf).await
}

/// Tell the client whether initialization succeeded. `None` reports failure.
pub async fn write_handshake<S: AsyncWrite + Unpin>(
    stream: &mut S,
    driver_name: Option<&str>,
) -> Result<(), RpcError> {
    match driver_name {
        Some(name) => {
            send_reply(
                stream,
                &Reply::Version {
                    protocol: PROTOCOL_VERSION,
                    driver: name.to_string(),
                },
            )
            .await
        }
        None => send_status(stream, Status::Failed).await,
    }
}
