//! # Connection Handler
//!
//! Grounded on the teacher's `handle_connection` (one task per accepted
//! socket, read-loop writing each reply before reading the next), replacing
//! its fixed-size single-read-per-request buffer with an accumulating one
//! that grows to fit a request spanning more than one TCP read, and its
//! direct `handle_request`/`write_all` call with dispatch through
//! [`crate::cmd::dispatch`].
//!
//! Since a single request is always an array, it can contain multiple
//! commands. This is called
//! [pipelining](https://redis.io/docs/latest/develop/reference/protocol-spec/#multiple-commands-and-pipelining):
//! a client can issue several commands over one connection without waiting
//! for each reply before sending the next.

use crate::cmd::{self, Context};
use crate::constants::READ_CHUNK_LEN;
use crate::errors::ConnectionError;
use crate::resp::Message;
use bytes::{Bytes, BytesMut};
use log::{trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Handles every successive request on one accepted connection until EOF or
/// an unrecoverable parse error.
pub async fn handle_connection(mut stream: TcpStream, ctx: Context) -> Result<(), ConnectionError> {
    let peer_addr = stream.peer_addr()?;
    trace!("start handling requests from {peer_addr}");

    let mut buf = BytesMut::new();

    loop {
        let message = match read_one_message(&mut stream, &mut buf).await? {
            Some(message) => message,
            None => break,
        };

        let reply = dispatch_message(&ctx, message).await;
        stream.write_all(&reply.encode()).await?;
        stream.flush().await?;
    }

    trace!("stop handling requests from {peer_addr}");
    Ok(())
}

/// Reads bytes from `stream` into `buf` until either a complete message can
/// be decoded or the stream reaches EOF with no partial request pending.
/// Returns `Ok(None)` on a clean EOF; a malformed message is a protocol
/// error that terminates the connection.
async fn read_one_message(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<Option<Message>, ConnectionError> {
    loop {
        if !buf.is_empty() {
            // `split().freeze()` hands the accumulated bytes to `Bytes`
            // without copying; as long as nothing still borrows from it,
            // `try_into_mut` hands the same allocation back the same way.
            // Re-copying the whole buffer on every partial read here would
            // make assembling one large, slowly-arriving request quadratic
            // in its size.
            let snapshot = buf.split().freeze();
            match Message::deserialize(&snapshot) {
                Ok((message, consumed)) => {
                    let remainder = snapshot.slice(consumed..);
                    *buf = remainder
                        .try_into_mut()
                        .unwrap_or_else(|shared| BytesMut::from(&shared[..]));
                    return Ok(Some(message));
                }
                Err(crate::errors::RespError::Incomplete) => {
                    *buf = snapshot
                        .try_into_mut()
                        .unwrap_or_else(|shared| BytesMut::from(&shared[..]));
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut chunk = [0u8; READ_CHUNK_LEN];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if !buf.is_empty() {
                warn!("connection closed mid-request");
            }
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Enforces the top-level shape (array of >= 1 bulk strings, first is the
/// command name) and dispatches. Any other shape is a typed reply, not a
/// protocol error: the connection stays open.
async fn dispatch_message(ctx: &Context, message: Message) -> Message {
    let Message::Array(Some(items)) = message else {
        return malformed_request_reply();
    };
    let Some((head, rest)) = items.split_first() else {
        return malformed_request_reply();
    };
    let Message::BulkString(Some(name)) = head else {
        return malformed_request_reply();
    };
    let Ok(name) = String::from_utf8(name.to_vec()) else {
        return malformed_request_reply();
    };

    let mut args = Vec::with_capacity(rest.len());
    for item in rest {
        match item {
            Message::BulkString(Some(bytes)) => args.push(bytes.clone()),
            _ => return malformed_request_reply(),
        }
    }

    cmd::dispatch(ctx, &name, &args).await
}

fn malformed_request_reply() -> Message {
    Message::SimpleError(Bytes::from_static(
        b"ERR a request must be an array of bulk strings, first is the command name",
    ))
}
