//! RESP2 front end.
//!
//! One task per connection decodes request arrays, runs them through
//! [`commands::execute`] as client traffic and writes the reply frame back.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::commands::{self, Origin, Reply};
use crate::NodeState;

/// Accept RESP clients until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<NodeState>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(socket, state).await {
                tracing::debug!(error = ?err, %peer, "resp connection closed");
            }
        });
    }
}

async fn handle_conn(socket: TcpStream, state: Arc<NodeState>) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, Resp2::default());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let resp = match parse_argv(frame) {
            Ok(Some(argv)) => to_frame(commands::execute(&state, Origin::Client, &argv)),
            Ok(None) => continue,
            Err(err) => BytesFrame::Error(format!("ERR {err}").into()),
        };
        framed.send(resp).await?;
    }
    Ok(())
}

/// Flatten a request array into raw argument bytes.
fn parse_argv(frame: BytesFrame) -> anyhow::Result<Option<Vec<Vec<u8>>>> {
    let BytesFrame::Array(parts) = frame else {
        anyhow::bail!("expected array frame");
    };
    if parts.is_empty() {
        return Ok(None);
    }
    parts
        .iter()
        .map(|part| frame_bytes(part).ok_or_else(|| anyhow::anyhow!("invalid argument")))
        .collect::<anyhow::Result<Vec<_>>>()
        .map(Some)
}

fn frame_bytes(frame: &BytesFrame) -> Option<Vec<u8>> {
    match frame {
        BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => Some(b.to_vec()),
        _ => None,
    }
}

fn to_frame(reply: Reply) -> BytesFrame {
    match reply {
        Reply::Ok => BytesFrame::SimpleString(Bytes::from_static(b"OK")),
        Reply::Status(status) => BytesFrame::SimpleString(Bytes::from_static(status.as_bytes())),
        Reply::Bulk(data) => BytesFrame::BulkString(Bytes::from(data)),
        Reply::Array(items) => BytesFrame::Array(items.into_iter().map(to_frame).collect()),
        Reply::Error(msg) => BytesFrame::Error(msg.into()),
    }
}
