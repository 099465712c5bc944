//! Ledger socket
//!
//! Frames in, frames out. JSON-RPC ids and subscriptions live in `rpc`.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{MigrateError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outgoing half of the ledger socket
pub type WsSink = SplitSink<Socket, Message>;

/// Incoming half of the ledger socket
pub type WsStream = SplitStream<Socket>;

/// Open the socket, giving up after `timeout`. Every failure, including a
/// bad URL, is `LedgerConnect`.
pub async fn connect(endpoint: &str, timeout: Duration) -> Result<(WsSink, WsStream)> {
    debug!(endpoint = %endpoint, timeout = ?timeout, "Opening ledger socket");

    let failed = |reason: String| MigrateError::LedgerConnect {
        endpoint: endpoint.to_string(),
        reason,
    };

    let (socket, response) = tokio::time::timeout(timeout, connect_async(endpoint))
        .await
        .map_err(|_| failed(format!("no handshake within {:?}", timeout)))?
        .map_err(|e| failed(e.to_string()))?;

    debug!(endpoint = %endpoint, status = %response.status(), "Ledger socket open");
    Ok(socket.split())
}

pub async fn send_text(sink: &mut WsSink, text: String) -> Result<()> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| MigrateError::Ledger(format!("send failed: {}", e)))
}

/// Next text payload, or `None` once the node has closed the socket.
///
/// UTF-8 binary frames are treated as text. Control frames are skipped.
pub async fn recv_text(stream: &mut WsStream) -> Result<Option<String>> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Ok(Some(text)),
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data) {
                    return Ok(Some(text));
                }
                debug!("Dropping non-UTF-8 binary frame");
            }
            Ok(Message::Close(frame)) => {
                debug!(frame = ?frame, "Ledger sent close");
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) => return Err(MigrateError::Ledger(format!("socket error: {}", e))),
        }
    }
    Ok(None)
}
