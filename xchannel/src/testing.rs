use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::config::KeepAliveConfig;

/// Two ends of an in-memory WebSocket connection.
///
/// The first end enforces `config`'s size limits, the second uses the
/// WebSocket defaults.
pub(crate) async fn ws_pair(
    config: &KeepAliveConfig,
) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let local =
        WebSocketStream::from_raw_socket(local, Role::Client, Some(config.websocket_config())).await;
    let remote = WebSocketStream::from_raw_socket(remote, Role::Server, None).await;
    (local, remote)
}
