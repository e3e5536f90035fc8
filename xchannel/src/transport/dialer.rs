use log::{debug, info};
use tokio_tungstenite::{MaybeTlsStream, connect_async_with_config};

use crate::channel::ChannelInstance;
use crate::config::KeepAliveConfig;
use crate::error::{Error, Result};

/// Connects to `ws://{addr}{endpoint}` and starts a channel over it.
///
/// `addr` is a `host:port` pair. A failed connect or upgrade is returned
/// as is; retrying is up to the caller.
pub async fn dial(addr: &str, endpoint: &str, config: KeepAliveConfig) -> Result<ChannelInstance> {
    config.validate()?;
    if !endpoint.starts_with('/') {
        return Err(Error::InvalidConfig(format!(
            "endpoint {:?} must start with '/'",
            endpoint
        )));
    }

    let url = format!("ws://{}{}", addr, endpoint);
    debug!("dialing {}", url);
    let (ws, response) =
        connect_async_with_config(url.as_str(), Some(config.websocket_config()), false).await?;
    debug!("upgrade response status {}", response.status());

    let peer = match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };

    let instance = ChannelInstance::websocket(ws, config)?;
    info!("channel opened to {}", url);
    Ok(match peer {
        Some(peer) => instance.with_peer_addr(peer),
        None => instance,
    })
}
