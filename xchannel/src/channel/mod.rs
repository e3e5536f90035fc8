//! Caller-facing channel handle and the workers behind it.
//!
//! A [`ChannelInstance`] wraps one adapter. Sends and receives rendezvous
//! with the adapter's write and read workers, which live in [`sender`] and
//! [`receiver`].

pub(crate) mod receiver;
pub(crate) mod sender;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;

use crate::adapter::{Adapter, WsAdapter};
use crate::config::KeepAliveConfig;
use crate::error::Result;
use crate::message::Message;

/// Handle used by the protocol layer to talk to one peer.
///
/// Methods take `&self`, so the handle can be shared behind an `Arc`.
/// Concurrent sends are serialized here: at most one send is outstanding
/// per adapter, and likewise for receives.
pub struct ChannelInstance {
    adapter: Arc<dyn Adapter>,
    peer_addr: Option<SocketAddr>,
    send_lock: Mutex<()>,
    receive_lock: Mutex<()>,
}

impl ChannelInstance {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            peer_addr: None,
            send_lock: Mutex::new(()),
            receive_lock: Mutex::new(()),
        }
    }

    /// Builds a channel over an upgraded WebSocket connection.
    pub fn websocket<S>(ws: WebSocketStream<S>, config: KeepAliveConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Ok(Self::new(WsAdapter::spawn(ws, config)?))
    }

    pub(crate) fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Sends one message, returning once the write has completed.
    pub async fn send(&self, message: Message) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        self.adapter.send(message).await
    }

    /// Waits for the next message.
    ///
    /// A frame that fails to decode yields [`Error::Decode`] and the
    /// channel stays open. A fatal error is returned once; later calls
    /// return [`Error::ChannelClosed`].
    ///
    /// [`Error::Decode`]: crate::Error::Decode
    /// [`Error::ChannelClosed`]: crate::Error::ChannelClosed
    pub async fn receive(&self) -> Result<Message> {
        let _guard = self.receive_lock.lock().await;
        self.adapter.receive().await
    }

    /// Closes the channel and waits for both workers to stop.
    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl fmt::Debug for ChannelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInstance")
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
