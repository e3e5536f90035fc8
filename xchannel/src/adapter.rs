//! Adapter capability set and its WebSocket variant.
//!
//! An adapter owns one connection and the two pipes linking callers to
//! the read and write workers. Further transports are added as further
//! implementations of [`Adapter`], chosen when the channel is built.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;
use tokio_tungstenite::WebSocketStream;

use crate::channel::receiver::ReadWorker;
use crate::channel::sender::WriteWorker;
use crate::config::KeepAliveConfig;
use crate::error::{Error, Result};
use crate::message::{Message, MessagePacket};
use crate::pipe::{HandlerPipe, PipeMode};

/// Something that can be shut down.
///
/// Workers hold it to close their adapter after a fatal error.
#[async_trait]
pub trait Closer: Send + Sync {
    /// Shuts the connection down. Idempotent and safe to call concurrently.
    async fn close(&self) -> Result<()>;
}

/// Operations every channel transport provides.
#[async_trait]
pub trait Adapter: Closer {
    /// Sends one message and waits for the outcome of the write.
    async fn send(&self, message: Message) -> Result<()>;

    /// Waits for the next message from the peer.
    async fn receive(&self) -> Result<Message>;

    /// Returns false once [`Closer::close`] has started.
    fn is_connected(&self) -> bool;
}

/// WebSocket variant of [`Adapter`].
pub struct WsAdapter {
    connected: AtomicBool,
    closed: OnceCell<()>,
    read_pipe: HandlerPipe,
    write_pipe: HandlerPipe,
    config: KeepAliveConfig,
}

impl WsAdapter {
    /// Takes over an upgraded connection and starts its read and write
    /// workers. Must be called within a Tokio runtime.
    pub fn spawn<S>(ws: WebSocketStream<S>, config: KeepAliveConfig) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;

        let (sink, stream) = ws.split();
        let (read_pipe, read_end) = HandlerPipe::new(PipeMode::Read);
        let (write_pipe, write_end) = HandlerPipe::new(PipeMode::Write);

        let adapter = Arc::new(Self {
            connected: AtomicBool::new(true),
            closed: OnceCell::new(),
            read_pipe,
            write_pipe,
            config,
        });
        // Workers must not keep the adapter alive on their own.
        let weak = Arc::downgrade(&adapter);
        let closer: Weak<dyn Closer> = weak;

        tokio::spawn(WriteWorker::new(sink, write_end, config, closer.clone()).run());
        tokio::spawn(ReadWorker::new(stream, read_end, config, closer).run());

        Ok(adapter)
    }

    pub fn config(&self) -> &KeepAliveConfig {
        &self.config
    }

    /// Returns true once both workers have acknowledged the close.
    pub fn is_closed(&self) -> bool {
        self.closed.initialized()
    }

    /// The error to hand out when a call arrives after the close started:
    /// the worker's unclaimed fatal error if there is one.
    fn closed_error(pipe: &HandlerPipe) -> Error {
        pipe.try_error_report().unwrap_or(Error::ChannelClosed)
    }
}

#[async_trait]
impl Closer for WsAdapter {
    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed
            .get_or_init(|| async {
                debug!("closing channel, stopping workers");
                tokio::join!(self.read_pipe.request_quit(), self.write_pipe.request_quit());
                info!("channel closed");
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Adapter for WsAdapter {
    async fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Self::closed_error(&self.write_pipe));
        }
        self.write_pipe
            .exchange(MessagePacket::new(message))
            .await?
            .into_outcome()
    }

    async fn receive(&self) -> Result<Message> {
        if !self.is_connected() {
            return Err(Self::closed_error(&self.read_pipe));
        }
        self.read_pipe
            .exchange(MessagePacket::empty())
            .await?
            .into_message()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for WsAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsAdapter")
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("read_pipe", &self.read_pipe)
            .field("write_pipe", &self.write_pipe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ws_pair;
    use futures::SinkExt;
    use futures::future::join_all;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::{Instant, timeout};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[tokio::test]
    async fn test_round_trip_between_adapters() {
        let config = KeepAliveConfig::default();
        let (left, right) = ws_pair(&config).await;
        let left = WsAdapter::spawn(left, config).unwrap();
        let right = WsAdapter::spawn(right, config).unwrap();

        let message = Message::from(json!({"nonce": 7, "sig": "0xdeadbeef"}));
        left.send(message.clone()).await.unwrap();
        assert_eq!(right.receive().await.unwrap(), message);

        right.send(Message::from(json!("ack"))).await.unwrap();
        assert_eq!(left.receive().await.unwrap(), Message::from(json!("ack")));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = KeepAliveConfig::default()
            .with_pong_wait(Duration::from_secs(1))
            .with_ping_period(Duration::from_secs(2));
        let (left, _right) = ws_pair(&config).await;
        assert!(matches!(
            WsAdapter::spawn(left, config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_detected() {
        let config = KeepAliveConfig::default()
            .with_pong_wait(Duration::from_millis(200))
            .with_ping_period(Duration::from_millis(180))
            .with_poll_interval(Duration::from_millis(100));
        // The peer never reads, so probes go unanswered.
        let (left, _silent) = ws_pair(&config).await;

        let started = Instant::now();
        let adapter = WsAdapter::spawn(left, config).unwrap();
        let outcome = adapter.receive().await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, Err(Error::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(400), "{:?}", elapsed);

        timeout(Duration::from_secs(1), async {
            while !adapter.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_answered_probes_keep_channel_open() {
        let config = KeepAliveConfig::default()
            .with_pong_wait(Duration::from_millis(200))
            .with_ping_period(Duration::from_millis(100));
        let (left, right) = ws_pair(&config).await;
        let left = WsAdapter::spawn(left, config).unwrap();
        // A reading peer answers every ping with a pong.
        let right = WsAdapter::spawn(right, KeepAliveConfig::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(left.is_connected());

        right.send(Message::from(json!(1))).await.unwrap();
        assert_eq!(left.receive().await.unwrap(), Message::from(json!(1)));
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_closes_channel() {
        let config = KeepAliveConfig::default()
            .with_max_message_size(1024)
            .with_write_wait(Duration::from_millis(300));
        let (left, mut peer) = ws_pair(&config).await;
        let adapter = WsAdapter::spawn(left, config).unwrap();

        tokio::spawn(async move {
            let oversized = format!("\"{}\"", "x".repeat(2046));
            let _ = peer.send(WsMessage::Text(oversized)).await;
            // Keep the peer open; the adapter must close on its own.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let outcome = adapter.receive().await;
        assert!(matches!(&outcome, Err(err) if err.is_fatal()), "{:?}", outcome);

        timeout(Duration::from_secs(2), async {
            while !adapter.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            adapter.send(Message::from(json!("late"))).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_blocked_send_released_by_close() {
        let config = KeepAliveConfig::default().with_write_wait(Duration::from_millis(300));
        // Tiny buffer and a peer that never reads: the write stalls.
        let (local, _peer) = tokio::io::duplex(64);
        let ws = WebSocketStream::from_raw_socket(
            local,
            tokio_tungstenite::tungstenite::protocol::Role::Client,
            Some(config.websocket_config()),
        )
        .await;
        let adapter = WsAdapter::spawn(ws, config).unwrap();

        let sender = adapter.clone();
        let send = tokio::spawn(async move {
            sender
                .send(Message::from(json!("y".repeat(900))))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        adapter.close().await.unwrap();

        let outcome = timeout(Duration::from_secs(3), send).await.unwrap().unwrap();
        assert!(outcome.is_err());
        assert!(adapter.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_close_is_idempotent() {
        let config = KeepAliveConfig::default();
        let (left, mut peer) = ws_pair(&config).await;
        let adapter = WsAdapter::spawn(left, config).unwrap();

        let results = join_all((0..8).map(|_| adapter.close())).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(adapter.is_closed());
        assert!(!adapter.is_connected());

        let mut close_frames = 0;
        while let Ok(Some(frame)) = timeout(Duration::from_secs(1), peer.next()).await {
            match frame {
                Ok(WsMessage::Close(_)) => close_frames += 1,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(close_frames, 1);
    }

    #[tokio::test]
    async fn test_peer_close_reported_once() {
        let config = KeepAliveConfig::default();
        let (left, mut peer) = ws_pair(&config).await;
        let adapter = WsAdapter::spawn(left, config).unwrap();

        peer.close(None).await.unwrap();
        assert!(matches!(adapter.receive().await, Err(Error::ConnectionClosed)));
        assert!(matches!(adapter.receive().await, Err(Error::ChannelClosed)));
    }
}
