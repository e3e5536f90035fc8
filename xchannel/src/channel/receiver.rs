//! Receive side of a channel.
//!
//! The read worker owns the stream half of the connection. It keeps a
//! receive deadline that every inbound frame pushes forward by the pong
//! wait, decodes data frames, and parks each decoded packet until the
//! consumer asks for it through the read pipe.

use std::cmp;
use std::sync::Weak;

use futures::StreamExt;
use futures::stream::SplitStream;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::adapter::Closer;
use crate::config::KeepAliveConfig;
use crate::error::Error;
use crate::message::{Message, MessagePacket};
use crate::pipe::{PipeEvent, Stop, WorkerPipe};

/// Background task driving the stream half of one connection.
pub(crate) struct ReadWorker<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pipe: WorkerPipe,
    config: KeepAliveConfig,
    closer: Weak<dyn Closer>,
}

impl<S> ReadWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        stream: SplitStream<WebSocketStream<S>>,
        pipe: WorkerPipe,
        config: KeepAliveConfig,
        closer: Weak<dyn Closer>,
    ) -> Self {
        Self {
            stream,
            pipe,
            config,
            closer,
        }
    }

    /// Runs until quit, adapter drop, or a fatal receive error.
    ///
    /// Each attempt waits at most one poll interval and never past the
    /// deadline, and races the quit signal, so a quit request preempts an
    /// attempt in flight and an expired deadline is noticed within one
    /// poll interval.
    pub(crate) async fn run(mut self) {
        debug!(
            "read worker started, pong wait {:?}, poll interval {:?}",
            self.config.pong_wait(),
            self.config.poll_interval()
        );

        let mut deadline = Instant::now() + self.config.pong_wait();
        // Decoded packet waiting for the consumer. Nothing is read while
        // it is occupied.
        let mut pending: Option<MessagePacket> = None;

        let stop = loop {
            let attempt_until = cmp::min(deadline, Instant::now() + self.config.poll_interval());

            tokio::select! {
                biased;
                event = self.pipe.next_event(pending.is_some()) => match event {
                    PipeEvent::Stop(stop) => break stop,
                    PipeEvent::Request(request) => {
                        if let Some(packet) = pending.take() {
                            // Keep the packet for the next caller if this one left.
                            pending = request.respond_with(packet).err();
                            if pending.is_none() {
                                // Liveness is only measured while reading.
                                deadline = Instant::now() + self.config.pong_wait();
                            }
                        }
                    }
                },
                attempt = timeout_at(attempt_until, self.stream.next()), if pending.is_none() => {
                    match attempt {
                        Err(_) => {
                            if Instant::now() >= deadline {
                                break Stop::Fatal(Error::Timeout(self.config.pong_wait()));
                            }
                        }
                        Ok(None) => break Stop::Fatal(Error::ConnectionClosed),
                        // The stream yields nothing after an error.
                        Ok(Some(Err(err))) => break Stop::Fatal(Error::from_ws(err)),
                        Ok(Some(Ok(frame))) => {
                            deadline = Instant::now() + self.config.pong_wait();
                            match frame {
                                WsMessage::Text(text) => {
                                    trace!("data frame received, {} bytes", text.len());
                                    pending = Some(decode(Message::from_text(&text)));
                                }
                                WsMessage::Binary(bytes) => {
                                    trace!("binary data frame received, {} bytes", bytes.len());
                                    pending = Some(decode(Message::from_slice(&bytes)));
                                }
                                // The pong reply is queued by the WebSocket layer.
                                WsMessage::Ping(_) => trace!("ping received"),
                                WsMessage::Pong(_) => trace!("pong received"),
                                WsMessage::Close(frame) => {
                                    debug!("close frame received: {:?}", frame);
                                    break Stop::Fatal(Error::ConnectionClosed);
                                }
                                WsMessage::Frame(_) => {}
                            }
                        }
                    }
                },
            }
        };

        let Self {
            stream,
            pipe,
            closer,
            ..
        } = self;
        drop(stream);
        pipe.finish(stop, &closer);
    }
}

fn decode(decoded: crate::Result<Message>) -> MessagePacket {
    if let Err(err) = &decoded {
        warn!("undecodable data frame: {}", err);
    }
    MessagePacket::received(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{HandlerPipe, PipeMode};
    use crate::testing::ws_pair;
    use futures::SinkExt;
    use serde_json::json;
    use tokio_tungstenite::tungstenite;
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
    use std::time::Duration;

    fn no_closer() -> Weak<dyn Closer> {
        Weak::<crate::adapter::WsAdapter>::new()
    }

    #[tokio::test]
    async fn test_data_frames_delivered_in_order() {
        let config = KeepAliveConfig::default();
        let (local, mut peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);
        tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        peer.send(WsMessage::Text(r#"{"n":1}"#.into())).await.unwrap();
        peer.send(WsMessage::Binary(br#"{"n":2}"#.to_vec())).await.unwrap();

        for n in 1..=2 {
            let packet = pipe.exchange(MessagePacket::empty()).await.unwrap();
            assert_eq!(packet.into_message().unwrap(), Message::from(json!({"n": n})));
        }
    }

    #[tokio::test]
    async fn test_decode_error_is_not_fatal() {
        let config = KeepAliveConfig::default();
        let (local, mut peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);
        tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        peer.send(WsMessage::Text("{broken".into())).await.unwrap();
        peer.send(WsMessage::Text("true".into())).await.unwrap();

        let first = pipe.exchange(MessagePacket::empty()).await.unwrap();
        assert!(matches!(first.into_message(), Err(Error::Decode(_))));
        let second = pipe.exchange(MessagePacket::empty()).await.unwrap();
        assert_eq!(second.into_message().unwrap(), Message::from(json!(true)));
        assert!(pipe.is_running());
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_frame_reported_once() {
        let config = KeepAliveConfig::default();
        let (local, mut peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);
        let handle = tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        let invalid = Frame::message(vec![0xff, 0xfe, 0x22], OpCode::Data(Data::Text), true);
        peer.send(WsMessage::Frame(invalid)).await.unwrap();
        peer.send(WsMessage::Text("true".into())).await.unwrap();

        let outcome = pipe.exchange(MessagePacket::empty()).await;
        assert!(
            matches!(&outcome, Err(Error::WebSocket(tungstenite::Error::Utf8))),
            "{:?}",
            outcome
        );
        handle.await.unwrap();
        assert!(!pipe.is_running());
        assert!(matches!(
            pipe.exchange(MessagePacket::empty()).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_fatal() {
        let config = KeepAliveConfig::default()
            .with_pong_wait(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(100));
        let (local, _peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);

        let started = Instant::now();
        tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        let outcome = pipe.exchange(MessagePacket::empty()).await;
        let elapsed = started.elapsed();
        assert!(matches!(outcome, Err(Error::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_quit_preempts_pending_attempt() {
        let config = KeepAliveConfig::default();
        let (local, _peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);
        let handle = tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_millis(200), pipe.request_quit())
            .await
            .unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let config = KeepAliveConfig::default();
        let (local, mut peer) = ws_pair(&config).await;
        let (_sink, stream) = local.split();
        let (pipe, worker) = HandlerPipe::new(PipeMode::Read);
        tokio::spawn(ReadWorker::new(stream, worker, config, no_closer()).run());

        peer.close(None).await.unwrap();
        assert!(matches!(
            pipe.exchange(MessagePacket::empty()).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
