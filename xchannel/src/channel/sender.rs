//! Send side of a channel.
//!
//! The write worker is the only writer on the connection. Data frames
//! requested through the write pipe and the periodic liveness probes are
//! serialized through it.

use std::sync::Weak;

use futures::SinkExt;
use futures::stream::SplitSink;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::adapter::Closer;
use crate::config::KeepAliveConfig;
use crate::error::{Error, Result};
use crate::message::MessagePacket;
use crate::pipe::{Exchange, PipeEvent, Stop, WorkerPipe};

/// Background task driving the sink half of one connection.
pub(crate) struct WriteWorker<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    pipe: WorkerPipe,
    config: KeepAliveConfig,
    closer: Weak<dyn Closer>,
}

impl<S> WriteWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        sink: SplitSink<WebSocketStream<S>, WsMessage>,
        pipe: WorkerPipe,
        config: KeepAliveConfig,
        closer: Weak<dyn Closer>,
    ) -> Self {
        Self {
            sink,
            pipe,
            config,
            closer,
        }
    }

    /// Runs until quit, adapter drop, or a fatal write error.
    ///
    /// Quit is checked first on every iteration; a write already in
    /// progress finishes or times out after the write wait.
    pub(crate) async fn run(mut self) {
        let period = self.config.ping_period();
        debug!("write worker started, ping period {:?}", period);

        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = loop {
            tokio::select! {
                biased;
                event = self.pipe.next_event(true) => match event {
                    PipeEvent::Stop(stop) => break stop,
                    PipeEvent::Request(request) => {
                        if let Err(err) = self.handle_request(request).await {
                            break Stop::Fatal(err);
                        }
                    }
                },
                _ = ping.tick() => {
                    trace!("sending ping");
                    if let Err(err) = self.write_frame(WsMessage::Ping(Vec::new())).await {
                        break Stop::Fatal(err);
                    }
                }
            }
        };

        let Self {
            mut sink,
            pipe,
            config,
            closer,
        } = self;
        if !matches!(stop, Stop::Fatal(_)) {
            match timeout(config.write_wait(), sink.close()).await {
                Ok(Ok(())) => debug!("close frame sent"),
                Ok(Err(err)) => debug!("close frame not sent: {}", err),
                Err(_) => warn!("close frame not sent within {:?}", config.write_wait()),
            }
        }
        drop(sink);
        pipe.finish(stop, &closer);
    }

    /// Writes the requested message and returns the outcome to the caller.
    ///
    /// A fatal error is returned instead and the request is dropped
    /// unanswered; the caller receives the error from the error report.
    async fn handle_request(&mut self, mut request: Exchange) -> Result<()> {
        match self.write_packet(request.packet()).await {
            Err(err) if err.is_fatal() => Err(err),
            outcome => {
                request.packet_mut().set_outcome(outcome);
                request.respond();
                Ok(())
            }
        }
    }

    async fn write_packet(&mut self, packet: &MessagePacket) -> Result<()> {
        let Some(message) = packet.message() else {
            return Ok(());
        };
        let text = message.encode()?;
        let max = self.config.max_message_size();
        if text.len() > max {
            return Err(Error::MessageTooLarge {
                size: text.len(),
                max,
            });
        }
        trace!("sending data frame, {} bytes", text.len());
        self.write_frame(WsMessage::Text(text)).await
    }

    async fn write_frame(&mut self, frame: WsMessage) -> Result<()> {
        let wait = self.config.write_wait();
        match timeout(wait, self.sink.send(frame)).await {
            Ok(sent) => sent.map_err(Error::from_ws),
            Err(_) => Err(Error::WriteTimeout(wait)),
        }
    }
}
