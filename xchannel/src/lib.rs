//! # XChannel - Message Channels over WebSocket
//!
//! XChannel carries discrete messages between two peers over one
//! long-lived connection and provides:
//!
//! - **Serialized writes**: one write worker per connection owns the sink
//! - **Liveness detection**: periodic pings and a receive deadline catch
//!   peers that vanish without closing
//! - **Coordinated shutdown**: caller close, peer close and timeout all
//!   end in a single idempotent close
//! - **Backpressure**: the listener holds a bounded number of unconsumed
//!   connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Protocol Layer                         │
//! │          send / receive / close on ChannelInstance       │
//! ├─────────────────────────────────────────────────────────┤
//! │                   Adapter (WsAdapter)                    │
//! │  ┌──────────────────────┐   ┌──────────────────────┐    │
//! │  │  HandlerPipe (write) │   │  HandlerPipe (read)  │    │
//! │  └──────────┬───────────┘   └──────────┬───────────┘    │
//! │  ┌──────────┴───────────┐   ┌──────────┴───────────┐    │
//! │  │ Write worker + pings │   │ Read worker+deadline │    │
//! │  └──────────────────────┘   └──────────────────────┘    │
//! ├─────────────────────────────────────────────────────────┤
//! │                   Transport Layer                        │
//! │        Listener (accept + upgrade + queue) / dial        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use xchannel::{dial, KeepAliveConfig, ListenerConfig, Listener, Message};
//!
//! let (listener, mut incoming) =
//!     Listener::bind("127.0.0.1:8080", ListenerConfig::default(), KeepAliveConfig::default()).await?;
//!
//! let client = dial("127.0.0.1:8080", "/", KeepAliveConfig::default()).await?;
//! client.send(Message::new(&"hello")?).await?;
//!
//! let server = incoming.recv().await.unwrap();
//! let message = server.receive().await?;
//! ```

#![deny(unsafe_code)]

pub mod adapter;
pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod pipe;
pub mod transport;

#[cfg(test)]
mod testing;

pub use adapter::{Adapter, Closer, WsAdapter};
pub use channel::ChannelInstance;
pub use config::{KeepAliveConfig, ListenerConfig};
pub use error::{Error, Result};
pub use message::{Message, MessagePacket};
pub use pipe::{HandlerPipe, PipeMode};
pub use transport::{Incoming, Listener, dial};
