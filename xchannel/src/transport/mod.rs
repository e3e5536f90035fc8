//! Connection bootstrap.
//!
//! [`Listener`] accepts TCP connections, upgrades them to WebSocket and
//! queues the resulting channels on a bounded [`Incoming`] queue. [`dial`]
//! is the client side: one connect and upgrade, no retry.

mod dialer;
mod listener;

pub use dialer::dial;
pub use listener::{Incoming, Listener};
