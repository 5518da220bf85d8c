//! Measure WebTransport datagram round trips over HTTP/3.
//!
//! A client opens a WebTransport session with an extended CONNECT, then sends `Message <n>` datagrams one at a
//! time, waiting for the server's `Received Message <n>` before sending the next. Each round trip feeds a running
//! [`Statistics`] record with an exponentially weighted moving average.
//!
//! The protocol core is sans-IO: [`TransportEvent`]s go through the [`h3::Framer`] and come out as [`H3Event`]s,
//! which the [`Demux`] hands to a session [`Handler`]. [`QuinnTransport`] connects that core to a Quinn connection.

// External
mod client;
mod config;
mod error;
mod export;
mod server;

pub use client::*;
pub use config::*;
pub use error::*;
pub use export::*;
pub use server::*;

// Protocol core
mod demux;
mod event;
mod headers;
mod pacer;
mod responder;
mod session;
mod stats;
mod transport;

pub use demux::*;
pub use event::*;
pub use headers::*;
pub use pacer::*;
pub use responder::*;
pub use session::*;
pub use stats::*;
pub use transport::*;

pub mod h3;
pub mod message;

pub static ALPN: &[u8] = b"h3";
