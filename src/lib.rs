//! An MSRP client for sending and receiving instant messages over persistent TCP connections.
//!
//! Messages are `SEND` requests framed by a random transaction id, carrying their text inside a
//! CPIM envelope. Conversations whose To-Paths share a network authority share one connection,
//! which stays open until the peer closes it, sends something undecodable, or a write fails.
//! Received requests are acknowledged automatically.
//!
//! # Overview
//! - [`Request`] and [`Response`] build messages together with their exact wire form.
//! - [`codec`] reads and writes messages on any async byte stream.
//! - [`Transport`] manages persistent connections and sends requests fire-and-forget.
//! - [`Client`] is a thin façade over a transport, by default the shared [`DEFAULT_TRANSPORT`].
//!
//! # Example
//!
//! ```no_run
//! use msrp::{Request, Transport, TransportConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), msrp::error::SendError> {
//! let transport = Transport::new(
//!     TransportConfig::default().with_notify_url("http://localhost:3000/recieve"),
//! );
//! let mut events = transport.subscribe();
//!
//! transport
//!     .one_way(Request::new(
//!         "msrp://localhost:9670/pxd512029144298;tcp",
//!         "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
//!         "+8210",
//!         "+8211",
//!         "Hello!",
//!     ))
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod address;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod message;
pub mod notify;
pub mod transport;

pub use address::{AddressKey, ConnectionKey, RoutingAddress};
pub use client::Client;
pub use config::TransportConfig;
pub use error::{CloseReason, DecodeError, SendError};
pub use message::{Message, Request, Response};
pub use transport::{
    connection::{ConnectionHandle, ConnectionId, ConnectionState},
    Transport, TransportEvent, DEFAULT_TRANSPORT,
};
