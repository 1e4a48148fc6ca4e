//! Sending requests over shared persistent connections.
//!
//! A [`Transport`] owns a registry of persistent connections keyed by the network authority of
//! their To-Path. Sending a request either reuses the live connection for that authority or
//! dials a new one, then places the request on the connection's outbound queue and returns.
//!
//! Each connection runs two tasks. The write task drains the outbound queue onto the socket. The
//! read task decodes inbound messages, acknowledges every request with a `200 OK`, forwards text
//! messages to the configured [`Notifier`], and publishes everything it receives as a
//! [`TransportEvent`]. When either task fails, the connection closes and removes itself, along
//! with every conversation routed over it, from the registry. The next send to the same
//! authority dials afresh.
//!
//! ```no_run
//! use msrp::{Request, Transport, TransportConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), msrp::error::SendError> {
//! let transport = Transport::new(TransportConfig::default());
//! let request = Request::new(
//!     "msrp://localhost:9670/pxd512029144298;tcp",
//!     "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
//!     "+8210",
//!     "+8211",
//!     "Hello!",
//! );
//! transport.one_way(request).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
mod registry;

use std::{fmt, sync::Arc};

use once_cell::sync::Lazy;
use tokio::{net::TcpStream, sync::broadcast, time};
use tracing::{debug, trace, warn};

use crate::{
    address::{AddressKey, ConnectionKey, RoutingAddress},
    config::TransportConfig,
    error::{CloseReason, SendError},
    message::{Request, Response},
    notify::{HttpNotifier, Notifier},
};

use self::{
    connection::{ConnectionHandle, ConnectionId, PendingConnection, TaskContext},
    registry::ConnectionRegistry,
};

/// A process wide transport with the default configuration, created on first use.
///
/// Prefer constructing a [`Transport`] directly when isolation matters, such as in tests.
pub static DEFAULT_TRANSPORT: Lazy<Transport> =
    Lazy::new(|| Transport::new(TransportConfig::default()));

/// Something observed on one of a transport's connections.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A request was received and acknowledged.
    Request {
        /// The connection the request arrived on.
        connection: ConnectionKey,
        /// The decoded request.
        request: Request,
    },
    /// A response was received.
    Response {
        /// The connection the response arrived on.
        connection: ConnectionKey,
        /// The decoded response.
        response: Response,
    },
    /// A connection closed and was evicted.
    Closed {
        /// The authority the connection was dialed to.
        connection: ConnectionKey,
        /// The id of the closed connection.
        id: ConnectionId,
        /// Why the connection closed.
        reason: Arc<CloseReason>,
    },
}

struct Inner {
    config: TransportConfig,
    registry: Arc<ConnectionRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
    events: broadcast::Sender<TransportEvent>,
}

/// Sends MSRP requests over shared persistent connections.
///
/// Cloning a transport is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Creates a transport.
    ///
    /// If `config.notify_url` is set, inbound text messages are forwarded to it with an
    /// [`HttpNotifier`]. An unparsable URL disables notifications and is logged.
    pub fn new(config: TransportConfig) -> Self {
        let notifier = config
            .notify_url
            .as_deref()
            .and_then(|url| match HttpNotifier::new(url) {
                Ok(notifier) => Some(Arc::new(notifier) as Arc<dyn Notifier>),
                Err(err) => {
                    warn!(%url, %err, "notifications disabled");
                    None
                }
            });

        Transport::build(config, notifier)
    }

    /// Creates a transport forwarding inbound text messages to `notifier`.
    ///
    /// `config.notify_url` is ignored.
    pub fn with_notifier(config: TransportConfig, notifier: Arc<dyn Notifier>) -> Self {
        Transport::build(config, Some(notifier))
    }

    fn build(config: TransportConfig, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity());
        Transport {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(ConnectionRegistry::new()),
                notifier,
                events,
            }),
        }
    }

    /// The configuration this transport was created with.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Sends a request without waiting for it to be acknowledged.
    ///
    /// Resolves once the request is on the outbound queue of the connection for its To-Path,
    /// dialing that connection first if needed. Failures after that point close the connection
    /// instead of being reported here.
    pub async fn one_way(&self, request: Request) -> Result<(), SendError> {
        let routing = Transport::connect_method_for_request(&request);
        let handle = self.get_or_create(request.address_key(), routing).await?;

        trace!(
            connection = %handle.key(),
            tid = %request.transaction_id(),
            body = %request.body(),
            "sending request"
        );
        handle.enqueue(request).await
    }

    /// Returns the routing address a request travels along, taken from its own paths.
    pub fn connect_method_for_request(request: &Request) -> RoutingAddress {
        request.routing_address()
    }

    /// Returns the live connection for `routing`, dialing one if none exists.
    ///
    /// Either way `address_key` is recorded as routed over `routing`, so that
    /// [`connection_method`](Transport::connection_method) can report it afterwards. A failed
    /// dial leaves the registry untouched.
    pub async fn get_or_create(
        &self,
        address_key: AddressKey,
        routing: RoutingAddress,
    ) -> Result<ConnectionHandle, SendError> {
        let key = routing.connection_key()?;
        if let Some(handle) = self.inner.registry.reuse(&key, &address_key, &routing) {
            trace!(connection = %key, id = %handle.id(), %address_key, "reusing connection");
            return Ok(handle);
        }

        let stream = self.dial(&key).await?;
        let pending = PendingConnection::new(
            stream,
            key,
            address_key.clone(),
            routing.clone(),
            self.inner.config.queue_capacity(),
            Arc::downgrade(&self.inner.registry),
        );

        match self
            .inner
            .registry
            .publish(pending.handle(), &address_key, &routing)
        {
            Ok(()) => Ok(pending.start(self.task_context())),
            Err(existing) => {
                debug!(
                    connection = %existing.key(),
                    id = %existing.id(),
                    "connection was established concurrently, discarding redundant socket"
                );
                Ok(existing)
            }
        }
    }

    /// Returns the routing address last used to send from `sender` to `recipient`.
    pub fn connection_method(&self, sender: &str, recipient: &str) -> Option<RoutingAddress> {
        self.inner
            .registry
            .lookup(&AddressKey::new(sender, recipient))
    }

    /// Returns the live connection dialed to `key`, if any.
    pub fn connection(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        self.inner.registry.get(key)
    }

    /// Subscribes to messages received and connections closed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// The number of live connections. Connections that are closing are not counted.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.connection_count()
    }

    /// The number of conversations with a known routing address.
    pub fn address_count(&self) -> usize {
        self.inner.registry.address_count()
    }

    /// Closes every open connection.
    ///
    /// Connections finish tearing down in the background; await
    /// [`ConnectionHandle::closed`] to observe it. Returns the number of connections closed by
    /// this call.
    pub fn close_all(&self) -> usize {
        self.inner
            .registry
            .connections()
            .into_iter()
            .filter(|handle| handle.close(CloseReason::Shutdown))
            .count()
    }

    async fn dial(&self, key: &ConnectionKey) -> Result<TcpStream, SendError> {
        let addr = key.authority();
        let timeout = self.inner.config.dial_timeout;

        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                warn!(connection = %key, error = %source, "dial failed");
                return Err(SendError::Dial {
                    addr: addr.to_owned(),
                    source,
                });
            }
            Err(_) => {
                warn!(connection = %key, ?timeout, "dial timed out");
                return Err(SendError::DialTimeout {
                    addr: addr.to_owned(),
                    timeout,
                });
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(connection = %key, %err, "failed to set TCP_NODELAY");
        }

        Ok(stream)
    }

    fn task_context(&self) -> TaskContext {
        let config = &self.inner.config;
        TaskContext {
            read_buffer_size: config.read_buffer_size(),
            write_buffer_size: config.write_buffer_size(),
            max_message_size: config.max_message_size,
            notifier: self.inner.notifier.clone(),
            events: self.inner.events.clone(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.inner.config)
            .field("connections", &self.connection_count())
            .field("addresses", &self.address_count())
            .field("notifier", &self.inner.notifier.is_some())
            .finish()
    }
}
