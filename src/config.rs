//! Configuration for a [`Transport`](crate::transport::Transport).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default size of the read and write buffers wrapping each socket.
pub const DEFAULT_BUFFER_SIZE: usize = 4 << 10;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default upper bound for a single inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Default capacity of the inbound event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for a transport and the connections it opens.
///
/// Every field has a default, so partial configurations deserialize cleanly:
///
/// ```
/// use msrp::TransportConfig;
///
/// let config: TransportConfig =
///     serde_json::from_str(r#"{ "notify_url": "http://localhost:3000/recieve" }"#).unwrap();
/// assert_eq!(config.notify_url.as_deref(), Some("http://localhost:3000/recieve"));
/// assert_eq!(config.queue_capacity, msrp::config::DEFAULT_QUEUE_CAPACITY);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for establishing a TCP connection.
    pub dial_timeout: Duration,
    /// Size of the buffered reader wrapping each socket. Zero selects the default.
    pub read_buffer_size: usize,
    /// Size of the buffered writer wrapping each socket. Zero selects the default.
    pub write_buffer_size: usize,
    /// Capacity of each connection's outbound queue. Senders wait while it is full.
    pub queue_capacity: usize,
    /// Upper bound in bytes for a single inbound message.
    pub max_message_size: usize,
    /// Base URL receiving a GET for every inbound text message, or `None` to disable.
    pub notify_url: Option<String>,
    /// Capacity of the broadcast channel returned by
    /// [`Transport::subscribe`](crate::transport::Transport::subscribe).
    pub event_capacity: usize,
}

impl TransportConfig {
    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the read and write buffer sizes.
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Sets the outbound queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the maximum inbound message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the notification URL.
    pub fn with_notify_url(mut self, url: impl Into<String>) -> Self {
        self.notify_url = Some(url.into());
        self
    }

    pub(crate) fn read_buffer_size(&self) -> usize {
        non_zero_or(self.read_buffer_size, DEFAULT_BUFFER_SIZE)
    }

    pub(crate) fn write_buffer_size(&self) -> usize {
        non_zero_or(self.write_buffer_size, DEFAULT_BUFFER_SIZE)
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub(crate) fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            notify_url: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value > 0 {
        value
    } else {
        default
    }
}
