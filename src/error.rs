//! Defines error handling constructs for the MSRP transport.
//!
//! Errors are grouped by where they surface. [`SendError`] is returned synchronously to whoever
//! called [`Transport::one_way`](crate::transport::Transport::one_way), [`DecodeError`] is produced
//! while reading a message off a socket, and [`CloseReason`] records why a persistent connection
//! stopped. Notification failures are reported as [`NotifyError`] and are only ever logged.

use std::{io, time::Duration};

use thiserror::Error;

use crate::address::ConnectionKey;

/// Error that can occur when sending a request.
///
/// Only failures up to and including enqueueing the request are reported here. Once a request is
/// sitting in a connection's write queue, any later failure tears the connection down instead.
#[derive(Debug, Error)]
pub enum SendError {
    /// The TCP connection could not be established.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// The `host:port` authority that was dialed.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The TCP connection was not established within the configured dial timeout.
    #[error("dial to {addr} timed out after {timeout:?}")]
    DialTimeout {
        /// The `host:port` authority that was dialed.
        addr: String,
        /// The timeout which elapsed.
        timeout: Duration,
    },
    /// The To-Path does not carry a network authority to connect to.
    #[error("to-path has no network authority: {0:?}")]
    InvalidPath(String),
    /// The connection serving this request is shutting down.
    ///
    /// Sending again will dial a fresh connection.
    #[error("connection to {0} is closed")]
    ConnectionClosed(ConnectionKey),
}

impl SendError {
    /// Returns `true` if the error happened while establishing the TCP connection.
    pub fn is_dial_error(&self) -> bool {
        matches!(self, SendError::Dial { .. } | SendError::DialTimeout { .. })
    }
}

/// Error that can occur when decoding a message from a byte stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream ended cleanly before the first line of a message.
    #[error("end of stream")]
    EndOfStream,
    /// The stream ended after the first line but before the end-line of the message.
    #[error("message {transaction_id} ended before its end-line")]
    Truncated {
        /// Transaction id parsed from the first line.
        transaction_id: String,
    },
    /// The first line is not a valid MSRP request or response line.
    #[error("malformed first line: {line:?}")]
    Framing {
        /// The offending line, without its line terminator.
        line: String,
    },
    /// The message exceeded the configured maximum size.
    #[error("message exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },
    /// Reading from the underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Returns `true` for a clean end of stream between messages.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DecodeError::EndOfStream)
    }

    /// Returns `true` if the bytes on the wire did not form a valid message.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            DecodeError::Framing { .. } | DecodeError::Truncated { .. } | DecodeError::TooLarge { .. }
        )
    }
}

/// Reason for a persistent connection leaving the open state.
#[derive(Debug, Error)]
pub enum CloseReason {
    /// The peer closed the connection between messages.
    #[error("peer closed the connection")]
    EndOfStream,
    /// An inbound message could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] DecodeError),
    /// Writing or flushing an outbound message failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
    /// The connection tasks stopped without closing the connection, typically because the
    /// runtime they were spawned on shut down.
    #[error("connection tasks stopped")]
    TasksStopped,
}

impl From<DecodeError> for CloseReason {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::EndOfStream => CloseReason::EndOfStream,
            err => CloseReason::Decode(err),
        }
    }
}

/// Error that can occur when forwarding a received message to the notification endpoint.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notification URL could not be parsed.
    #[error("invalid notification url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The HTTP request failed or returned an error status.
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
}
