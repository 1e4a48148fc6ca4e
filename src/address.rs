//! Routing identities for MSRP conversations.
//!
//! A conversation is identified by its [`AddressKey`] (the application level sender and
//! recipient), routed with a [`RoutingAddress`] (the To-Path and From-Path URIs), and carried
//! over the socket identified by a [`ConnectionKey`] (the network authority of the To-Path).
//! Conversations whose To-Paths share an authority share one connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SendError;

/// Port used when a To-Path URI does not specify one.
pub const DEFAULT_PORT: u16 = 2855;

/// The To-Path and From-Path of a conversation, also known as its connect method.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingAddress {
    to_path: String,
    from_path: String,
}

impl RoutingAddress {
    /// Creates a routing address from a To-Path and From-Path.
    pub fn new(to_path: impl Into<String>, from_path: impl Into<String>) -> Self {
        RoutingAddress {
            to_path: to_path.into(),
            from_path: from_path.into(),
        }
    }

    /// The URI the message is sent to.
    pub fn to_path(&self) -> &str {
        &self.to_path
    }

    /// The URI the message claims to originate from.
    pub fn from_path(&self) -> &str {
        &self.from_path
    }

    /// Derives the key of the connection this routing address travels over.
    pub fn connection_key(&self) -> Result<ConnectionKey, SendError> {
        ConnectionKey::from_path(&self.to_path)
    }
}

/// The sender and recipient of a conversation, independent of any network endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressKey {
    sender: String,
    recipient: String,
}

impl AddressKey {
    /// Creates an address key.
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        AddressKey {
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    /// The sending party.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The receiving party.
    pub fn recipient(&self) -> &str {
        &self.recipient
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.sender, self.recipient)
    }
}

/// The `host:port` authority identifying one physical connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    authority: String,
}

impl ConnectionKey {
    /// Extracts the connection key from a To-Path.
    ///
    /// Only the first URI of a space separated path is considered. A URI without a port resolves
    /// to [`DEFAULT_PORT`].
    ///
    /// ```
    /// use msrp::address::ConnectionKey;
    ///
    /// let key = ConnectionKey::from_path("msrp://localhost:9670/pxd512029144298;tcp").unwrap();
    /// assert_eq!(key.authority(), "localhost:9670");
    /// ```
    pub fn from_path(path: &str) -> Result<Self, SendError> {
        let invalid = || SendError::InvalidPath(path.to_owned());

        let uri = path.split_whitespace().next().ok_or_else(invalid)?;
        let url = Url::parse(uri).map_err(|_| invalid())?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        Ok(ConnectionKey {
            authority: format!("{host}:{port}"),
        })
    }

    /// The `host:port` string dialed for this connection.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority)
    }
}
