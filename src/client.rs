//! A thin client over a [`Transport`].

use crate::{
    address::RoutingAddress,
    error::SendError,
    message::Request,
    transport::{Transport, DEFAULT_TRANSPORT},
};

/// Sends requests through a transport.
///
/// [`Client::default`] uses the shared [`DEFAULT_TRANSPORT`].
///
/// ```no_run
/// use msrp::{Client, Request};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), msrp::error::SendError> {
/// let client = Client::default();
/// client
///     .send(Request::new(
///         "msrp://localhost:9670/pxd512029144298;tcp",
///         "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
///         "+8210",
///         "+8211",
///         "Hello!",
///     ))
///     .await?;
///
/// let routing = client.connection_method("+8210", "+8211");
/// assert!(routing.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    transport: Transport,
}

impl Client {
    /// Creates a client sending through `transport`.
    pub fn new(transport: Transport) -> Self {
        Client { transport }
    }

    /// The transport requests are sent through.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Sends a request without waiting for it to be acknowledged.
    pub async fn send(&self, request: Request) -> Result<(), SendError> {
        self.transport.one_way(request).await
    }

    /// Returns the routing address last used to send from `sender` to `recipient`.
    pub fn connection_method(&self, sender: &str, recipient: &str) -> Option<RoutingAddress> {
        self.transport.connection_method(sender, recipient)
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new(DEFAULT_TRANSPORT.clone())
    }
}
