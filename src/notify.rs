//! Forwarding of inbound text messages to an external endpoint.
//!
//! Whenever a connection receives a request carrying a CPIM wrapped text, the transport hands the
//! sender and the text to its [`Notifier`]. Delivery runs on its own task and never holds up the
//! read loop; failures are logged and otherwise ignored.

use futures::future::BoxFuture;
use url::Url;

use crate::error::NotifyError;

/// Receives every inbound text message.
///
/// Implementations are invoked from a spawned task, so they are free to perform I/O.
///
/// ```
/// use futures::{future::BoxFuture, FutureExt};
/// use msrp::{error::NotifyError, notify::Notifier};
///
/// struct Printer;
///
/// impl Notifier for Printer {
///     fn notify<'a>(&'a self, sender: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
///         async move {
///             println!("{sender}: {text}");
///             Ok(())
///         }
///         .boxed()
///     }
/// }
/// ```
pub trait Notifier: Send + Sync + 'static {
    /// Delivers one inbound text message from `sender`.
    fn notify<'a>(
        &'a self,
        sender: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Delivers notifications as `GET {url}?sender=..&text=..`.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: Url,
}

impl HttpNotifier {
    /// Creates a notifier targeting `url`.
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        Ok(HttpNotifier {
            client: reqwest::Client::new(),
            url: Url::parse(url)?,
        })
    }

    /// Creates a notifier sharing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, url: &str) -> Result<Self, NotifyError> {
        Ok(HttpNotifier {
            client,
            url: Url::parse(url)?,
        })
    }

    /// The endpoint receiving notifications.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Notifier for HttpNotifier {
    fn notify<'a>(
        &'a self,
        sender: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.client
                .get(self.url.clone())
                .query(&[("sender", sender), ("text", text)])
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            HttpNotifier::new("not a url"),
            Err(NotifyError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn sends_sender_and_text_as_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0; 4096];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8(request).unwrap()
        });

        let notifier = HttpNotifier::new(&format!("http://{addr}/recieve")).unwrap();
        notifier.notify("+8210", "Hi there").await.unwrap();

        let request = server.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert_eq!(
            request_line,
            "GET /recieve?sender=%2B8210&text=Hi+there HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await;
        });

        let notifier = HttpNotifier::new(&format!("http://{addr}/")).unwrap();
        let err = notifier.notify("+8210", "Hi").await.unwrap_err();
        assert!(matches!(err, NotifyError::Http(_)));
    }
}
