//! Sends one message and prints what the peer sends back.
//!
//! ```text
//! cargo run --example send -- <to-path> <from-path> <sender> <recipient> <text>
//! RUST_LOG=msrp=trace cargo run --example send -- \
//!     "msrp://localhost:9670/pxd512029144298;tcp" \
//!     "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp" +8210 +8211 "Hello!"
//! ```

use std::{env, process, time::Duration};

use msrp::{Client, Request, Transport, TransportConfig, TransportEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("msrp=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [to_path, from_path, sender, recipient, text] = args.as_slice() else {
        eprintln!("usage: send <to-path> <from-path> <sender> <recipient> <text>");
        process::exit(2);
    };

    let mut config = TransportConfig::default();
    if let Ok(url) = env::var("MSRP_NOTIFY_URL") {
        config = config.with_notify_url(url);
    }
    let client = Client::new(Transport::new(config));
    let mut events = client.transport().subscribe();

    let request = Request::new(to_path, from_path, sender, recipient, text);
    let tid = request.transaction_id().to_owned();
    client.send(request).await?;
    info!(%tid, "request sent");

    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            match event {
                TransportEvent::Response { response, .. } if response.transaction_id() == tid => {
                    info!(status = response.status(), reason = response.reason(), "acknowledged");
                    return;
                }
                TransportEvent::Closed { reason, .. } => {
                    info!(%reason, "connection closed before acknowledgement");
                    return;
                }
                event => info!(?event, "received"),
            }
        }
    });
    if wait.await.is_err() {
        info!("no acknowledgement within 5s");
    }

    if let Some(routing) = client.connection_method(sender, recipient) {
        info!(to_path = routing.to_path(), from_path = routing.from_path(), "connection method");
    }
    client.transport().close_all();

    Ok(())
}
