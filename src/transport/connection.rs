use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
};

use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, mpsc, watch},
};
use tracing::{debug, trace, warn};

use crate::{
    address::{AddressKey, ConnectionKey, RoutingAddress},
    codec,
    error::{CloseReason, SendError},
    message::{Message, Request, Response},
    notify::Notifier,
};

use super::{registry::ConnectionRegistry, TransportEvent};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process wide unique identifier for a persistent connection.
///
/// Ids are handed out sequentially as connections are dialed, so a connection replacing an
/// evicted one under the same [`ConnectionKey`] always has a different id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn generate() -> Self {
        ConnectionId(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the sequential part of the id.
    pub fn sequence_id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Lifecycle of a persistent connection.
///
/// States only ever move forward: `Connecting -> Open -> Closing -> Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The socket is established but the read and write tasks have not started yet.
    Connecting,
    /// The read and write tasks are running.
    Open,
    /// A failure or shutdown was detected and the tasks are winding down.
    Closing,
    /// Both tasks have stopped and the connection has been evicted.
    Closed,
}

impl ConnectionState {
    /// Returns `true` while the connection accepts new messages.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

struct Shared {
    id: ConnectionId,
    key: ConnectionKey,
    address_key: AddressKey,
    routing: RoutingAddress,
    state: watch::Sender<ConnectionState>,
    close_reason: Mutex<Option<Arc<CloseReason>>>,
    registry: Weak<ConnectionRegistry>,
}

/// A reference to a persistent connection.
///
/// Handles are cheap to clone. Messages enqueued through any handle are written to the socket in
/// the order they were accepted.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    fn new(
        key: ConnectionKey,
        address_key: AddressKey,
        routing: RoutingAddress,
        queue_capacity: usize,
        registry: Weak<ConnectionRegistry>,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let handle = ConnectionHandle {
            shared: Arc::new(Shared {
                id: ConnectionId::generate(),
                key,
                address_key,
                routing,
                state,
                close_reason: Mutex::new(None),
                registry,
            }),
            tx,
        };

        (handle, rx)
    }

    /// Creates an open handle with no socket behind it.
    #[cfg(test)]
    pub(crate) fn detached(
        key: ConnectionKey,
        routing: RoutingAddress,
    ) -> (Self, mpsc::Receiver<Message>) {
        ConnectionHandle::detached_in(Weak::new(), key, routing)
    }

    /// Creates an open handle with no socket behind it, evicting itself from `registry`.
    #[cfg(test)]
    pub(crate) fn detached_in(
        registry: Weak<ConnectionRegistry>,
        key: ConnectionKey,
        routing: RoutingAddress,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (handle, rx) =
            ConnectionHandle::new(key, AddressKey::new("", ""), routing, 1, registry);
        handle.shared.state.send_replace(ConnectionState::Open);
        (handle, rx)
    }

    /// The unique id of this connection.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// The authority this connection was dialed to.
    pub fn key(&self) -> &ConnectionKey {
        &self.shared.key
    }

    /// The conversation which caused this connection to be dialed.
    pub fn address_key(&self) -> &AddressKey {
        &self.shared.address_key
    }

    /// The routing address of the conversation which caused this connection to be dialed.
    pub fn routing_address(&self) -> &RoutingAddress {
        &self.shared.routing
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while the connection accepts new messages.
    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    /// The reason the connection left the open state, if it has.
    pub fn close_reason(&self) -> Option<Arc<CloseReason>> {
        self.shared
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Places a message on the outbound queue, waiting for room if the queue is full.
    ///
    /// Returns [`SendError::ConnectionClosed`] once the connection has started closing. If the
    /// write task is gone while the connection still looks live, for instance because the
    /// runtime that spawned it shut down, the connection is torn down here so the next send
    /// dials afresh.
    pub async fn enqueue(&self, message: impl Into<Message>) -> Result<(), SendError> {
        if !self.is_live() {
            return Err(SendError::ConnectionClosed(self.shared.key.clone()));
        }

        if self.tx.send(message.into()).await.is_err() {
            if self.close(CloseReason::TasksStopped) {
                self.evict();
                self.shared.state.send_replace(ConnectionState::Closed);
            }
            return Err(SendError::ConnectionClosed(self.shared.key.clone()));
        }

        Ok(())
    }

    /// Removes this connection and its conversations from the registry it was published to.
    fn evict(&self) {
        if let Some(registry) = self.shared.registry.upgrade() {
            registry.evict(self.shared.id, &self.shared.key);
        }
    }

    /// Moves the connection to [`ConnectionState::Closing`].
    ///
    /// Only the first call has any effect and records its reason. Returns `true` if this call
    /// closed the connection.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let mut slot = self
            .shared
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let closed = self.shared.state.send_if_modified(|state| {
            if state.is_live() {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !closed {
            return false;
        }

        match &reason {
            CloseReason::EndOfStream | CloseReason::Shutdown => {
                debug!(connection = %self.shared.key, id = %self.shared.id, %reason, "closing connection");
            }
            CloseReason::Decode(_) | CloseReason::Write(_) | CloseReason::TasksStopped => {
                warn!(connection = %self.shared.key, id = %self.shared.id, %reason, "closing connection");
            }
        }
        *slot = Some(Arc::new(reason));
        true
    }

    /// Waits until the connection reaches [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything the connection tasks need from their transport.
pub(crate) struct TaskContext {
    pub(crate) read_buffer_size: usize,
    pub(crate) write_buffer_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
    pub(crate) events: broadcast::Sender<TransportEvent>,
}

/// A dialed connection whose tasks have not been started.
pub(crate) struct PendingConnection {
    handle: ConnectionHandle,
    stream: TcpStream,
    rx: mpsc::Receiver<Message>,
}

impl PendingConnection {
    pub(crate) fn new(
        stream: TcpStream,
        key: ConnectionKey,
        address_key: AddressKey,
        routing: RoutingAddress,
        queue_capacity: usize,
        registry: Weak<ConnectionRegistry>,
    ) -> Self {
        let (handle, rx) =
            ConnectionHandle::new(key, address_key, routing, queue_capacity, registry);
        PendingConnection { handle, stream, rx }
    }

    pub(crate) fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Spawns the read and write tasks and moves the connection to [`ConnectionState::Open`].
    pub(crate) fn start(self, cx: TaskContext) -> ConnectionHandle {
        let PendingConnection { handle, stream, rx } = self;
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::with_capacity(cx.read_buffer_size, read_half);
        let writer = BufWriter::with_capacity(cx.write_buffer_size, write_half);

        handle.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });
        debug!(connection = %handle.key(), id = %handle.id(), "connection opened");

        tokio::spawn(write_loop(handle.clone(), writer, rx));
        tokio::spawn(read_loop(handle.clone(), reader, cx));

        handle
    }
}

/// Resolves once the connection is no longer live.
async fn closing(state: &mut watch::Receiver<ConnectionState>) {
    loop {
        let current = *state.borrow_and_update();
        if !current.is_live() {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn write_loop(
    handle: ConnectionHandle,
    mut writer: BufWriter<OwnedWriteHalf>,
    mut rx: mpsc::Receiver<Message>,
) {
    let mut state = handle.shared.state.subscribe();
    loop {
        let message = tokio::select! {
            biased;
            _ = closing(&mut state) => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let res = tokio::select! {
            biased;
            _ = closing(&mut state) => break,
            res = codec::write_message(&mut writer, &message) => res,
        };
        match res {
            Ok(()) => {
                trace!(connection = %handle.key(), tid = %message.transaction_id(), body = %message.body(), "wrote message");
            }
            Err(err) => {
                handle.close(CloseReason::Write(err));
                break;
            }
        }
    }

    // The read task owns the other half; this only stops our direction.
    let _ = writer.shutdown().await;
    trace!(connection = %handle.key(), id = %handle.id(), "write task stopped");
}

async fn read_loop(
    handle: ConnectionHandle,
    mut reader: BufReader<OwnedReadHalf>,
    cx: TaskContext,
) {
    let mut state = handle.shared.state.subscribe();
    let reason = loop {
        let res = tokio::select! {
            biased;
            _ = closing(&mut state) => break None,
            res = codec::read_message(&mut reader, cx.max_message_size) => res,
        };

        match res {
            Ok(Message::Request(request)) => handle_request(&handle, &cx, request).await,
            Ok(Message::Response(response)) => {
                debug!(
                    connection = %handle.key(),
                    tid = %response.transaction_id(),
                    status = response.status(),
                    "received response"
                );
                let _ = cx.events.send(TransportEvent::Response {
                    connection: handle.key().clone(),
                    response,
                });
            }
            Err(err) => break Some(CloseReason::from(err)),
        }
    };

    if let Some(reason) = reason {
        handle.close(reason);
    }
    handle.evict();
    drop(reader);
    handle.shared.state.send_replace(ConnectionState::Closed);

    let reason = handle
        .close_reason()
        .unwrap_or_else(|| Arc::new(CloseReason::Shutdown));
    debug!(connection = %handle.key(), id = %handle.id(), %reason, "connection closed");
    let _ = cx.events.send(TransportEvent::Closed {
        connection: handle.key().clone(),
        id: handle.id(),
        reason,
    });
}

async fn handle_request(handle: &ConnectionHandle, cx: &TaskContext, request: Request) {
    debug!(
        connection = %handle.key(),
        tid = %request.transaction_id(),
        body = %request.body(),
        "received request"
    );

    if let Err(err) = handle.enqueue(Response::acknowledge(&request)).await {
        debug!(tid = %request.transaction_id(), %err, "dropping acknowledgement");
    }

    if request.is_cpim() {
        if let Some(notifier) = &cx.notifier {
            let notifier = Arc::clone(notifier);
            let sender = handle.address_key().sender().to_owned();
            let text = request.text().to_owned();
            tokio::spawn(async move {
                if let Err(err) = notifier.notify(&sender, &text).await {
                    warn!(%sender, %err, "failed to deliver notification");
                }
            });
        }
    }

    let _ = cx.events.send(TransportEvent::Request {
        connection: handle.key().clone(),
        request,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let routing = RoutingAddress::new(
            "msrp://localhost:9670/pxd512029144298;tcp",
            "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
        );
        ConnectionHandle::detached(routing.connection_key().unwrap(), routing)
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), format!("#{}", a.sequence_id()));
    }

    #[test]
    fn close_is_idempotent() {
        let (handle, _rx) = detached();
        assert_eq!(handle.state(), ConnectionState::Open);

        assert!(handle.close(CloseReason::EndOfStream));
        assert!(!handle.close(CloseReason::Shutdown));
        assert_eq!(handle.state(), ConnectionState::Closing);
        assert!(matches!(
            handle.close_reason().as_deref(),
            Some(CloseReason::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn enqueue_preserves_order() {
        let (handle, mut rx) = detached();
        let first = Request::new("msrp://localhost:9670/a;tcp", "msrp://b:1/b;tcp", "s", "r", "1");
        let second = Request::new("msrp://localhost:9670/a;tcp", "msrp://b:1/b;tcp", "s", "r", "2");

        let producer = {
            let handle = handle.clone();
            let (first, second) = (first.clone(), second.clone());
            tokio::spawn(async move {
                handle.enqueue(first).await.unwrap();
                handle.enqueue(second).await.unwrap();
            })
        };

        assert_eq!(rx.recv().await, Some(Message::Request(first)));
        assert_eq!(rx.recv().await, Some(Message::Request(second)));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_to_stopped_writer_evicts_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let routing = RoutingAddress::new(
            "msrp://localhost:9670/pxd512029144298;tcp",
            "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
        );
        let address_key = AddressKey::new("+8210", "+8211");
        let (handle, rx) = ConnectionHandle::detached_in(
            Arc::downgrade(&registry),
            routing.connection_key().unwrap(),
            routing.clone(),
        );
        registry.publish(&handle, &address_key, &routing).unwrap();

        // The write task went away without running teardown.
        drop(rx);

        let req = Request::new(routing.to_path(), routing.from_path(), "+8210", "+8211", "");
        let err = handle.enqueue(req).await.unwrap_err();
        assert!(matches!(err, SendError::ConnectionClosed(_)));
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.close_reason().as_deref(),
            Some(CloseReason::TasksStopped)
        ));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.lookup(&address_key), None);
    }

    #[tokio::test]
    async fn enqueue_after_close_fails() {
        let (handle, _rx) = detached();
        handle.close(CloseReason::Shutdown);

        let req = Request::new("msrp://localhost:9670/a;tcp", "msrp://b:1/b;tcp", "s", "r", "");
        let err = handle.enqueue(req).await.unwrap_err();
        assert!(matches!(err, SendError::ConnectionClosed(key) if key == *handle.key()));
    }

    #[tokio::test]
    async fn closing_resolves_on_close() {
        let (handle, _rx) = detached();
        let mut state = handle.shared.state.subscribe();

        let waiter = tokio::spawn(async move { closing(&mut state).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        handle.close(CloseReason::Shutdown);
        waiter.await.unwrap();
    }
}
