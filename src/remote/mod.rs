//! Websocket client of the Kava bridge.
//!
//! The [`Client`] keeps one connection to the Kava server. Over it, both sides
//! send requests and answer each other's requests, so the client is at the
//! same time:
//!
//! * a caller: [`Client::send_request`] sends a request and waits for the
//!   response with the same id
//! * a server: inbound requests are routed to the handlers registered with
//!   [`Client::add_handler`]
//!
//! # Submodules
//!
//! * [`dispatch`] - routing of inbound frames
//! * [`link`] - the queue in front of the websocket writer
//! * [`pending`] - requests waiting for their response
//! * [`registry`] - endpoint handlers and inbound requests
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake--> Connected
//!      ^                          |                        |
//!      +------ handshake failed --+                        |
//!      +------------- close() / remote close / error ------+
//! ```
//!
//! Whenever a connection goes away, every request still waiting on it fails:
//! with `Cancelled` when closed locally, with `Aborted` when lost.

pub mod dispatch;
pub mod link;
pub mod pending;
pub mod registry;

pub use dispatch::Dispatcher;
pub use link::{Link, Outgoing};
pub use pending::{Pending, Slot};
pub use registry::{Handler, Registry, Request};

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::AbortHandle,
};
use tokio_tungstenite::{tungstenite::Message as WebsocketMessage, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{
    config::KavaConfig,
    error::{Error, Result},
    platform::{Authority, ChannelId, UserId},
    protocol::{
        frame::{self, STATUS_ERROR, STATUS_SUCCESS},
        Frame, RequestId,
    },
    tasks::Supervisor,
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug)]
struct Connection {
    generation: u64,
    link: Link,
    reader: AbortHandle,
}

#[derive(Debug)]
struct Inner {
    uri: Url,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,

    state: watch::Sender<State>,
    connection: Mutex<Option<Connection>>,
    generation: AtomicU64,

    pending: Arc<Pending>,
    registry: Arc<RwLock<Registry>>,
    dispatcher: Dispatcher,
    tasks: Supervisor,
}

/// Client side of the Kava socket. Cloning yields another handle to the same
/// connection.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a disconnected client for the server in `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the URI is not a `ws` or `wss` URL.
    pub fn new(config: &KavaConfig) -> Result<Self> {
        let uri = Url::parse(&config.uri)?;
        if !matches!(uri.scheme(), "ws" | "wss") {
            return Err(Error::invalid_argument(format!(
                "{uri} is not a websocket url"
            )));
        }

        let pending = Arc::new(Pending::new());
        let registry = Arc::new(RwLock::new(Registry::new()));
        let tasks = Supervisor::new();
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&pending), tasks.clone());
        let (state, _) = watch::channel(State::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                uri,
                connect_timeout: config.connect_timeout,
                request_timeout: config.request_timeout(),
                state,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                pending,
                registry,
                dispatcher,
                tasks,
            }),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.inner.uri
    }

    #[must_use]
    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    /// Resolves once the client is disconnected.
    pub async fn wait_disconnected(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = state.wait_for(|state| *state == State::Disconnected).await;
    }

    /// Adds `handler` to the handlers of `endpoint`.
    pub fn add_handler<H>(&self, endpoint: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_handler(endpoint, handler);
    }

    /// Number of requests waiting for their response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Tasks of this client: reader, writer, frame dispatch and handlers.
    #[must_use]
    pub fn tasks(&self) -> &Supervisor {
        &self.inner.tasks
    }

    /// A handle that does not keep the client alive, for collaborators that
    /// are themselves owned by the client's handlers.
    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner.connection()
    }

    fn link(&self) -> Option<(u64, Link)> {
        self.connection()
            .as_ref()
            .map(|connection| (connection.generation, connection.link.clone()))
    }

    /// Registers a request on connection `generation`.
    ///
    /// Fails if that connection went away in the meantime: its pending
    /// requests may have been swept already.
    fn register(&self, endpoint: &str, generation: u64) -> Result<(RequestId, Slot)> {
        let (id, slot) = self.inner.pending.register(endpoint);
        if self
            .connection()
            .as_ref()
            .is_some_and(|connection| connection.generation == generation)
        {
            return Ok((id, slot));
        }

        self.inner.pending.remove(&id);
        Err(Error::unavailable(format!("not connected to {}", self.inner.uri)))
    }

    /// Connects to the server. Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the handshake fails or times out, or if
    /// a concurrent attempt to connect failed.
    pub async fn connect(&self) -> Result<()> {
        let mut claimed = false;
        self.inner.state.send_if_modified(|state| {
            if *state == State::Disconnected {
                *state = State::Connecting;
                claimed = true;
                return true;
            }
            false
        });

        if !claimed {
            let mut state = self.inner.state.subscribe();
            let settled = state
                .wait_for(|state| *state != State::Connecting)
                .await
                .map(|state| *state);
            return match settled {
                Ok(State::Connected) => Ok(()),
                _ => Err(Error::unavailable(format!(
                    "concurrent connection to {} failed",
                    self.inner.uri
                ))),
            };
        }

        info!("connecting to {}", self.inner.uri);
        let handshake = tokio::time::timeout(
            self.inner.connect_timeout,
            tokio_tungstenite::connect_async(self.inner.uri.as_str()),
        )
        .await;

        let stream = match handshake {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.inner.state.send_replace(State::Disconnected);
                return Err(Error::unavailable(format!(
                    "cannot connect to {}: {e}",
                    self.inner.uri
                )));
            }
            Err(_) => {
                self.inner.state.send_replace(State::Disconnected);
                return Err(Error::unavailable(format!(
                    "handshake with {} timed out after {:?}",
                    self.inner.uri, self.inner.connect_timeout
                )));
            }
        };

        self.attach(stream);
        info!("connected to {}", self.inner.uri);
        Ok(())
    }

    fn attach(&self, stream: Stream) {
        let (sink, stream) = stream.split();
        let (link, outgoing) = Link::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Hold the lock until the connection is published, so that a reader
        // that ends right away finds its own connection to tear down.
        let mut connection = self.connection();
        self.inner
            .tasks
            .spawn(format!("writer #{generation}"), write(sink, outgoing));
        let reader = self.inner.tasks.spawn(
            format!("reader #{generation}"),
            read(Arc::clone(&self.inner), stream, link.clone(), generation),
        );

        *connection = Some(Connection {
            generation,
            link,
            reader: reader.abort_handle(),
        });
        self.inner.state.send_replace(State::Connected);
    }

    /// Closes the connection and fails all pending requests with
    /// `Cancelled`. Does nothing if not connected.
    pub fn close(&self) {
        let Some(connection) = self.connection().take() else {
            debug!("not connected to {}", self.inner.uri);
            return;
        };

        info!("closing connection to {}", self.inner.uri);
        connection.reader.abort();
        connection.link.close();

        let failed = self
            .inner
            .pending
            .fail_all(|| Error::cancelled("connection closed"));
        if failed > 0 {
            debug!("cancelled {failed} pending request(s)");
        }
        self.inner.state.send_replace(State::Disconnected);
    }

    /// Sends a request to `endpoint` and waits for its response, for at most
    /// the configured request timeout.
    ///
    /// # Errors
    ///
    /// * `Unavailable` if not connected
    /// * `DeadlineExceeded` if no response arrived in time
    /// * `Aborted` if the connection was lost while waiting
    /// * `Cancelled` if the connection was closed while waiting
    pub async fn send_request<T>(&self, endpoint: &str, data: T) -> Result<Value>
    where
        T: Serialize,
    {
        self.send_request_with_timeout(endpoint, data, self.inner.request_timeout)
            .await
    }

    /// Like [`send_request`](Self::send_request), with a timeout of the
    /// caller's choosing. `None` waits until the response arrives or the
    /// connection goes away.
    ///
    /// # Errors
    ///
    /// As [`send_request`](Self::send_request).
    pub async fn send_request_with_timeout<T>(
        &self,
        endpoint: &str,
        data: T,
        timeout: Option<Duration>,
    ) -> Result<Value>
    where
        T: Serialize,
    {
        let data = serde_json::to_value(data)?;
        let (generation, link) = self
            .link()
            .ok_or_else(|| Error::unavailable(format!("not connected to {}", self.inner.uri)))?;

        let (id, slot) = self.register(endpoint, generation)?;
        let guard = PendingGuard {
            pending: &self.inner.pending,
            id: &id,
        };

        debug!("request {id} to {endpoint}");
        link.send_frame(&Frame::Request {
            id: id.clone(),
            endpoint: endpoint.to_owned(),
            data,
        })?;

        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, slot).await.map_err(|_| {
                Error::deadline_exceeded(format!(
                    "request {id} to {endpoint} timed out after {timeout:?}"
                ))
            })?,
            None => slot.await,
        };

        drop(guard);
        result?
    }
}

/// Removes a pending entry when its caller stops waiting, whether by error,
/// timeout or being dropped.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: &'a RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.id) {
            trace!("request {}: gave up waiting", self.id);
        }
    }
}

impl Inner {
    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tears down connection `generation` after its reader ended.
    fn connection_lost(&self, generation: u64) {
        let connection = {
            let mut current = self.connection();
            if current
                .as_ref()
                .is_none_or(|connection| connection.generation != generation)
            {
                return;
            }
            current.take()
        };

        if let Some(connection) = connection {
            connection.link.close();
        }

        // Sweep before publishing the state: requests of the next
        // connection must survive it.
        let failed = self.pending.fail_all(|| Error::aborted("connection lost"));
        if failed > 0 {
            warn!("connection to {} lost with {failed} pending request(s)", self.uri);
        } else {
            warn!("connection to {} lost", self.uri);
        }
        self.state.send_replace(State::Disconnected);
    }
}

async fn write(
    mut sink: SplitSink<Stream, WebsocketMessage>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<()> {
    while let Some(message) = outgoing.recv().await {
        match message {
            Outgoing::Text(text) => sink.send(WebsocketMessage::text(text)).await?,
            Outgoing::Close => {
                // Fails when the server closed first, which is fine.
                if let Err(e) = sink.close().await {
                    trace!("closing: {e}");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn read(
    inner: Arc<Inner>,
    mut stream: SplitStream<Stream>,
    link: Link,
    generation: u64,
) -> Result<()> {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!("reading from {} failed: {e}", inner.uri);
                break;
            }
            None => break,
        };

        let text = match message {
            WebsocketMessage::Text(text) => text.as_str().to_owned(),
            WebsocketMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    debug!("ignoring binary frame: {e}");
                    continue;
                }
            },
            WebsocketMessage::Close(payload) => {
                info!("connection closed by server: {payload:?}");
                break;
            }
            // Pings are answered by the websocket layer.
            _ => continue,
        };

        trace!("<- {text}");
        inner.tasks.spawn(
            format!("frame #{generation}"),
            inner.dispatcher.clone().dispatch(text, link.clone()),
        );
    }

    inner.connection_lost(generation);
    Ok(())
}

/// See [`Client::downgrade`].
#[derive(Clone, Debug)]
pub struct WeakClient {
    inner: Weak<Inner>,
}

impl WeakClient {
    #[must_use]
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

#[async_trait]
impl Authority for WeakClient {
    async fn can_use_music(&self, user: UserId, channel: ChannelId) -> Result<bool> {
        let client = self
            .upgrade()
            .ok_or_else(|| Error::unavailable("client is gone"))?;
        client.can_use_music(user, channel).await
    }
}

/// Asks the server whether `user` may use music features in `channel`.
#[async_trait]
impl Authority for Client {
    async fn can_use_music(&self, user: UserId, channel: ChannelId) -> Result<bool> {
        let response = self
            .send_request("can_use_music", json!({"user_id": user, "channel_id": channel}))
            .await?;

        match frame::status(&response) {
            Some(STATUS_SUCCESS) => Ok(true),
            Some(STATUS_ERROR) => Ok(false),
            other => Err(Error::internal(format!(
                "can_use_music answered with status {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::error::ErrorKind;

    /// Accepts one websocket connection and hands its stream to `serve`.
    async fn server<F, Fut>(serve: F) -> KavaConfig
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            serve(ws).await;
        });

        KavaConfig {
            uri: format!("ws://{address}"),
            ..KavaConfig::default()
        }
    }

    fn request_of(message: &WebsocketMessage) -> (String, String) {
        let frame: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        (
            frame["id"].as_str().unwrap().to_owned(),
            frame["endpoint"].as_str().unwrap().to_owned(),
        )
    }

    #[tokio::test]
    async fn correlates_out_of_order_responses() {
        let config = server(|mut ws| async move {
            let mut requests = Vec::new();
            for _ in 0..3 {
                let message = ws.next().await.unwrap().unwrap();
                requests.push(request_of(&message));
            }
            // Answer in reverse, echoing the endpoint.
            for (id, endpoint) in requests.into_iter().rev() {
                let response = json!({"type": "response", "id": id, "data": {"endpoint": endpoint}});
                ws.send(WebsocketMessage::text(response.to_string())).await.unwrap();
            }
            let _ = ws.next().await;
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.state(), State::Connected);

        let (a, b, c) = tokio::join!(
            client.send_request("a", json!({})),
            client.send_request("b", json!({})),
            client.send_request("c", json!({})),
        );
        assert_eq!(a.unwrap()["endpoint"], "a");
        assert_eq!(b.unwrap()["endpoint"], "b");
        assert_eq!(c.unwrap()["endpoint"], "c");
        assert_eq!(client.pending(), 0);

        client.close();
        assert_eq!(client.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn connection_loss_fails_pending_requests() {
        let config = server(|mut ws| async move {
            let _ = ws.next().await;
            drop(ws);
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();

        let err = client
            .send_request_with_timeout("queue", json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);

        client.wait_disconnected().await;
        assert_eq!(client.state(), State::Disconnected);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn close_cancels_pending_requests() {
        let config = server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();

        let request = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .send_request_with_timeout("queue", json!({}), None)
                    .await
            }
        });
        while client.pending() == 0 {
            tokio::task::yield_now().await;
        }

        client.close();
        let err = request.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn requests_racing_close_are_refused() {
        let config = server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();
        let (generation, _link) = client.link().unwrap();

        client.close();
        let err = client.register("queue", generation).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_fail_before_disconnected_is_published() {
        let config = server(|mut ws| async move {
            let _ = ws.next().await;
            drop(ws);
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();

        let observer = tokio::spawn({
            let client = client.clone();
            async move {
                client.wait_disconnected().await;
                client.pending()
            }
        });

        let err = client
            .send_request_with_timeout("queue", json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
        assert_eq!(observer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timed_out_requests_are_forgotten() {
        let config = server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();

        let err = client
            .send_request_with_timeout("queue", json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(client.pending(), 0);
        client.close();
    }

    #[tokio::test]
    async fn refused_handshake_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(&KavaConfig {
            uri: format!("ws://{address}"),
            ..KavaConfig::default()
        })
        .unwrap();

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(client.state(), State::Disconnected);

        let err = client.send_request("queue", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn answers_can_use_music() {
        let config = server(|mut ws| async move {
            for status in ["success", "error", "maybe"] {
                let message = ws.next().await.unwrap().unwrap();
                let (id, endpoint) = request_of(&message);
                assert_eq!(endpoint, "can_use_music");
                let response = json!({"type": "response", "id": id, "data": {"status": status}});
                ws.send(WebsocketMessage::text(response.to_string())).await.unwrap();
            }
            let _ = ws.next().await;
        })
        .await;

        let client = Client::new(&config).unwrap();
        client.connect().await.unwrap();

        assert!(client.can_use_music(1, 10).await.unwrap());
        assert!(!client.can_use_music(1, 10).await.unwrap());
        assert_eq!(
            client.can_use_music(1, 10).await.unwrap_err().kind,
            ErrorKind::Internal
        );
        client.close();
    }

    #[tokio::test]
    async fn weak_handles_do_not_keep_the_client() {
        let client = Client::new(&KavaConfig::default()).unwrap();
        let weak = client.downgrade();
        assert!(weak.upgrade().is_some());
        assert_eq!(
            weak.can_use_music(1, 10).await.unwrap_err().kind,
            ErrorKind::Unavailable
        );

        drop(client);
        assert!(weak.upgrade().is_none());
        assert_eq!(
            weak.can_use_music(1, 10).await.unwrap_err().kind,
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let config = KavaConfig {
            uri: "https://example.org".to_owned(),
            ..KavaConfig::default()
        };
        assert_eq!(
            Client::new(&config).unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
    }
}
