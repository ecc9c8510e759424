//! The transport seam.
//!
//! A [`Transport`] turns one [`TransportRequest`] into an [`Exchange`]: a
//! stream of [`TransportEvent`]s plus controls to tear the exchange down. The
//! executor never touches sockets itself; [`HttpTransport`](crate::HttpTransport)
//! is the default implementation.

use crate::{options::Protocol, TransportError};
use bytes::Bytes;
use http::{header::LOCATION, HeaderMap, Method, StatusCode, Version};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Opens exchanges.
///
/// `issue` must not block: the request is performed in the background and
/// reported through the returned [`Exchange`].
///
/// # Examples
///
/// A transport that refuses every connection:
///
/// ```
/// use microreq::{Exchange, Transport, TransportError, TransportRequest};
///
/// struct Offline;
///
/// impl Transport for Offline {
///     fn issue(&self, _request: TransportRequest) -> Exchange {
///         Exchange::failed(TransportError::new("ECONNREFUSED", "offline"))
///     }
/// }
/// ```
pub trait Transport: Send + Sync {
    /// Starts one request/response exchange.
    fn issue(&self, request: TransportRequest) -> Exchange;
}

/// A fully resolved request, ready for the wire.
#[derive(Debug)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: Method,
    /// `http:` or `https:`.
    pub protocol: Protocol,
    /// The host to connect to.
    pub hostname: String,
    /// The port to connect to.
    pub port: u16,
    /// Path and query.
    pub path: String,
    /// Request headers, including computed `Content-Length` / `Authorization`.
    pub headers: HeaderMap,
    /// The request body.
    pub body: RequestBody,
    /// Options this crate does not interpret.
    pub extra: Map<String, Value>,
}

impl TransportRequest {
    /// The absolute URL of this request.
    pub fn url(&self) -> String {
        format!(
            "{}//{}:{}{}",
            self.protocol, self.hostname, self.port, self.path
        )
    }
}

/// The body of a [`TransportRequest`].
#[derive(Debug)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A complete body.
    Full(Bytes),
    /// A body the caller is still writing; it ends when the channel closes.
    Streaming(mpsc::Receiver<Bytes>),
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// The status code.
    pub status: StatusCode,
    /// The HTTP version.
    pub version: Version,
    /// The response headers.
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Creates a head with the given status and no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    /// The `Location` to follow, if this is a redirect.
    pub(crate) fn redirect_location(&self) -> Option<&str> {
        if !self.status.is_redirection() {
            return None;
        }
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }
}

/// A piece of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Raw bytes.
    Binary(Bytes),
    /// Text, for transports that decode after [`ExchangeControl::set_encoding`].
    Text(String),
}

impl Chunk {
    /// The chunk's length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` for an empty chunk.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The chunk's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Binary(bytes) => bytes,
            Chunk::Text(text) => text.as_bytes(),
        }
    }
}

/// Something that happened on an exchange.
#[derive(Debug)]
pub enum TransportEvent {
    /// The response head arrived; the connection is established.
    Connected(ResponseHead),
    /// A body chunk arrived.
    Data(Chunk),
    /// The body is complete.
    End,
    /// The exchange failed.
    Error(TransportError),
}

/// Tears down an exchange.
pub trait ExchangeControl: Send {
    /// Cancels an exchange that has not connected yet.
    fn abort(&mut self);

    /// Closes the connection of an exchange that has connected.
    fn destroy(&mut self);

    /// Hints that body chunks will be decoded with `encoding`. Transports may
    /// start delivering [`Chunk::Text`] after this.
    fn set_encoding(&mut self, _encoding: &'static encoding_rs::Encoding) {}
}

/// One request/response exchange.
pub struct Exchange {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    teardown: Arc<Mutex<Teardown>>,
    watchdog: Option<AbortHandle>,
}

impl Exchange {
    /// Wraps an event channel and its controls.
    pub fn new(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        control: Box<dyn ExchangeControl>,
    ) -> Self {
        Self {
            events,
            teardown: Arc::new(Mutex::new(Teardown {
                control,
                connected: false,
                settled: false,
                expired: false,
            })),
            watchdog: None,
        }
    }

    /// An exchange that fails right away with `error`.
    pub fn failed(error: TransportError) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let _ = sender.send(TransportEvent::Error(error));
        Self::new(events, Box::new(NoControl))
    }

    /// The next event, or `None` once the transport has gone away.
    pub(crate) async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Tears the exchange down at `deadline` whether or not anyone is reading
    /// it. Without a runtime to run on, only the reader enforces the deadline.
    pub(crate) fn arm(&mut self, deadline: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let teardown = Arc::downgrade(&self.teardown);
        let watchdog = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(teardown) = teardown.upgrade() {
                lock(&teardown).expire();
            }
        });
        self.disarm();
        self.watchdog = Some(watchdog.abort_handle());
    }

    fn disarm(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }

    /// Records that the response head has been seen.
    pub(crate) fn mark_connected(&mut self) {
        lock(&self.teardown).connected = true;
    }

    /// Returns `true` once the watchdog has torn the exchange down.
    pub(crate) fn expired(&self) -> bool {
        lock(&self.teardown).expired
    }

    pub(crate) fn abort(&mut self) {
        self.disarm();
        lock(&self.teardown).abort();
        self.events.close();
    }

    pub(crate) fn destroy(&mut self) {
        self.disarm();
        lock(&self.teardown).destroy();
        self.events.close();
    }

    /// Stops delivery; anything the transport sends afterwards is discarded.
    pub(crate) fn close(&mut self) {
        self.disarm();
        lock(&self.teardown).settled = true;
        self.events.close();
    }

    pub(crate) fn set_encoding(&mut self, encoding: &'static encoding_rs::Encoding) {
        lock(&self.teardown).control.set_encoding(encoding);
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// The controls of an exchange, shared with its watchdog. Each exchange is
/// torn down at most once.
struct Teardown {
    control: Box<dyn ExchangeControl>,
    connected: bool,
    settled: bool,
    expired: bool,
}

impl Teardown {
    fn abort(&mut self) {
        if !self.settled {
            self.settled = true;
            self.control.abort();
        }
    }

    fn destroy(&mut self) {
        if !self.settled {
            self.settled = true;
            self.control.destroy();
        }
    }

    fn expire(&mut self) {
        if self.settled {
            return;
        }
        self.expired = true;
        if self.connected {
            self.destroy();
        } else {
            self.abort();
        }
    }
}

fn lock(teardown: &Mutex<Teardown>) -> MutexGuard<'_, Teardown> {
    teardown.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange").finish_non_exhaustive()
    }
}

struct NoControl;

impl ExchangeControl for NoControl {
    fn abort(&mut self) {}
    fn destroy(&mut self) {}
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        let request = TransportRequest {
            method: Method::GET,
            protocol: Protocol::Https,
            hostname: "localhost".to_string(),
            port: 1337,
            path: "/path/name?a=12".to_string(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            extra: Map::new(),
        };
        assert_eq!(request.url(), "https://localhost:1337/path/name?a=12");
    }

    #[test]
    fn test_redirect_location_requires_3xx() {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers.insert(LOCATION, "/next".parse().unwrap());
        assert_eq!(head.redirect_location(), None);

        head.status = StatusCode::MOVED_PERMANENTLY;
        assert_eq!(head.redirect_location(), Some("/next"));

        head.headers.clear();
        assert_eq!(head.redirect_location(), None);
    }

    #[tokio::test]
    async fn test_failed_exchange_yields_one_error() {
        let mut exchange = Exchange::failed(TransportError::new("ECONNREFUSED", "refused"));
        match exchange.next_event().await {
            Some(TransportEvent::Error(e)) => assert_eq!(e.code(), "ECONNREFUSED"),
            other => panic!("Expected error event, got {:?}", other),
        }
        assert!(exchange.next_event().await.is_none());
    }
}
