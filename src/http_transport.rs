//! The default transport, built on `reqwest`.

use crate::{
    transport::{
        Chunk, Exchange, ExchangeControl, RequestBody, ResponseHead, Transport, TransportEvent,
        TransportRequest,
    },
    Error, Result, TransportError,
};
use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Performs requests with a [`reqwest::Client`].
///
/// The client must not follow redirects on its own; [`HttpTransport::new`]
/// turns that off, and clients passed to [`HttpTransport::from_client`] should
/// do the same.
///
/// Each exchange runs on its own Tokio task, so `issue` must be called from
/// within a runtime. Outside one, the exchange fails with `EINVAL`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self::from_client(client))
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: TransportRequest) -> reqwest::RequestBuilder {
        if !request.extra.is_empty() {
            tracing::trace!(
                options = ?request.extra.keys().collect::<Vec<_>>(),
                "Ignoring transport options"
            );
        }

        let url = request.url();
        let builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);

        match request.body {
            RequestBody::Empty => builder,
            RequestBody::Full(bytes) => builder.body(bytes),
            RequestBody::Streaming(receiver) => {
                let chunks = futures::stream::unfold(receiver, |mut receiver| async move {
                    let chunk = receiver.recv().await;
                    chunk.map(|chunk| (Ok::<_, io::Error>(chunk), receiver))
                });
                builder.body(reqwest::Body::wrap_stream(chunks))
            }
        }
    }
}

impl Transport for HttpTransport {
    fn issue(&self, request: TransportRequest) -> Exchange {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Exchange::failed(TransportError::new(
                crate::error::EINVAL,
                "no Tokio runtime to run the request on",
            ));
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_exchange(self.build(request), events));
        Exchange::new(
            receiver,
            Box::new(TaskControl {
                task: task.abort_handle(),
            }),
        )
    }
}

/// Sends the request and reports it as events until the body ends, the
/// exchange fails, or the receiver goes away.
async fn run_exchange(
    request: reqwest::RequestBuilder,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(classify(e)));
            return;
        }
    };

    let head = ResponseHead {
        status: response.status(),
        version: response.version(),
        headers: response.headers().clone(),
    };
    if events.send(TransportEvent::Connected(head)).is_err() {
        return;
    }

    loop {
        let event = match response.chunk().await {
            Ok(Some(bytes)) => TransportEvent::Data(Chunk::Binary(bytes)),
            Ok(None) => TransportEvent::End,
            Err(e) => TransportEvent::Error(classify(e)),
        };
        let last = !matches!(event, TransportEvent::Data(_));
        if events.send(event).is_err() || last {
            return;
        }
    }
}

/// Cancels the exchange task. Dropping the control cancels it too.
struct TaskControl {
    task: AbortHandle,
}

impl ExchangeControl for TaskControl {
    fn abort(&mut self) {
        self.task.abort();
    }

    fn destroy(&mut self) {
        self.task.abort();
    }
}

impl Drop for TaskControl {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Maps a `reqwest` failure to a socket-style error code.
fn classify(error: reqwest::Error) -> TransportError {
    let code = source_code(&error).unwrap_or(if error.is_timeout() {
        "ETIMEDOUT"
    } else if error.is_connect() {
        "ECONNREFUSED"
    } else if error.is_body() || error.is_decode() {
        "ECONNRESET"
    } else if error.is_builder() {
        crate::error::EINVAL
    } else {
        "EPROTO"
    });
    TransportError::new(code, error.to_string()).with_source(error)
}

/// Looks for an I/O or DNS failure in the error's source chain.
fn source_code(error: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if let Some(code) = io_code(io.kind()) {
                return Some(code);
            }
        }
        if err.to_string().contains("dns error") {
            return Some("ENOTFOUND");
        }
        current = err.source();
    }
    None
}

fn io_code(kind: io::ErrorKind) -> Option<&'static str> {
    use io::ErrorKind::*;
    Some(match kind {
        ConnectionRefused => "ECONNREFUSED",
        ConnectionReset | UnexpectedEof => "ECONNRESET",
        ConnectionAborted => "ECONNABORTED",
        TimedOut => "ETIMEDOUT",
        BrokenPipe => "EPIPE",
        AddrNotAvailable => "EADDRNOTAVAIL",
        AddrInUse => "EADDRINUSE",
        NotConnected => "ENOTCONN",
        _ => return None,
    })
}

/// A transport that fails every exchange, used when the shared client could
/// not be built.
struct Unavailable {
    reason: String,
}

impl Transport for Unavailable {
    fn issue(&self, _request: TransportRequest) -> Exchange {
        Exchange::failed(TransportError::new(crate::error::EINVAL, self.reason.clone()))
    }
}

/// The process-wide transport behind the module-level functions.
pub(crate) fn shared() -> Arc<dyn Transport> {
    static SHARED: OnceLock<Arc<dyn Transport>> = OnceLock::new();
    let transport = SHARED.get_or_init(|| match HttpTransport::new() {
        Ok(transport) => Arc::new(transport) as Arc<dyn Transport>,
        Err(e) => {
            tracing::error!(error = %e, "Default HTTP transport unavailable");
            Arc::new(Unavailable {
                reason: e.to_string(),
            }) as Arc<dyn Transport>
        }
    });
    Arc::clone(transport)
}
