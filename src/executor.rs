//! Request execution.
//!
//! A call moves through `Connecting`, then `Streaming` (or straight to a
//! redirect hop, or to a delivered stream in `no_res_listen` mode), and ends in
//! `Done`. Whatever happens first (transport error, deadline, end of body)
//! settles the hop; the event channel is closed at that point so nothing the
//! transport sends later can produce a second outcome.

use crate::{
    body::{Body, ChunkBuffer, ResponseBody},
    options::{Encoding, RequestOptions},
    redirect,
    resolve::{resolve_target, Target},
    response::BodyStream,
    transport::{Exchange, RequestBody, ResponseHead, Transport, TransportEvent, TransportRequest},
    Error, Response, Result, TransportError,
};
use bytes::Bytes;
use http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
    HeaderMap, HeaderValue, Method, StatusCode,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Chunks a [`BodyWriter`] may queue before `write` waits.
const WRITE_BUFFER: usize = 16;

/// Resolves when `deadline` passes; never resolves without one.
pub(crate) async fn deadline_passed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Writes the body of a `no_req_end` request.
///
/// The body ends when the writer is dropped or [`end`](BodyWriter::end) is
/// called.
#[derive(Debug)]
pub struct BodyWriter {
    sender: mpsc::Sender<Bytes>,
}

impl BodyWriter {
    /// Sends one chunk of the request body.
    ///
    /// # Errors
    ///
    /// Returns an `EPIPE` data error if the transport stopped reading.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.sender
            .send(chunk.into())
            .await
            .map_err(|_closed| Error::Data(TransportError::new("EPIPE", "request body closed")))
    }

    /// Ends the request body.
    pub fn end(self) {}
}

/// An issued call.
///
/// The request is already on its way when a `Call` exists; the timeout is
/// counted from that moment. Await [`response`](Call::response) for the
/// outcome. Dropping a `Call` tears the exchange down.
pub struct Call {
    transport: Arc<dyn Transport>,
    options: RequestOptions,
    target: Target,
    replay: Option<Bytes>,
    flight: InFlight,
    writer: Option<BodyWriter>,
    started: Instant,
}

/// Validates `options`, serializes `body`, and issues the first request.
///
/// Every usage error surfaces here, before the transport is touched.
pub(crate) fn start(
    transport: Arc<dyn Transport>,
    mut options: RequestOptions,
    body: Option<Body>,
) -> Result<Call> {
    let inherited = options.body.take();
    let body = body.or(inherited);

    let target = resolve_target(&mut options)?;
    let payload = body.as_ref().map(Body::serialize).transpose()?;
    if body.as_ref().is_some_and(Body::is_json) && !options.headers.contains_key(CONTENT_TYPE) {
        options
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    let (request_body, writer, replay) = if options.no_req_end() {
        let (sender, receiver) = mpsc::channel(WRITE_BUFFER);
        if let Some(first) = payload {
            // a fresh channel always has room for the first chunk
            let _ = sender.try_send(first);
        }
        options.headers.remove(CONTENT_LENGTH);
        options
            .headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        (RequestBody::Streaming(receiver), Some(BodyWriter { sender }), None)
    } else {
        let body = frame_body(&mut options.headers, payload.as_ref());
        (body, None, payload)
    };

    let started = Instant::now();
    let flight = InFlight::issue(transport.as_ref(), &options, &target, request_body);

    Ok(Call {
        transport,
        options,
        target,
        replay,
        flight,
        writer,
        started,
    })
}

/// Sets the framing headers for a complete (or absent) body.
fn frame_body(headers: &mut HeaderMap, payload: Option<&Bytes>) -> RequestBody {
    headers.remove(TRANSFER_ENCODING);
    match payload {
        Some(payload) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
            RequestBody::Full(payload.clone())
        }
        None => {
            headers.remove(CONTENT_LENGTH);
            RequestBody::Empty
        }
    }
}

impl Call {
    /// Takes the writer for a `no_req_end` request body.
    ///
    /// Returns `None` for ordinary requests, or if already taken.
    pub fn body_writer(&mut self) -> Option<BodyWriter> {
        self.writer.take()
    }

    /// The URL of the first hop.
    pub fn url(&self) -> String {
        self.target.href()
    }

    /// Waits for the outcome, following redirects.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the current hop: a transport error, a
    /// timeout ([`Error::ConnectTimeout`] before connecting,
    /// [`Error::SocketTimeout`] after), or [`Error::Redirect`] once the redirect
    /// budget is spent.
    pub async fn response(self) -> Result<Response> {
        let Call {
            transport,
            mut options,
            mut target,
            replay,
            mut flight,
            writer,
            started,
        } = self;
        // an untaken writer would keep a streamed body open forever
        drop(writer);

        let max_redirects = options.max_redirects;
        let mut redirects = 0;

        loop {
            match flight.settle(options.encoding, options.no_res_listen()).await? {
                Settled::Complete { head, body } => {
                    let latency = started.elapsed();
                    let url = target.href();
                    tracing::info!(
                        status = head.status.as_u16(),
                        url = %url,
                        latency_ms = latency.as_millis(),
                        redirects = redirects,
                        "Received HTTP response"
                    );
                    return Ok(Response {
                        status: head.status,
                        version: head.version,
                        headers: head.headers,
                        url,
                        body,
                        latency,
                        redirects,
                    });
                }
                Settled::Redirect { status, location } => {
                    let mut hop = redirect::next_hop(&options, &target, &location).map_err(|e| {
                        match e {
                            Error::Redirect { location, .. } => {
                                tracing::warn!(
                                    location = %location,
                                    redirects = redirects,
                                    "Redirect budget exhausted"
                                );
                                Error::Redirect {
                                    location,
                                    max_redirects: max_redirects.unwrap_or_default(),
                                }
                            }
                            other => other,
                        }
                    })?;
                    target = resolve_target(&mut hop)?;
                    if hop.no_req_end() {
                        tracing::warn!(
                            status = status.as_u16(),
                            location = %target.href(),
                            "Redirect drops the streamed request body"
                        );
                    }
                    let body = frame_body(&mut hop.headers, replay.as_ref());

                    tracing::debug!(
                        status = status.as_u16(),
                        location = %target.href(),
                        remaining = ?hop.max_redirects,
                        "Following redirect"
                    );
                    flight = InFlight::issue(transport.as_ref(), &hop, &target, body);
                    options = hop;
                    redirects += 1;
                }
            }
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("url", &self.target.href())
            .field("phase", &self.flight.phase)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Phase {
    Connecting,
    Streaming(ResponseHead),
    Done,
}

enum Settled {
    Complete { head: ResponseHead, body: ResponseBody },
    Redirect { status: StatusCode, location: String },
}

enum Wake {
    Event(Option<TransportEvent>),
    Deadline,
}

/// State of one hop: the exchange, its phase, and its deadline.
struct InFlight {
    exchange: Exchange,
    phase: Phase,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    chunks: ChunkBuffer,
}

impl InFlight {
    /// Issues the request and arms the deadline.
    fn issue(
        transport: &dyn Transport,
        options: &RequestOptions,
        target: &Target,
        body: RequestBody,
    ) -> Self {
        let request = TransportRequest {
            method: options.method.clone().unwrap_or(Method::GET),
            protocol: target.protocol,
            hostname: target.hostname.clone(),
            port: target.port,
            path: target.path.clone(),
            headers: options.headers.clone(),
            body,
            extra: options.extra.clone(),
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url(),
            timeout_ms = ?options.timeout.map(|t| t.as_millis()),
            "Issuing HTTP request"
        );

        // a timeout too large to represent never fires
        let deadline = options
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let mut exchange = transport.issue(request);
        if let Some(deadline) = deadline {
            exchange.arm(deadline);
        }
        Self {
            exchange,
            phase: Phase::Connecting,
            deadline,
            timeout: options.timeout,
            chunks: ChunkBuffer::default(),
        }
    }

    fn connected(&self) -> bool {
        !matches!(self.phase, Phase::Connecting)
    }

    /// Drives the hop until its first terminal event.
    async fn settle(mut self, encoding: Option<Encoding>, stream_body: bool) -> Result<Settled> {
        loop {
            if self.exchange.expired() {
                return Err(self.time_out());
            }
            let wake = tokio::select! {
                biased;
                event = self.exchange.next_event() => Wake::Event(event),
                () = deadline_passed(self.deadline) => Wake::Deadline,
            };

            let event = match wake {
                Wake::Event(Some(event)) => event,
                Wake::Event(None) if self.exchange.expired() => return Err(self.time_out()),
                Wake::Event(None) => return Err(self.fail(TransportError::hang_up())),
                Wake::Deadline => return Err(self.time_out()),
            };

            match event {
                TransportEvent::Error(e) => return Err(self.fail(e)),
                TransportEvent::Connected(head) => {
                    if self.connected() {
                        tracing::trace!("Ignoring repeated connect event");
                        continue;
                    }
                    self.exchange.mark_connected();
                    if let Some(location) = head.redirect_location() {
                        let location = location.to_string();
                        self.phase = Phase::Done;
                        self.exchange.destroy();
                        return Ok(Settled::Redirect {
                            status: head.status,
                            location,
                        });
                    }
                    if stream_body {
                        self.phase = Phase::Done;
                        let stream = BodyStream::new(self.exchange, self.deadline, self.timeout);
                        return Ok(Settled::Complete {
                            head,
                            body: ResponseBody::Stream(stream),
                        });
                    }
                    if let Some(Encoding::Charset(charset)) = encoding {
                        self.exchange.set_encoding(charset);
                    }
                    self.phase = Phase::Streaming(head);
                }
                TransportEvent::Data(chunk) => {
                    if self.connected() {
                        self.chunks.push(chunk);
                    } else {
                        tracing::trace!("Ignoring body data before connect");
                    }
                }
                TransportEvent::End => {
                    if !self.connected() {
                        return Err(self.fail(TransportError::hang_up()));
                    }
                    if let Phase::Streaming(head) = std::mem::replace(&mut self.phase, Phase::Done) {
                        self.exchange.close();
                        let body = std::mem::take(&mut self.chunks).finish(encoding);
                        return Ok(Settled::Complete { head, body });
                    }
                }
            }
        }
    }

    /// Tears the exchange down after a transport failure.
    fn fail(&mut self, error: TransportError) -> Error {
        let connected = self.connected();
        self.phase = Phase::Done;
        if connected {
            self.exchange.destroy();
            tracing::warn!(
                code = error.code(),
                error = %error,
                buffered_bytes = self.chunks.len(),
                "Response failed"
            );
            Error::Data(error)
        } else {
            self.exchange.abort();
            tracing::warn!(code = error.code(), error = %error, "Request failed");
            Error::Connect(error)
        }
    }

    /// Tears the exchange down when the deadline passes.
    fn time_out(&mut self) -> Error {
        let connected = self.connected();
        let timeout = self.timeout.unwrap_or_default();
        self.phase = Phase::Done;
        tracing::warn!(
            timeout_ms = timeout.as_millis(),
            connected = connected,
            "Request timed out"
        );
        if connected {
            self.exchange.destroy();
            Error::SocketTimeout { timeout }
        } else {
            self.exchange.abort();
            Error::ConnectTimeout { timeout }
        }
    }
}
