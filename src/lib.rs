//! # microreq - A minimal HTTP request client
//!
//! microreq performs one HTTP/HTTPS round trip per call and hands back the
//! response, taking care of the usual conveniences: URL parsing, body
//! serialization, `Content-Length`, basic auth, response decoding, timeouts,
//! redirect following, and layered default options.
//!
//! ## Quick Start
//!
//! ```no_run
//! use microreq::{Encoding, RequestOptions};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), microreq::Error> {
//!     // One-off request: raw bytes back
//!     let response = microreq::request("http://localhost:1337/health", None).await?;
//!     println!("{} {:?}", response.status, response.body.as_bytes());
//!
//!     // A caller with defaults
//!     let api = microreq::defaults(
//!         RequestOptions::new()
//!             .with_base_url("http://localhost:1337/api")
//!             .with_encoding(Encoding::Json)
//!             .with_timeout(Duration::from_secs(10))
//!             .with_max_redirects(3),
//!     );
//!
//!     let user: User = api.get("/users/123", None).await?.json()?;
//!     println!("User: {} ({})", user.name, user.id);
//!
//!     let created = api
//!         .post("/users", Some(serde_json::json!({ "name": "Alice" }).into()))
//!         .await?;
//!     println!("Created in {:?}", created.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Timeouts
//!
//! A timeout is armed when the request is issued and covers the whole
//! exchange. It fails with `ETIMEDOUT` if the server never answered and with
//! `ESOCKETTIMEDOUT` if the response stalled part way. Either way the
//! connection is torn down at the deadline, even when nobody is awaiting the
//! call or reading its body stream.
//!
//! ```no_run
//! use microreq::{Error, RequestOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let options = RequestOptions::new()
//!     .with_url("http://localhost:1337/slow")
//!     .with_timeout(Duration::from_millis(250));
//!
//! match microreq::request(options, None).await {
//!     Ok(response) => println!("status {}", response.status),
//!     Err(e) if e.is_timeout() => eprintln!("gave up: {}", e.code()),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming
//!
//! `no_req_end` leaves the request body open for a [`BodyWriter`];
//! `no_res_listen` delivers the response once headers arrive, with the body as
//! a [`BodyStream`].
//!
//! ```no_run
//! use microreq::{Method, RequestOptions};
//!
//! # async fn example() -> Result<(), microreq::Error> {
//! let options = RequestOptions::new()
//!     .with_url("http://localhost:1337/upload")
//!     .with_method(Method::POST)
//!     .with_no_req_end(true)
//!     .with_no_res_listen(true);
//!
//! let mut call = microreq::start(options, None)?;
//! if let Some(writer) = call.body_writer() {
//!     writer.write("part one,").await?;
//!     writer.write("part two").await?;
//!     writer.end();
//! }
//!
//! let response = call.response().await?;
//! if let Some(mut body) = response.into_stream() {
//!     while let Some(chunk) = body.next_chunk().await {
//!         println!("{} bytes", chunk?.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod body;
mod caller;
pub mod error;
mod executor;
mod http_transport;
mod options;
mod redirect;
mod resolve;
mod response;
mod transport;

pub use body::{Body, ResponseBody};
pub use caller::Caller;
pub use error::{Error, Result, TransportError};
pub use executor::{BodyWriter, Call};
pub use http::Method;
pub use http_transport::HttpTransport;
pub use options::{merge, Auth, Encoding, Protocol, RequestOptions, UriInput};
pub use resolve::{resolve, ParsedUrl};
pub use response::{BodyStream, Response};
pub use transport::{
    Chunk, Exchange, ExchangeControl, RequestBody, ResponseHead, Transport, TransportEvent,
    TransportRequest,
};

/// Makes a request with the shared default transport.
///
/// The method comes from `uri`'s options and defaults to `GET`.
///
/// # Errors
///
/// See [`Call::response`].
pub async fn request(uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
    Caller::default().request(uri, body).await
}

/// Makes a request and hands the outcome to `callback` on a spawned task.
///
/// # Errors
///
/// Returns usage errors right away, without calling `callback`.
pub fn request_with<F>(
    uri: impl Into<UriInput>,
    body: Option<Body>,
    callback: F,
) -> Result<tokio::task::JoinHandle<()>>
where
    F: FnOnce(Result<Response>) + Send + 'static,
{
    Caller::default().request_with(uri, body, callback)
}

/// Issues a request and returns the in-flight [`Call`].
///
/// # Errors
///
/// Returns usage errors before anything is sent.
pub fn start(uri: impl Into<UriInput>, body: Option<Body>) -> Result<Call> {
    Caller::default().start(uri, body)
}

/// Creates a [`Caller`] with `options` as its defaults.
pub fn defaults(options: impl Into<Option<RequestOptions>>) -> Caller {
    Caller::new(options)
}
