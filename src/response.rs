//! Responses, and the streaming body handed out in `no_res_listen` mode.
//!
//! A [`Response`] carries the decoded body along with the status, headers,
//! final URL, and timing of the call, including any redirects it followed.

use crate::{
    body::ResponseBody,
    executor::deadline_passed,
    transport::{Chunk, Exchange, TransportEvent},
    Error, Result, TransportError,
};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// A completed HTTP response.
///
/// # Examples
///
/// ```no_run
/// use microreq::{Encoding, RequestOptions};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), microreq::Error> {
/// let options = RequestOptions::new()
///     .with_url("http://localhost:1337/users/123")
///     .with_encoding(Encoding::Json);
/// let response = microreq::request(options, None).await?;
///
/// let user: User = response.json()?;
/// println!("User: {} ({})", user.name, user.id);
/// println!("Request took {:?} over {} redirects", response.latency, response.redirects);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The HTTP version of the response.
    pub version: Version,

    /// The response headers.
    pub headers: HeaderMap,

    /// The URL that produced this response, after redirects.
    pub url: String,

    /// The body, decoded per the call's encoding.
    pub body: ResponseBody,

    /// Time from issuing the first request until the response was delivered,
    /// across all redirect hops.
    pub latency: Duration,

    /// The number of redirects followed.
    pub redirects: u32,
}

impl Response {
    /// Returns `true` if the call followed at least one redirect.
    pub fn was_redirected(&self) -> bool {
        self.redirects > 0
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The body as text, if it has been read.
    ///
    /// Raw bytes are decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Some(String::from_utf8_lossy(bytes)),
            ResponseBody::Text(text) => Some(Cow::Borrowed(text)),
            ResponseBody::Json(value) => Some(Cow::Owned(value.to_string())),
            ResponseBody::Stream(_) => None,
        }
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body when it does
    /// not match `T`, and a usage error if the body is an unread stream.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = match &self.body {
            ResponseBody::Json(value) => T::deserialize(value),
            ResponseBody::Text(text) => serde_json::from_str(text),
            ResponseBody::Bytes(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Stream(_) => {
                return Err(Error::Usage(
                    "response body is a stream; read it with BodyStream".to_string(),
                ))
            }
        };

        parsed.map_err(|e| {
            let raw_response = self.text().unwrap_or_default().into_owned();
            tracing::error!(
                error = %e,
                raw_response = %raw_response,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response,
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }

    /// Takes the body stream of a `no_res_listen` response.
    pub fn into_stream(self) -> Option<BodyStream> {
        self.body.into_stream()
    }
}

/// The unread body of a `no_res_listen` response.
///
/// The call's deadline stays armed: when it passes the connection is closed
/// even if nobody is reading, and the next read yields one
/// [`Error::SocketTimeout`] before the stream ends.
/// Dropping the stream releases the connection.
pub struct BodyStream {
    exchange: Exchange,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    finished: bool,
}

enum Wake {
    Event(Option<TransportEvent>),
    Deadline,
}

impl BodyStream {
    pub(crate) fn new(exchange: Exchange, deadline: Option<Instant>, timeout: Option<Duration>) -> Self {
        Self {
            exchange,
            deadline,
            timeout,
            finished: false,
        }
    }

    /// Returns `true` once the body ended or failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads the next chunk.
    ///
    /// Returns `None` at the end of the body. At most one error is ever
    /// returned; after it the stream only returns `None`.
    pub async fn next_chunk(&mut self) -> Option<Result<Chunk>> {
        while !self.finished {
            if self.exchange.expired() {
                return Some(Err(self.time_out()));
            }
            let wake = tokio::select! {
                biased;
                event = self.exchange.next_event() => Wake::Event(event),
                () = deadline_passed(self.deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Event(Some(TransportEvent::Data(chunk))) => return Some(Ok(chunk)),
                Wake::Event(Some(TransportEvent::Connected(_))) => continue,
                Wake::Event(Some(TransportEvent::End)) => {
                    self.finished = true;
                    self.exchange.close();
                }
                Wake::Event(Some(TransportEvent::Error(e))) => return Some(Err(self.fail(e))),
                Wake::Event(None) if self.exchange.expired() => return Some(Err(self.time_out())),
                Wake::Event(None) => return Some(Err(self.fail(TransportError::hang_up()))),
                Wake::Deadline => return Some(Err(self.time_out())),
            }
        }
        None
    }

    /// Reads the rest of the body into one buffer.
    ///
    /// # Errors
    ///
    /// Returns the stream's error, discarding anything read so far.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(chunk?.as_bytes());
        }
        Ok(buf.freeze())
    }

    fn time_out(&mut self) -> Error {
        let timeout = self.timeout.unwrap_or_default();
        self.finished = true;
        self.exchange.destroy();
        tracing::warn!(
            timeout_ms = timeout.as_millis(),
            "Response stream timed out"
        );
        Error::SocketTimeout { timeout }
    }

    fn fail(&mut self, error: TransportError) -> Error {
        self.finished = true;
        self.exchange.destroy();
        tracing::warn!(code = error.code(), error = %error, "Response stream failed");
        Error::Data(error)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("timeout", &self.timeout)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde::Deserialize;
    use serde_json::json;

    fn response(body: ResponseBody) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Response {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers,
            url: "http://localhost:80/".to_string(),
            body,
            latency: Duration::from_millis(100),
            redirects: 0,
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Data {
        a: u32,
    }

    #[test]
    fn test_header_lookup() {
        let response = response(ResponseBody::Bytes(Bytes::new()));
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
        assert!(!response.was_redirected());
    }

    #[test]
    fn test_typed_json_from_any_body() {
        assert_eq!(
            response(ResponseBody::Json(json!({"a": 1}))).json::<Data>().unwrap(),
            Data { a: 1 }
        );
        assert_eq!(
            response(ResponseBody::Text("{\"a\":2}".to_string())).json::<Data>().unwrap(),
            Data { a: 2 }
        );
        assert_eq!(
            response(ResponseBody::Bytes(Bytes::from_static(b"{\"a\":3}")))
                .json::<Data>()
                .unwrap(),
            Data { a: 3 }
        );
    }

    #[test]
    fn test_typed_json_failure_keeps_raw_body() {
        let result = response(ResponseBody::Text("{\"a\"1}".to_string())).json::<Data>();
        match result {
            Err(Error::DeserializationFailed {
                raw_response,
                status,
                ..
            }) => {
                assert_eq!(raw_response, "{\"a\"1}");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected DeserializationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_text_views() {
        assert_eq!(
            response(ResponseBody::Bytes(Bytes::from_static(b"ok"))).text().as_deref(),
            Some("ok")
        );
        assert_eq!(
            response(ResponseBody::Json(json!([1, 2]))).text().as_deref(),
            Some("[1,2]")
        );
    }
}
