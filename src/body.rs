//! Request body serialization and response body decoding.

use crate::{
    options::Encoding,
    response::BodyStream,
    transport::Chunk,
    Error, Result,
};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;

/// A request body.
///
/// Bytes and text are sent as-is; any other value is sent as JSON.
///
/// ```
/// use microreq::Body;
/// use serde_json::json;
///
/// let raw = Body::from("test req body");
/// let json = Body::from(json!({ "testBody": "test req body" }));
/// # let _ = (raw, json);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Raw bytes.
    Bytes(Bytes),
    /// Text, sent as UTF-8.
    Text(String),
    /// A value sent JSON-encoded.
    Json(Value),
}

impl Body {
    /// Serializes `value` into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| Error::SerializationFailed(e.to_string()))
    }

    /// Returns `true` if this body will be JSON-encoded on the wire.
    pub fn is_json(&self) -> bool {
        matches!(self, Body::Json(_))
    }

    pub(crate) fn serialize(&self) -> Result<Bytes> {
        match self {
            Body::Bytes(bytes) => Ok(bytes.clone()),
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| Error::SerializationFailed(e.to_string())),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Body::Text(text),
            other => Body::Json(other),
        }
    }
}

/// A decoded response body.
///
/// The variant follows the call's [`Encoding`]: raw bytes when none was set,
/// text for a charset, and a JSON value for `json` (or the raw text when the
/// body was not valid JSON).
#[derive(Debug)]
pub enum ResponseBody {
    /// Raw bytes.
    Bytes(Bytes),
    /// Decoded text.
    Text(String),
    /// A parsed JSON value.
    Json(Value),
    /// The unread body, when the call was made with `no_res_listen`.
    Stream(BodyStream),
}

impl ResponseBody {
    /// The raw bytes, if the body was not decoded.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The text, if the body was decoded to text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The JSON value, if the body parsed as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Takes the stream out of a `no_res_listen` body.
    pub fn into_stream(self) -> Option<BodyStream> {
        match self {
            ResponseBody::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

/// Response chunks, kept as received until the body ends.
#[derive(Debug, Default)]
pub(crate) struct ChunkBuffer {
    chunks: Vec<Chunk>,
}

impl ChunkBuffer {
    pub(crate) fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Concatenates the chunks and applies `encoding`.
    pub(crate) fn finish(self, encoding: Option<Encoding>) -> ResponseBody {
        match encoding {
            None => ResponseBody::Bytes(self.into_bytes()),
            Some(Encoding::Charset(charset)) => ResponseBody::Text(self.into_text(charset)),
            Some(Encoding::Json) => {
                let text = self.into_text(encoding_rs::UTF_8);
                match serde_json::from_str(&text) {
                    Ok(value) => ResponseBody::Json(value),
                    Err(e) => {
                        tracing::debug!(error = %e, "Response is not JSON, returning raw text");
                        ResponseBody::Text(text)
                    }
                }
            }
        }
    }

    fn into_bytes(mut self) -> Bytes {
        if let [Chunk::Binary(_)] = self.chunks.as_slice() {
            if let Some(Chunk::Binary(bytes)) = self.chunks.pop() {
                return bytes;
            }
        }
        let mut buf = BytesMut::with_capacity(self.len());
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk.as_bytes());
        }
        buf.freeze()
    }

    /// Decodes each run of binary chunks with `charset`; text chunks are
    /// already decoded and are appended as they are.
    fn into_text(self, charset: &'static encoding_rs::Encoding) -> String {
        let mut text = String::with_capacity(self.len());
        let mut run = BytesMut::new();
        for chunk in self.chunks {
            match chunk {
                Chunk::Binary(bytes) => run.extend_from_slice(&bytes),
                Chunk::Text(part) => {
                    decode_run(charset, &mut run, &mut text);
                    text.push_str(&part);
                }
            }
        }
        decode_run(charset, &mut run, &mut text);
        text
    }
}

fn decode_run(charset: &'static encoding_rs::Encoding, run: &mut BytesMut, out: &mut String) {
    if run.is_empty() {
        return;
    }
    let (decoded, had_errors) = charset.decode_without_bom_handling(&run[..]);
    if had_errors {
        tracing::debug!(charset = charset.name(), "Replaced malformed sequences in response text");
    }
    out.push_str(&decoded);
    run.clear();
}
