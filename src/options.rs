//! Request options and the option merger.
//!
//! [`RequestOptions`] is the one configuration record every call is built
//! from. Callers layer option sets with [`merge`]: `headers` merge by name,
//! every other key that a later source sets replaces the earlier value.

use crate::{body::Body, Error, Result};
use base64::Engine as _;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Options for a request.
///
/// Every recognized option is optional so that "not set" can be told apart
/// from "set to the default", which is what lets a later merge source
/// override an earlier one with `false` or `0`.
///
/// Address fields (`protocol`, `hostname`, `port`, `path`) set here always
/// win over the same fields parsed out of `url`.
///
/// # Examples
///
/// ```
/// use microreq::{Encoding, RequestOptions};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), microreq::Error> {
/// let options = RequestOptions::new()
///     .with_base_url("http://localhost:1337/api/")
///     .with_header("x-request-id", "abc123")?
///     .with_encoding(Encoding::Json)
///     .with_timeout(Duration::from_secs(5))
///     .with_max_redirects(3);
///
/// assert_eq!(options.max_redirects, Some(3));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Absolute URL, or a path resolved against `base_url`.
    pub url: Option<String>,

    /// Prefix for relative (`/...` or empty) URLs.
    pub base_url: Option<String>,

    /// The HTTP method. `GET` when unset.
    pub method: Option<Method>,

    /// Request headers, merged by name.
    pub headers: HeaderMap,

    /// Body used when the call itself does not pass one.
    pub body: Option<Body>,

    /// How to decode the response body. Raw bytes when unset.
    pub encoding: Option<Encoding>,

    /// Deadline for the whole exchange, armed when the request is issued.
    pub timeout: Option<Duration>,

    /// Remaining redirect budget. Unbounded when unset.
    pub max_redirects: Option<u32>,

    /// Basic auth credentials.
    pub auth: Option<Auth>,

    /// Explicit protocol.
    pub protocol: Option<Protocol>,

    /// Explicit host name.
    pub hostname: Option<String>,

    /// Explicit port.
    pub port: Option<u16>,

    /// Explicit path, including the query string.
    pub path: Option<String>,

    /// Leave the request body open; the caller streams it with a
    /// [`BodyWriter`](crate::BodyWriter).
    pub no_req_end: Option<bool>,

    /// Deliver the response as soon as headers arrive, with the body as a
    /// [`BodyStream`](crate::BodyStream).
    pub no_res_listen: Option<bool>,

    /// Unrecognized options, handed to the transport verbatim.
    pub extra: Map<String, Value>,
}

impl RequestOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON-shaped configuration value.
    ///
    /// Keys are camelCase (`baseUrl`, `maxRedirects`, `noResListen`, ...),
    /// `timeout` is in milliseconds, and unrecognized keys are kept in
    /// [`RequestOptions::extra`].
    ///
    /// ```
    /// use microreq::RequestOptions;
    /// use serde_json::json;
    ///
    /// let options = RequestOptions::from_json(json!({
    ///     "url": "http://localhost/users",
    ///     "headers": { "X-Unit-Test": "789A" },
    ///     "auth": { "user": "u", "pass": "p" },
    ///     "timeout": 250,
    ///     "agent": "keepalive",
    /// })).unwrap();
    ///
    /// assert_eq!(options.auth.unwrap().as_str(), "u:p");
    /// assert_eq!(options.extra["agent"], "keepalive");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a usage error when a value has the wrong shape, or names an
    /// unknown method, encoding or protocol.
    pub fn from_json(value: Value) -> Result<Self> {
        RawOptions::deserialize(value)
            .map_err(|e| Error::Usage(format!("Invalid options: {}", e)))?
            .try_into()
    }

    /// Sets the URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Adds a header, replacing any earlier value with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the default body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the response encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the redirect budget.
    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Sets basic auth credentials.
    pub fn with_auth(mut self, auth: impl Into<Auth>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Sets the protocol explicitly.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the host name explicitly.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the port explicitly.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the path (and query) explicitly.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Keeps the request body open for streaming.
    pub fn with_no_req_end(mut self, no_req_end: bool) -> Self {
        self.no_req_end = Some(no_req_end);
        self
    }

    /// Delivers the response body as a stream.
    pub fn with_no_res_listen(mut self, no_res_listen: bool) -> Self {
        self.no_res_listen = Some(no_res_listen);
        self
    }

    /// Adds a transport option that this crate does not interpret.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Merges `source` over `self`.
    ///
    /// Headers merge by name: all of the source's values for a name replace
    /// the existing values for that name. Every other option the source sets
    /// overwrites the existing one.
    pub fn merge_from(&mut self, source: &RequestOptions) {
        for name in source.headers.keys() {
            self.headers.remove(name);
        }
        for (name, value) in &source.headers {
            self.headers.append(name.clone(), value.clone());
        }

        macro_rules! overwrite {
            ($($field:ident),+ $(,)?) => {
                $(
                    if let Some(value) = &source.$field {
                        self.$field = Some(value.clone());
                    }
                )+
            };
        }
        overwrite!(
            url,
            base_url,
            method,
            body,
            encoding,
            timeout,
            max_redirects,
            auth,
            protocol,
            hostname,
            port,
            path,
            no_req_end,
            no_res_listen,
        );

        for (key, value) in &source.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn no_req_end(&self) -> bool {
        self.no_req_end.unwrap_or(false)
    }

    pub(crate) fn no_res_listen(&self) -> bool {
        self.no_res_listen.unwrap_or(false)
    }
}

impl<'de> Deserialize<'de> for RequestOptions {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawOptions::deserialize(deserializer)?
            .try_into()
            .map_err(serde::de::Error::custom)
    }
}

/// Merges `sources` over `dst`, left to right.
///
/// `None` sources are skipped, so an absent layer never clears anything.
///
/// # Examples
///
/// ```
/// use microreq::{merge, RequestOptions};
///
/// # fn example() -> Result<(), microreq::Error> {
/// let base = RequestOptions::new().with_max_redirects(1).with_header("x", "1")?;
/// let over = RequestOptions::new().with_max_redirects(2).with_header("y", "2")?;
///
/// let merged = merge(base, [Some(&over), None]);
/// assert_eq!(merged.max_redirects, Some(2));
/// assert_eq!(merged.headers.len(), 2);
/// # Ok(())
/// # }
/// ```
pub fn merge<'a, I>(mut dst: RequestOptions, sources: I) -> RequestOptions
where
    I: IntoIterator<Item = Option<&'a RequestOptions>>,
{
    for source in sources.into_iter().flatten() {
        dst.merge_from(source);
    }
    dst
}

/// The target of a call: a URL string or a full option set.
#[derive(Debug, Clone)]
pub enum UriInput {
    /// A URL, absolute or relative to the caller's `base_url`.
    Url(String),
    /// Options carrying `url` and/or address fields.
    Options(RequestOptions),
}

impl UriInput {
    pub(crate) fn into_options(self) -> RequestOptions {
        match self {
            UriInput::Url(url) => RequestOptions::new().with_url(url),
            UriInput::Options(options) => options,
        }
    }
}

impl From<&str> for UriInput {
    fn from(url: &str) -> Self {
        UriInput::Url(url.to_string())
    }
}

impl From<String> for UriInput {
    fn from(url: String) -> Self {
        UriInput::Url(url)
    }
}

impl From<&String> for UriInput {
    fn from(url: &String) -> Self {
        UriInput::Url(url.clone())
    }
}

impl From<url::Url> for UriInput {
    fn from(url: url::Url) -> Self {
        UriInput::Url(url.into())
    }
}

impl From<RequestOptions> for UriInput {
    fn from(options: RequestOptions) -> Self {
        UriInput::Options(options)
    }
}

/// Basic auth credentials, normalized to `user:pass`.
///
/// ```
/// use microreq::Auth;
///
/// assert_eq!(Auth::basic("u", "p"), Auth::from("u:p"));
/// assert_eq!(Auth::from("u:p").header_value().unwrap(), "Basic dTpw");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Auth(String);

impl Auth {
    /// Creates credentials from a `user:pass` string.
    pub fn new(credentials: impl Into<String>) -> Self {
        Self(credentials.into())
    }

    /// Creates credentials from a user name and password.
    pub fn basic(username: impl fmt::Display, password: impl fmt::Display) -> Self {
        Self(format!("{}:{}", username, password))
    }

    /// The normalized `user:pass` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `Authorization` header value, `Basic <base64>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot form a header value.
    pub fn header_value(&self) -> Result<HeaderValue> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
        HeaderValue::try_from(format!("Basic {}", encoded))
            .map_err(|e| Error::ConfigurationError(format!("Invalid auth header: {}", e)))
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self.0.split(':').next().unwrap_or_default();
        f.debug_tuple("Auth").field(&format_args!("{}:***", user)).finish()
    }
}

impl From<&str> for Auth {
    fn from(credentials: &str) -> Self {
        Self::new(credentials)
    }
}

impl From<String> for Auth {
    fn from(credentials: String) -> Self {
        Self::new(credentials)
    }
}

impl<'de> Deserialize<'de> for Auth {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AuthRepr {
            Credentials(String),
            Fields {
                #[serde(alias = "user")]
                username: String,
                #[serde(alias = "pass", default)]
                password: String,
            },
        }

        Ok(match AuthRepr::deserialize(deserializer)? {
            AuthRepr::Credentials(credentials) => Auth::new(credentials),
            AuthRepr::Fields { username, password } => Auth::basic(username, password),
        })
    }
}

/// How a response body is decoded.
///
/// When no encoding is set the body is returned as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Parse as JSON, falling back to the raw text when parsing fails.
    Json,
    /// Decode to text with the given character set.
    Charset(&'static encoding_rs::Encoding),
}

impl Encoding {
    /// Looks up an encoding by name: `json`, or any WHATWG charset label
    /// (`utf-8`, `utf8`, `latin1`, `iso-8859-2`, ...).
    ///
    /// # Errors
    ///
    /// Returns a usage error for unknown names.
    pub fn from_label(label: &str) -> Result<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("json") {
            return Ok(Encoding::Json);
        }
        encoding_rs::Encoding::for_label(label.as_bytes())
            .map(Encoding::Charset)
            .ok_or_else(|| Error::Usage(format!("Unknown encoding: {}", label)))
    }

    /// UTF-8 text.
    pub fn utf8() -> Self {
        Encoding::Charset(encoding_rs::UTF_8)
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Encoding::from_label(s)
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Encoding::from_label(&label).map_err(serde::de::Error::custom)
    }
}

/// The wire protocol of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// The protocol as it appears before `//` in a URL, e.g. `http:`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http:",
            Protocol::Https => "https:",
        }
    }

    /// The scheme name without the trailing colon.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// The port used when none is given.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(Error::Usage(format!("Unsupported protocol: {}:", other))),
        }
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let protocol = String::deserialize(deserializer)?;
        protocol.parse().map_err(serde::de::Error::custom)
    }
}

/// Wire shape of [`RequestOptions`] in configuration files.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawOptions {
    url: Option<String>,
    base_url: Option<String>,
    method: Option<String>,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    encoding: Option<Encoding>,
    timeout: Option<u64>,
    max_redirects: Option<u32>,
    auth: Option<Auth>,
    protocol: Option<Protocol>,
    hostname: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    no_req_end: Option<bool>,
    no_res_listen: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawOptions> for RequestOptions {
    type Error = Error;

    fn try_from(raw: RawOptions) -> Result<Self> {
        let method = raw
            .method
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|e| Error::Usage(format!("Invalid method {}: {}", m, e)))
            })
            .transpose()?;

        let mut options = RequestOptions {
            url: raw.url,
            base_url: raw.base_url,
            method,
            headers: HeaderMap::new(),
            body: raw.body.map(Body::from),
            encoding: raw.encoding,
            timeout: raw.timeout.map(Duration::from_millis),
            max_redirects: raw.max_redirects,
            auth: raw.auth,
            protocol: raw.protocol,
            hostname: raw.hostname,
            port: raw.port,
            path: raw.path,
            no_req_end: raw.no_req_end,
            no_res_listen: raw.no_res_listen,
            extra: raw.extra,
        };
        for (name, value) in &raw.headers {
            options = options.with_header(name, value)?;
        }
        Ok(options)
    }
}
