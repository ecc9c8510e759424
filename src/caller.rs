//! The defaults caller.
//!
//! A [`Caller`] holds an immutable snapshot of default options. Every request
//! it makes merges the snapshot, the verb, and the per-call options, in that
//! order, into a fresh option set. [`Caller::defaults`] layers more options
//! into a new snapshot and never touches the one it came from.

use crate::{
    body::Body,
    executor::{self, Call},
    http_transport,
    options::{merge, RequestOptions, UriInput},
    transport::Transport,
    Error, Response, Result,
};
use http::Method;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Makes requests with a set of default options.
///
/// Cloning a `Caller` is cheap; clones share the same snapshot and transport.
///
/// # Examples
///
/// ```no_run
/// use microreq::{Encoding, RequestOptions};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), microreq::Error> {
/// let api = microreq::defaults(
///     RequestOptions::new()
///         .with_base_url("http://localhost:1337/api")
///         .with_header("x-api-key", "secret")?
///         .with_encoding(Encoding::Json)
///         .with_timeout(Duration::from_secs(5)),
/// );
///
/// let user = api.get("/users/123", None).await?;
/// println!("{:?}", user.body.as_json());
///
/// let created = api
///     .post("/users", Some(serde_json::json!({ "name": "Alice" }).into()))
///     .await?;
/// println!("status {}", created.status);
///
/// // Layer more defaults without touching `api`.
/// let admin = api.defaults(RequestOptions::new().with_header("x-role", "admin")?);
/// admin.del("/users/123", None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Caller {
    opts: Arc<RequestOptions>,
    transport: Arc<dyn Transport>,
}

impl Caller {
    /// Creates a caller over the shared HTTP transport.
    pub fn new(options: impl Into<Option<RequestOptions>>) -> Self {
        Self::with_transport(http_transport::shared(), options)
    }

    /// Creates a caller over `transport`.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        options: impl Into<Option<RequestOptions>>,
    ) -> Self {
        Self {
            opts: Arc::new(options.into().unwrap_or_default()),
            transport,
        }
    }

    /// The default options of this caller.
    pub fn options(&self) -> &RequestOptions {
        &self.opts
    }

    /// Returns a new caller with `options` merged over this caller's
    /// defaults.
    pub fn defaults(&self, options: impl Into<Option<RequestOptions>>) -> Caller {
        let options = options.into();
        Self {
            opts: Arc::new(merge(RequestOptions::clone(&self.opts), [options.as_ref()])),
            transport: Arc::clone(&self.transport),
        }
    }

    /// Issues a request and returns the in-flight [`Call`].
    ///
    /// Use this for `no_req_end` requests, whose body is written through
    /// [`Call::body_writer`].
    ///
    /// # Errors
    ///
    /// Returns usage errors (missing or malformed URL, unsupported protocol,
    /// unserializable body) before anything is sent.
    pub fn start(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Call> {
        self.start_call(None, uri.into(), body)
    }

    /// Makes a request with the method from the merged options (`GET` when
    /// none is set).
    ///
    /// # Errors
    ///
    /// See [`Call::response`].
    pub async fn request(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.start(uri, body)?.response().await
    }

    /// Makes a request and hands the outcome to `callback` on a spawned task.
    ///
    /// `callback` runs exactly once, unless the returned handle is aborted
    /// first.
    ///
    /// # Errors
    ///
    /// Returns usage errors right away, without calling `callback`. Must be
    /// called within a Tokio runtime.
    pub fn request_with<F>(
        &self,
        uri: impl Into<UriInput>,
        body: Option<Body>,
        callback: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Usage(format!("request_with needs a Tokio runtime: {}", e)))?;
        let call = self.start(uri, body)?;
        Ok(runtime.spawn(async move { callback(call.response().await) }))
    }

    /// Makes a request with `method`. Every verb shortcut goes through here.
    ///
    /// # Errors
    ///
    /// See [`Call::response`].
    pub async fn call(
        &self,
        method: Method,
        uri: impl Into<UriInput>,
        body: Option<Body>,
    ) -> Result<Response> {
        self.start_call(Some(method), uri.into(), body)?
            .response()
            .await
    }

    fn start_call(&self, method: Option<Method>, uri: UriInput, body: Option<Body>) -> Result<Call> {
        let verb = method.map(|method| RequestOptions::new().with_method(method));
        let per_call = uri.into_options();
        let options = merge(
            RequestOptions::clone(&self.opts),
            [verb.as_ref(), Some(&per_call)],
        );
        executor::start(Arc::clone(&self.transport), options, body)
    }

    /// Makes a `GET` request.
    pub async fn get(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::GET, uri, body).await
    }

    /// Makes a `HEAD` request.
    pub async fn head(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::HEAD, uri, body).await
    }

    /// Makes a `POST` request.
    pub async fn post(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::POST, uri, body).await
    }

    /// Makes a `PUT` request.
    pub async fn put(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::PUT, uri, body).await
    }

    /// Makes a `PATCH` request.
    pub async fn patch(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::PATCH, uri, body).await
    }

    /// Makes a `DELETE` request.
    pub async fn del(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.call(Method::DELETE, uri, body).await
    }

    /// Same as [`del`](Caller::del).
    pub async fn delete(&self, uri: impl Into<UriInput>, body: Option<Body>) -> Result<Response> {
        self.del(uri, body).await
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("options", &self.opts)
            .finish_non_exhaustive()
    }
}
