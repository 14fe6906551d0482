//! Blocking façade over the async session.
//!
//! One protocol core, two shapes: instead of a source-duplicated
//! synchronous twin, this module drives the async [`crate::Session`] on a
//! private current-thread runtime. Must not be used from inside an async
//! context; spawn a blocking task for that.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode, Version};

use crate::error::{Error, Result};
use crate::fields::{Headers, Param};
use crate::request::Body;
use crate::response::ResponseSnapshot;
use crate::retry::Retry;
use crate::session::{Redirects, SessionBuilder, Timeout};

pub struct Session {
    inner: crate::session::Session,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl Session {
    pub fn new() -> Result<Session> {
        Session::from_builder(crate::session::Session::builder())
    }

    pub fn from_builder(builder: SessionBuilder) -> Result<Session> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to build blocking runtime: {e}")))?;
        Ok(Session { inner: builder.build(), runtime: Arc::new(runtime) })
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder { session: self, inner: self.inner.request(method, url) }
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, url)
    }
}

pub struct RequestBuilder<'a> {
    session: &'a Session,
    inner: crate::session::RequestBuilder<'a>,
}

impl<'a> RequestBuilder<'a> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.header(name, value);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Param>) -> Self {
        self.inner = self.inner.param(key, value);
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.inner = self.inner.json(value);
        self
    }

    pub fn form<K: AsRef<str>, V: AsRef<str>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.inner = self.inner.form(pairs);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.inner = self.inner.body(body);
        self
    }

    pub fn auth(mut self, auth: crate::auth::Auth) -> Self {
        self.inner = self.inner.auth(auth);
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.inner = self.inner.timeout(timeout);
        self
    }

    pub fn redirects(mut self, redirects: impl Into<Redirects>) -> Self {
        self.inner = self.inner.redirects(redirects);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.inner = self.inner.retries(retries);
        self
    }

    pub fn send(self) -> Result<Response> {
        let runtime = self.session.runtime.clone();
        let response = runtime.block_on(self.inner.send())?;
        Ok(Response { inner: response, runtime })
    }
}

/// Blocking response handle. Body accessors drive the runtime until the
/// underlying stream completes.
pub struct Response {
    inner: crate::response::Response,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    pub fn history(&self) -> &[ResponseSnapshot] {
        self.inner.history()
    }

    pub fn is_redirect(&self) -> bool {
        self.inner.is_redirect()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.inner.encoding()
    }

    pub fn raise_for_status(&self) -> Result<()> {
        self.inner.raise_for_status()
    }

    pub fn data(&mut self) -> Result<Bytes> {
        self.runtime.block_on(self.inner.data())
    }

    pub fn text(&mut self) -> Result<String> {
        self.runtime.block_on(self.inner.text())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        self.runtime.block_on(self.inner.json())
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        // Drain so the connection can go back to the pool.
        let _ = self.runtime.block_on(self.inner.close());
    }
}
