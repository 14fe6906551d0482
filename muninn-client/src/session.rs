//! Session orchestrator: request preparation, framing, auth, cookies, the
//! redirect graph traversal with loop detection, and retry with backoff.

use std::sync::Arc;
use std::time::Duration;

use http::{Method, Version};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::Auth;
use crate::cookies::CookieJar;
use crate::decoders::accept_encoding;
use crate::error::{Error, Result};
use crate::fields::{Param, Params};
use crate::pool::{ConnectionConfig, ConnectionManager};
use crate::request::{is_idempotent, Body, Request};
use crate::response::{Response, ResponseSnapshot};
use crate::retry::{Retry, RetryCategory};
use crate::tls::{CaCerts, PinSet, TlsVersion};
use crate::transport::SocketOptions;
use crate::fields::Headers;
use crate::url::{Origin, Url};

const USER_AGENT: &str = concat!("muninn-client/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MAX_REDIRECTS: u32 = 30;

/// Connect / read-idle / total budgets. Total is enforced around the whole
/// lifecycle loop, the others per operation.
#[derive(Debug, Clone)]
pub struct Timeout {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub total: Option<Duration>,
}

impl Default for Timeout {
    fn default() -> Self {
        Timeout {
            connect: Some(Duration::from_secs(30)),
            read: Some(Duration::from_secs(30)),
            total: None,
        }
    }
}

impl Timeout {
    pub fn total(limit: Duration) -> Timeout {
        Timeout { total: Some(limit), ..Timeout::default() }
    }
}

/// Redirect following policy (`bool | int` in spirit: disabled, or a cap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    Follow(u32),
    Disabled,
}

impl From<bool> for Redirects {
    fn from(follow: bool) -> Self {
        if follow {
            Redirects::Follow(DEFAULT_MAX_REDIRECTS)
        } else {
            Redirects::Disabled
        }
    }
}

impl From<u32> for Redirects {
    fn from(max: u32) -> Self {
        Redirects::Follow(max)
    }
}

/// Scheme → proxy URL mapping. Only plain-`http` forwarding (absolute-form
/// target) is supported; HTTPS origins through a proxy would need CONNECT
/// tunneling.
#[derive(Debug, Clone, Default)]
pub struct Proxies {
    entries: Vec<(String, Url)>,
    no_proxy: Vec<String>,
}

impl Proxies {
    pub fn new() -> Proxies {
        Proxies::default()
    }

    pub fn insert(&mut self, scheme: impl Into<String>, proxy: Url) {
        self.entries.push((scheme.into(), proxy));
    }

    pub fn no_proxy(&mut self, host: impl Into<String>) {
        self.no_proxy.push(host.into());
    }

    /// Builds the mapping from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
    pub fn from_env() -> Proxies {
        let mut proxies = Proxies::new();
        for (scheme, names) in
            [("http", ["HTTP_PROXY", "http_proxy"]), ("https", ["HTTPS_PROXY", "https_proxy"])]
        {
            for name in names {
                if let Ok(value) = std::env::var(name) {
                    if let Ok(url) = Url::parse(&value) {
                        proxies.insert(scheme, url);
                        break;
                    }
                }
            }
        }
        for name in ["NO_PROXY", "no_proxy"] {
            if let Ok(value) = std::env::var(name) {
                for entry in value.split(',') {
                    let entry = entry.trim();
                    if !entry.is_empty() {
                        proxies.no_proxy.push(entry.to_string());
                    }
                }
                break;
            }
        }
        proxies
    }

    fn lookup(&self, url: &Url) -> Option<&Url> {
        let host = url.host();
        for entry in &self.no_proxy {
            if entry == "*" || host == entry || host.ends_with(&format!(".{entry}")) {
                return None;
            }
        }
        self.entries.iter().find(|(scheme, _)| scheme == url.scheme()).map(|(_, proxy)| proxy)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Configures and builds a [`Session`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    headers: Headers,
    auth: Option<Auth>,
    retries: Option<Retry>,
    redirects: Option<Redirects>,
    timeout: Option<Timeout>,
    proxies: Option<Proxies>,
    trust_env: Option<bool>,
    ca_certs: Option<CaCerts>,
    pinned_certs: PinSet,
    tls_min_version: Option<TlsVersion>,
    tls_max_version: Option<TlsVersion>,
    http_versions: Option<Vec<Version>>,
    socket_options: Option<SocketOptions>,
    cookies: Option<CookieJar>,
}

impl SessionBuilder {
    /// Seeds the session with an existing cookie jar.
    pub fn cookies(mut self, jar: CookieJar) -> Self {
        self.cookies = Some(jar);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn redirects(mut self, redirects: impl Into<Redirects>) -> Self {
        self.redirects = Some(redirects.into());
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// Whether to honor `HTTP_PROXY`-style environment variables when no
    /// explicit proxy map is set. Defaults to true.
    pub fn trust_env(mut self, trust: bool) -> Self {
        self.trust_env = Some(trust);
        self
    }

    pub fn ca_certs(mut self, ca_certs: CaCerts) -> Self {
        self.ca_certs = Some(ca_certs);
        self
    }

    pub fn pin(mut self, pin: crate::tls::PinnedCert) -> Self {
        self.pinned_certs.add(pin);
        self
    }

    pub fn tls_min_version(mut self, version: TlsVersion) -> Self {
        self.tls_min_version = Some(version);
        self
    }

    pub fn tls_max_version(mut self, version: TlsVersion) -> Self {
        self.tls_max_version = Some(version);
        self
    }

    pub fn http_versions(mut self, versions: impl Into<Vec<Version>>) -> Self {
        self.http_versions = Some(versions.into());
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = Some(options);
        self
    }

    pub fn build(self) -> Session {
        Session {
            headers: self.headers,
            auth: self.auth,
            retries: self.retries,
            redirects: self.redirects.unwrap_or(Redirects::Follow(DEFAULT_MAX_REDIRECTS)),
            timeout: self.timeout.unwrap_or_default(),
            proxies: self.proxies,
            trust_env: self.trust_env.unwrap_or(true),
            ca_certs: self.ca_certs.unwrap_or_default(),
            pinned_certs: self.pinned_certs,
            tls_min_version: self.tls_min_version.unwrap_or(TlsVersion::V1_2),
            tls_max_version: self.tls_max_version.unwrap_or(TlsVersion::MaximumSupported),
            http_versions: self.http_versions.unwrap_or_else(|| vec![Version::HTTP_11]),
            socket_options: self.socket_options.unwrap_or_default(),
            cookies: Arc::new(Mutex::new(self.cookies.unwrap_or_default())),
            manager: Arc::new(ConnectionManager::new()),
        }
    }
}

/// The central instance driving HTTP lifecycles over pooled connections.
pub struct Session {
    headers: Headers,
    auth: Option<Auth>,
    retries: Option<Retry>,
    redirects: Redirects,
    timeout: Timeout,
    proxies: Option<Proxies>,
    trust_env: bool,
    ca_certs: CaCerts,
    pinned_certs: PinSet,
    tls_min_version: TlsVersion,
    tls_max_version: TlsVersion,
    http_versions: Vec<Version>,
    socket_options: SocketOptions,
    cookies: Arc<Mutex<CookieJar>>,
    manager: Arc<ConnectionManager>,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    pub fn new() -> Session {
        Session::builder().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// The session cookie jar, shared with in-flight requests.
    pub fn cookies(&self) -> Arc<Mutex<CookieJar>> {
        self.cookies.clone()
    }

    /// Drops all idle pooled connections.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder {
            session: self,
            method,
            url: url.into(),
            headers: Vec::new(),
            params: Params::new(),
            cookies: Vec::new(),
            auth: None,
            body: Ok(Body::empty()),
            retries: None,
            redirects: None,
            timeout: None,
            proxies: None,
            server_hostname: None,
            http_versions: None,
        }
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

    pub fn options(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::OPTIONS, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, url)
    }

    async fn execute(&self, parts: RequestParts) -> Result<Response> {
        let timeout = parts.timeout.clone().unwrap_or_else(|| self.timeout.clone());
        match timeout.total {
            Some(limit) => tokio::time::timeout(limit, self.run_lifecycle(parts, &timeout))
                .await
                .map_err(|_| Error::TotalTimeout(limit))?,
            None => self.run_lifecycle(parts, &timeout).await,
        }
    }

    async fn run_lifecycle(&self, mut parts: RequestParts, timeout: &Timeout) -> Result<Response> {
        let mut body = std::mem::replace(&mut parts.body, Ok(Body::empty()))?;
        let mut url = Url::parse(&parts.url)?;
        for (key, value) in parts.params.items() {
            url.params_mut().add(key, value.clone());
        }

        // Userinfo becomes Basic auth unless explicit credentials exist,
        // and is always stripped from the URL that goes on the wire.
        let mut auth = parts.auth.clone().or_else(|| self.auth.clone());
        if auth.is_none() {
            if let Some((username, password)) = url.credentials() {
                auth = Some(Auth::basic(username, password));
            }
        }
        let url = url.without_credentials();

        let mut headers = self.headers.clone();
        for (name, value) in &parts.headers {
            match value {
                Some(value) => headers.set(name.clone(), value.clone()),
                // A request-level removal deletes the inherited header.
                None => {
                    headers.pop_all(name);
                }
            }
        }

        let mut request = Request::new(parts.method.clone(), url);
        request.headers = headers;
        request.headers.set("Host", request.url.host_header());
        if let Some(auth) = &auth {
            auth.apply(&mut request);
        }
        request.headers.setdefault("Accept", "*/*");
        request.headers.setdefault("User-Agent", USER_AGENT);
        request.headers.setdefault("Accept-Encoding", accept_encoding());
        request.headers.setdefault("Connection", "keep-alive");

        if !parts.cookies.is_empty() {
            let mut jar = self.cookies.lock().await;
            for (name, value) in &parts.cookies {
                jar.set(name, value, request.url.host(), "/");
            }
        }

        frame_request(&mut request, &body);

        let redirects = parts.redirects.unwrap_or(self.redirects);
        let mut redirects_remaining = match redirects {
            Redirects::Follow(max) => Some(max),
            Redirects::Disabled => None,
        };
        let mut retry =
            parts.retries.clone().or_else(|| self.retries.clone()).unwrap_or_default();
        let mut visited: Vec<String> = vec![request.url.to_string()];
        let mut response_history: Vec<ResponseSnapshot> = Vec::new();

        loop {
            // The Cookie header is recomputed per hop from the jar.
            request.headers.pop_all("Cookie");
            let cookie_header = self.cookies.lock().await.cookie_header(&request.url);
            if let Some(cookie) = cookie_header {
                request.headers.set("Cookie", cookie);
            }

            let mut response = match self.attempt(&request, &body, &parts, timeout).await {
                Ok(response) => response,
                Err(err) => {
                    let delay = match self.plan_error_retry(&mut retry, &request, err) {
                        Ok(delay) => delay,
                        Err(fatal) => return Err(fatal.with_request(&request)),
                    };
                    debug!(method = %request.method, delay = ?delay, "retrying after error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            self.cookies
                .lock()
                .await
                .extract_from_response(&request.url, response.headers());

            // Informational (1XX) responses roll up into the session-level
            // history; the response's own list is cleared in the process.
            response_history.append(response.history_mut());

            if redirects != Redirects::Disabled && response.is_redirect() {
                if redirects_remaining == Some(0) {
                    let max = match redirects {
                        Redirects::Follow(max) => max,
                        Redirects::Disabled => 0,
                    };
                    let mut snapshot = response.snapshot();
                    snapshot.history = response_history.clone();
                    return Err(Error::TooManyRedirects(max)
                        .with_request(&request)
                        .with_response(snapshot));
                }
                if let Some(remaining) = redirects_remaining.as_mut() {
                    *remaining -= 1;
                }

                let mut snapshot = response.snapshot();
                snapshot.request = Some(request.clone_metadata());
                let status = response.status().as_u16();
                let location = response
                    .headers()
                    .get_one("location")
                    .expect("is_redirect implies Location")
                    .to_string();
                if let Err(err) = response.close().await {
                    return Err(err.with_request(&request));
                }
                response_history.push(snapshot);

                let next_url = match request.url.join(&location) {
                    Ok(next) => next,
                    Err(err) => return Err(err.with_request(&request)),
                };
                let next = build_redirect_request(&request, next_url, status, &mut body);
                let next_str = next.url.to_string();
                if visited.contains(&next_str) {
                    let mut trail = visited.clone();
                    trail.push(next_str);
                    return Err(Error::RedirectLoopDetected { trail }.with_request(&request));
                }
                debug!(from = %request.url, to = %next_str, status, "following redirect");
                visited.push(next_str);
                retry.reset_backoff_counter();
                request = next;
                continue;
            }

            // Forced status retries (Retry-After aware).
            let status = response.status().as_u16();
            if retry.status_is_retryable(status) {
                let delay = retry.delay_before_next_request(Some(response.headers()));
                match retry.increment(RetryCategory::Response, &format!("status {status}")) {
                    Ok(()) => {
                        debug!(status, delay = ?delay, "retrying on response status");
                        if let Err(err) = response.close().await {
                            return Err(err.with_request(&request));
                        }
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(_) => {
                        // Budget spent: surface the response we have.
                        warn!(status, "retry budget exhausted, returning response");
                    }
                }
            }

            *response.history_mut() = response_history;
            return Ok(response);
        }
    }

    async fn attempt(
        &self,
        request: &Request,
        body: &Body,
        parts: &RequestParts,
        timeout: &Timeout,
    ) -> Result<Response> {
        let chunks = body.start_chunks()?;
        let (config, target_override) = self.connection_config(&request.url, parts, timeout)?;
        let transaction = self.manager.start_transaction(&config).await?;
        let mut wire_request = request.clone_metadata();
        if let Some(target) = target_override {
            wire_request.set_target(target);
        }
        transaction.send_request(wire_request, chunks).await
    }

    fn connection_config(
        &self,
        url: &Url,
        parts: &RequestParts,
        timeout: &Timeout,
    ) -> Result<(ConnectionConfig, Option<String>)> {
        let (origin, target_override) = match self.proxy_for(url, parts)? {
            Some(proxy) => (proxy.origin(), Some(url.absolute_target())),
            None => (url.origin(), None),
        };
        let config = ConnectionConfig {
            origin,
            server_hostname: parts.server_hostname.clone(),
            http_versions: parts
                .http_versions
                .clone()
                .unwrap_or_else(|| self.http_versions.clone()),
            ca_certs: self.ca_certs.clone(),
            pinned_cert: self.pinned_certs.lookup(url.host()).cloned(),
            tls_min_version: self.tls_min_version,
            tls_max_version: self.tls_max_version,
            connect_timeout: timeout.connect.unwrap_or(Duration::from_secs(30)),
            read_timeout: timeout.read,
            source_address: None,
            socket_options: self.socket_options.clone(),
        };
        Ok((config, target_override))
    }

    fn proxy_for(&self, url: &Url, parts: &RequestParts) -> Result<Option<Url>> {
        let env_proxies;
        let proxies = match (&parts.proxies, &self.proxies) {
            (Some(proxies), _) => proxies,
            (None, Some(proxies)) => proxies,
            (None, None) if self.trust_env => {
                env_proxies = Proxies::from_env();
                &env_proxies
            }
            (None, None) => return Ok(None),
        };
        if proxies.is_empty() {
            return Ok(None);
        }
        let Some(proxy) = proxies.lookup(url) else {
            return Ok(None);
        };
        if url.is_https() {
            return Err(Error::Config(
                "proxying https origins requires CONNECT tunneling, which is not supported"
                    .to_string(),
            ));
        }
        Ok(Some(proxy.clone()))
    }

    /// Decides whether a failed attempt is retried: classifies the error
    /// into a category, enforces idempotency rules, and charges the
    /// budget. Returns the pre-attempt delay or the fatal error.
    fn plan_error_retry(
        &self,
        retry: &mut Retry,
        request: &Request,
        err: Error,
    ) -> std::result::Result<Duration, Error> {
        let category = match err.kind() {
            Error::ConnectTimeout { .. } | Error::NameResolution { .. } | Error::Connection(_) => {
                RetryCategory::Connect
            }
            Error::ReadTimeout(_) | Error::RemoteProtocol(_) | Error::Io(_) => RetryCategory::Read,
            _ => return Err(err),
        };
        if !is_idempotent(&request.method)
            && !retry.method_is_retryable(&request.method)
            && !err.is_pre_request()
        {
            return Err(Error::CannotRetryUnsafeRequest {
                method: request.method.to_string(),
                reason: err.to_string(),
            });
        }
        retry.increment(category, &err.to_string())?;
        Ok(retry.delay_before_next_request(None))
    }
}

fn frame_request(request: &mut Request, body: &Body) {
    let framed = request.headers.contains("transfer-encoding")
        || request.headers.contains("content-length");
    if !framed {
        match body.content_length() {
            Some(0) if body.is_empty_source() => {
                // Bodyless methods skip the header entirely.
                if [Method::POST, Method::PUT, Method::PATCH].contains(&request.method) {
                    request.headers.set("Content-Length", "0");
                }
            }
            Some(length) => request.headers.set("Content-Length", length.to_string()),
            None => request.headers.set("Transfer-Encoding", "chunked"),
        }
    }
    if !request.headers.contains("content-type") {
        if let Some(content_type) = body.content_type() {
            request.headers.set("Content-Type", content_type);
        }
    }
}

/// Builds the next request of a redirect chain per the rewrite rules:
/// 301/302/303 turn POST into GET (dropping the body), `Host` and `Cookie`
/// are recomputed, and `Authorization` survives only same-origin hops or a
/// clean http→https upgrade of the same host.
fn build_redirect_request(
    current: &Request,
    next_url: Url,
    status: u16,
    body: &mut Body,
) -> Request {
    let mut method = current.method.clone();
    let mut headers = current.headers.clone();

    if matches!(status, 301 | 302 | 303) && method == Method::POST {
        method = Method::GET;
        *body = Body::empty();
        headers.pop_all("Content-Length");
        headers.pop_all("Transfer-Encoding");
        headers.pop_all("Content-Type");
    }

    headers.pop_all("Host");
    headers.pop_all("Cookie");

    let old_origin = current.url.origin();
    let new_origin = next_url.origin();
    if old_origin != new_origin && !is_https_upgrade(&old_origin, &new_origin) {
        headers.pop_all("Authorization");
    }

    let mut next = Request::new(method, next_url);
    headers.set("Host", next.url.host_header());
    next.headers = headers;
    next
}

fn is_https_upgrade(old: &Origin, new: &Origin) -> bool {
    old.scheme == "http"
        && new.scheme == "https"
        && old.host == new.host
        && (old.port == new.port || (old.port == 80 && new.port == 443))
}

struct RequestParts {
    method: Method,
    url: String,
    headers: Vec<(String, Option<String>)>,
    params: Params,
    cookies: Vec<(String, String)>,
    auth: Option<Auth>,
    body: Result<Body>,
    retries: Option<Retry>,
    redirects: Option<Redirects>,
    timeout: Option<Timeout>,
    proxies: Option<Proxies>,
    server_hostname: Option<String>,
    http_versions: Option<Vec<Version>>,
}

/// Per-request options, collected builder-style and dispatched by
/// [`RequestBuilder::send`]. Request-level settings override the session's.
pub struct RequestBuilder<'a> {
    session: &'a Session,
    method: Method,
    url: String,
    headers: Vec<(String, Option<String>)>,
    params: Params,
    cookies: Vec<(String, String)>,
    auth: Option<Auth>,
    body: Result<Body>,
    retries: Option<Retry>,
    redirects: Option<Redirects>,
    timeout: Option<Timeout>,
    proxies: Option<Proxies>,
    server_hostname: Option<String>,
    http_versions: Option<Vec<Version>>,
}

impl<'a> RequestBuilder<'a> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), Some(value.into())));
        self
    }

    /// Deletes a header inherited from the session defaults.
    pub fn no_header(mut self, name: impl Into<String>) -> Self {
        self.headers.push((name.into(), None));
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.add(key, value);
        self
    }

    /// Adds a bare `?key` parameter with no `=`.
    pub fn param_no_value(mut self, key: impl Into<String>) -> Self {
        self.params.add_no_value(key);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.body = Body::json(value);
        self
    }

    pub fn form<K: AsRef<str>, V: AsRef<str>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = Ok(Body::form(pairs));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Ok(body);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn redirects(mut self, redirects: impl Into<Redirects>) -> Self {
        self.redirects = Some(redirects.into());
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// SNI / certificate-verification hostname override.
    pub fn server_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.server_hostname = Some(hostname.into());
        self
    }

    pub fn http_versions(mut self, versions: impl Into<Vec<Version>>) -> Self {
        self.http_versions = Some(versions.into());
        self
    }

    /// Runs the full request lifecycle and returns the final response.
    pub async fn send(self) -> Result<Response> {
        let RequestBuilder {
            session,
            method,
            url,
            headers,
            params,
            cookies,
            auth,
            body,
            retries,
            redirects,
            timeout,
            proxies,
            server_hostname,
            http_versions,
        } = self;
        session
            .execute(RequestParts {
                method,
                url,
                headers,
                params,
                cookies,
                auth,
                body,
                retries,
                redirects,
                timeout,
                proxies,
                server_hostname,
                http_versions,
            })
            .await
    }
}
