//! Policy-checked in-memory cookie jar.
//!
//! Storage is keyed by `(domain, path, name)`. The acceptance policy
//! rejects `Secure` cookies from plaintext contexts, enforces the
//! `__Secure-` and `__Host-` name prefixes, and refuses `Domain`
//! attributes that name a public suffix (approximated as a label with no
//! interior dot) so one service cannot plant super-cookies across a whole
//! TLD.

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::fields::Headers;
use crate::url::Url;

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    /// Set when no `Domain` attribute was present: only the exact host
    /// matches, not subdomains.
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<SystemTime>,
}

impl StoredCookie {
    fn key(&self) -> (&str, &str, &str) {
        (&self.domain, &self.path, &self.name)
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn domain_matches(&self, host: &str) -> bool {
        if self.host_only {
            return self.domain.eq_ignore_ascii_case(host);
        }
        let host = host.to_ascii_lowercase();
        let domain = self.domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    }

    fn path_matches(&self, request_path: &str) -> bool {
        if self.path == request_path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }
}

/// The session cookie jar. Nothing is persisted to disk.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar::default()
    }

    /// Manually inserts a cookie, bypassing the response policy (there is
    /// no response context to check against).
    pub fn set(&mut self, name: &str, value: &str, domain: &str, path: &str) {
        let cookie = StoredCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.trim_start_matches('.').to_string(),
            host_only: false,
            path: path.to_string(),
            secure: false,
            expires: None,
        };
        self.upsert(cookie);
    }

    pub fn get(&self, name: &str, domain: Option<&str>, path: Option<&str>) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| {
                c.name == name
                    && domain.is_none_or(|d| c.domain.eq_ignore_ascii_case(d))
                    && path.is_none_or(|p| c.path == p)
            })
            .map(|c| c.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|c| (c.name.as_str(), c.value.as_str()))
    }

    /// Extracts every `Set-Cookie` in the response headers into the jar,
    /// applying the acceptance policy against the request URL. The whole
    /// extraction is atomic with respect to the jar lock held by the
    /// caller.
    pub fn extract_from_response(&mut self, request_url: &Url, response_headers: &Headers) {
        let now = SystemTime::now();
        for raw in response_headers.get_all("set-cookie") {
            match self.accept(raw, request_url, now) {
                Some(cookie) => self.upsert(cookie),
                None => debug!(host = request_url.host(), "rejected cookie by policy"),
            }
        }
    }

    fn accept(&self, raw: &str, request_url: &Url, now: SystemTime) -> Option<StoredCookie> {
        let parsed = cookie::Cookie::parse(raw).ok()?;
        let name = parsed.name().to_string();
        let secure = parsed.secure().unwrap_or(false);
        let domain_attr = parsed.domain().map(|d| d.trim_start_matches('.').to_string());
        let path_attr = parsed.path().map(str::to_string);

        // Secure cookie arriving over plaintext: wait for a secure context.
        if secure && !request_url.is_https() {
            return None;
        }
        if name.starts_with("__Secure-") && !secure {
            return None;
        }
        if name.starts_with("__Host-")
            && (!secure || domain_attr.is_some() || path_attr.as_deref() != Some("/"))
        {
            return None;
        }

        let host = request_url.host().to_ascii_lowercase();
        let (domain, host_only) = match &domain_attr {
            Some(domain) => {
                let domain = domain.to_ascii_lowercase();
                // A Domain that is a bare public suffix would blanket every
                // site under it.
                if is_public_suffix(&domain) && domain != host {
                    return None;
                }
                // The request host must live under the declared domain.
                if host != domain && !host.ends_with(&format!(".{domain}")) {
                    return None;
                }
                (domain, false)
            }
            None => (host.clone(), true),
        };

        let path = match path_attr {
            Some(path) if path.starts_with('/') => path,
            _ => default_path(request_url.path()),
        };

        let expires = match parsed.max_age() {
            Some(max_age) => {
                let secs = max_age.whole_seconds().max(0) as u64;
                Some(now + Duration::from_secs(secs))
            }
            None => match parsed.expires() {
                Some(cookie::Expiration::DateTime(at)) => Some(SystemTime::from(at)),
                _ => None,
            },
        };

        Some(StoredCookie {
            name,
            value: parsed.value().to_string(),
            domain,
            host_only,
            path,
            secure,
            expires,
        })
    }

    fn upsert(&mut self, cookie: StoredCookie) {
        let now = SystemTime::now();
        if let Some(existing) = self.cookies.iter_mut().find(|c| c.key() == cookie.key()) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
        // Expired replacements act as deletions.
        self.cookies.retain(|c| !c.is_expired(now));
    }

    /// The `Cookie` header value for a request to `url`, or `None` when no
    /// stored cookie applies. Longer paths sort first, per RFC 6265.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let now = SystemTime::now();
        let host = url.host();
        let path = url.path();
        let mut matched: Vec<&StoredCookie> = self
            .cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| !c.secure || url.is_https())
            .filter(|c| c.domain_matches(host))
            .filter(|c| c.path_matches(if path.is_empty() { "/" } else { path }))
            .collect();
        if matched.is_empty() {
            return None;
        }
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matched
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// RFC 6265 default-path: the request path up to (not including) its last
/// slash, or `/`.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

/// Public-suffix approximation: a registrable domain always has an
/// interior dot (`example.com`), a bare suffix (`com`) does not.
fn is_public_suffix(domain: &str) -> bool {
    !domain.trim_matches('.').contains('.')
}
