//! URL model: parse, RFC 3986 join, origin extraction.

use std::fmt;

use crate::error::{Error, Result};
use crate::fields::Params;

/// `(scheme, host, effective_port)` — the unit of connection reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Default port for a scheme. Only `http` and `https` are accepted.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// A parsed absolute URL restricted to the schemes this client speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    scheme: String,
    username: String,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
    params: Params,
    fragment: Option<String>,
}

impl Url {
    pub fn parse(input: &str) -> Result<Url> {
        let parsed = url::Url::parse(input).map_err(|e| Error::Url(e.to_string()))?;
        Url::from_parsed(parsed)
    }

    fn from_parsed(parsed: url::Url) -> Result<Url> {
        let scheme = parsed.scheme().to_string();
        if default_port(&scheme).is_none() {
            return Err(Error::Url(format!("unsupported scheme '{scheme}'")));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Url("URL has no host".to_string()))?
            .to_string();

        Ok(Url {
            scheme,
            username: parsed.username().to_string(),
            password: parsed.password().map(str::to_string),
            host,
            port: parsed.port(),
            path: parsed.path().to_string(),
            params: Params::from_query_string(parsed.query().unwrap_or("")),
            fragment: parsed.fragment().map(str::to_string),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Explicit port, or the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.or_else(|| default_port(&self.scheme)).unwrap_or(0)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Userinfo credentials, if present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() && self.password.is_none() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_deref().unwrap_or("")))
        }
    }

    /// Returns a copy with userinfo stripped (after Basic auth extraction).
    pub fn without_credentials(&self) -> Url {
        let mut url = self.clone();
        url.username = String::new();
        url.password = None;
        url
    }

    pub fn origin(&self) -> Origin {
        Origin {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.effective_port(),
        }
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// RFC 3986 reference resolution against this URL.
    pub fn join(&self, reference: &str) -> Result<Url> {
        let base = url::Url::parse(&self.to_string()).map_err(|e| Error::Url(e.to_string()))?;
        let joined = base.join(reference).map_err(|e| Error::Url(e.to_string()))?;
        Url::from_parsed(joined)
    }

    /// `Host` header value: host, plus the port only when non-default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if Some(port) != default_port(&self.scheme) => {
                format!("{}:{port}", self.host)
            }
            _ => self.host.clone(),
        }
    }

    /// Origin-form request target: `path[?query]`.
    pub fn request_target(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
        if self.params.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{}", self.params.to_query_string())
        }
    }

    /// Absolute-form request target, used when forwarding through a proxy.
    pub fn absolute_target(&self) -> String {
        let mut target = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            if Some(port) != default_port(&self.scheme) {
                target.push_str(&format!(":{port}"));
            }
        }
        target.push_str(&self.request_target());
        target
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some((user, pass)) = self.credentials() {
            write!(f, "{user}")?;
            if !pass.is_empty() {
                write!(f, ":{pass}")?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            if Some(port) != default_port(&self.scheme) {
                write!(f, ":{port}")?;
            }
        }
        f.write_str(if self.path.is_empty() { "/" } else { &self.path })?;
        if !self.params.is_empty() {
            write!(f, "?{}", self.params.to_query_string())?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Url> {
        Url::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Param;

    #[test]
    fn parses_components() {
        let url = Url::parse("https://user:pw@example.com:8443/a/b?x=1&flag#frag").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.effective_port(), 8443);
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.params().get_one("flag"), Some(&Param::NoValue));
        assert_eq!(url.fragment(), Some("frag"));
        assert_eq!(url.credentials(), Some(("user", "pw")));
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(Url::parse("ftp://example.com/").is_err());
        assert!(Url::parse("file:///etc/passwd").is_err());
    }

    #[test]
    fn effective_port_defaults_by_scheme() {
        assert_eq!(Url::parse("http://h/").unwrap().effective_port(), 80);
        assert_eq!(Url::parse("https://h/").unwrap().effective_port(), 443);
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(Url::parse("http://h:80/").unwrap().host_header(), "h");
        assert_eq!(Url::parse("http://h:8080/").unwrap().host_header(), "h:8080");
        assert_eq!(Url::parse("https://h/").unwrap().host_header(), "h");
    }

    #[test]
    fn join_resolves_relative_references() {
        let base = Url::parse("http://example.com/a/b/c?q=1").unwrap();
        assert_eq!(base.join("d").unwrap().to_string(), "http://example.com/a/b/d");
        assert_eq!(base.join("/root").unwrap().to_string(), "http://example.com/root");
        assert_eq!(base.join("//other.com/x").unwrap().to_string(), "http://other.com/x");
        assert_eq!(base.join("https://o/x").unwrap().to_string(), "https://o/x");
        assert_eq!(base.join("../up").unwrap().to_string(), "http://example.com/a/up");
    }

    #[test]
    fn request_target_includes_query() {
        let url = Url::parse("http://h/p?a=1&b").unwrap();
        assert_eq!(url.request_target(), "/p?a=1&b");
        assert_eq!(Url::parse("http://h").unwrap().request_target(), "/");
    }

    #[test]
    fn origin_equality() {
        let a = Url::parse("http://h/x").unwrap().origin();
        let b = Url::parse("http://h:80/y").unwrap().origin();
        let c = Url::parse("https://h/x").unwrap().origin();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn credentials_strip() {
        let url = Url::parse("http://u:p@h/").unwrap();
        let bare = url.without_credentials();
        assert_eq!(bare.credentials(), None);
        assert_eq!(bare.to_string(), "http://h/");
    }
}
