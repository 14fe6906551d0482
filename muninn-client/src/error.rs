use std::sync::Arc;

use thiserror::Error;

use crate::request::Request;
use crate::response::ResponseSnapshot;

/// Errors that can occur while driving an HTTP request lifecycle.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The client produced bytes that violate the HTTP grammar.
    #[error("local protocol error: {0}")]
    LocalProtocol(String),

    /// The remote peer violated the HTTP grammar.
    #[error("remote protocol error: {0}")]
    RemoteProtocol(String),

    #[error("connect to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout { host: String, port: u16, timeout: std::time::Duration },

    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error("request exceeded total timeout of {0:?}")]
    TotalTimeout(std::time::Duration),

    #[error("could not resolve hostname '{host}:{port}'")]
    NameResolution { host: String, port: u16 },

    #[error("TLS error: {0}")]
    Tls(String),

    /// No TLS version shared between the configured min/max range and the
    /// versions this client can speak.
    #[error("no supported TLS version between {min} and {max}")]
    TlsVersionNotSupported { min: crate::tls::TlsVersion, max: crate::tls::TlsVersion },

    #[error("certificate verification failed: {0}")]
    Certificate(CertificateKind),

    #[error("fingerprint {presented} did not match pin {pinned}")]
    CertificateFingerprintMismatch { pinned: String, presented: String },

    #[error("redirect loop detected: {}", trail.join(" -> "))]
    RedirectLoopDetected { trail: Vec<String> },

    #[error("exceeded maximum number of redirects ({0})")]
    TooManyRedirects(u32),

    #[error("retries exhausted ({0})")]
    TooManyRetries(String),

    /// A retry needs to replay the request body but the body is one-shot.
    #[error("request body cannot be rewound for retry")]
    UnrewindableBody,

    /// Non-idempotent method failed in a way where the server may have
    /// already acted on the request.
    #[error("cannot retry non-idempotent {method} request: {reason}")]
    CannotRetryUnsafeRequest { method: String, reason: String },

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("response body was already consumed")]
    BodyConsumed,

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// HTTP status >= 400, raised by `Response::raise_for_status`.
    #[error("request failed with status {0}")]
    Status(u16),

    /// Carrier that attaches the in-flight request (and response, once one
    /// exists) to any error leaving the session loop.
    #[error("{source}")]
    WithContext {
        #[source]
        source: Box<Error>,
        request: Option<Box<Request>>,
        response: Option<Box<ResponseSnapshot>>,
    },
}

/// Why certificate verification failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateKind {
    HostnameMismatch,
    SelfSigned,
    Expired,
    Other(String),
}

impl std::fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateKind::HostnameMismatch => f.write_str("hostname mismatch"),
            CertificateKind::SelfSigned => f.write_str("self-signed certificate"),
            CertificateKind::Expired => f.write_str("certificate expired"),
            CertificateKind::Other(msg) => f.write_str(msg),
        }
    }
}

impl Error {
    /// Wraps an error with the request that was in flight. If the error is
    /// already carrying context only the missing pieces are filled in.
    pub(crate) fn with_request(self, request: &Request) -> Error {
        match self {
            Error::WithContext { source, request: req, response } => Error::WithContext {
                source,
                request: req.or_else(|| Some(Box::new(request.clone_metadata()))),
                response,
            },
            other => Error::WithContext {
                source: Box::new(other),
                request: Some(Box::new(request.clone_metadata())),
                response: None,
            },
        }
    }

    pub(crate) fn with_response(self, snapshot: ResponseSnapshot) -> Error {
        match self {
            Error::WithContext { source, request, response } => Error::WithContext {
                source,
                request,
                response: response.or_else(|| Some(Box::new(snapshot))),
            },
            other => Error::WithContext {
                source: Box::new(other),
                request: None,
                response: Some(Box::new(snapshot)),
            },
        }
    }

    /// The innermost error kind, looking through context wrappers.
    pub fn kind(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.kind(),
            other => other,
        }
    }

    /// The request attached by the session loop, if any.
    pub fn request(&self) -> Option<&Request> {
        match self {
            Error::WithContext { request, .. } => request.as_deref(),
            _ => None,
        }
    }

    /// The response attached by the session loop, if any.
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match self {
            Error::WithContext { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Whether the failure provably happened before the server could have
    /// read the request. Used by the retry policy for non-idempotent methods.
    pub(crate) fn is_pre_request(&self) -> bool {
        matches!(
            self.kind(),
            Error::ConnectTimeout { .. }
                | Error::NameResolution { .. }
                | Error::Tls(_)
                | Error::TlsVersionNotSupported { .. }
                | Error::Certificate(_)
                | Error::CertificateFingerprintMismatch { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
