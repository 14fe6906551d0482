//! Request authentication hooks.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;

use crate::request::Request;

/// Credential source applied to a request before it is sent. Custom
/// callables can rewrite the request arbitrarily (signing schemes, token
/// refresh and the like).
#[derive(Clone)]
pub enum Auth {
    /// RFC 7617 Basic authentication.
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    Custom(Arc<dyn Fn(&mut Request) + Send + Sync>),
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Auth {
        Auth::Basic { username: username.into(), password: password.into() }
    }

    pub fn bearer(token: impl Into<String>) -> Auth {
        Auth::Bearer(token.into())
    }

    pub fn custom(f: impl Fn(&mut Request) + Send + Sync + 'static) -> Auth {
        Auth::Custom(Arc::new(f))
    }

    /// Applies the credentials. Existing `Authorization` headers win over
    /// the built-in schemes.
    pub(crate) fn apply(&self, request: &mut Request) {
        match self {
            Auth::Basic { username, password } => {
                let raw = format!("{username}:{password}");
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
                request.headers.setdefault("Authorization", format!("Basic {encoded}"));
            }
            Auth::Bearer(token) => {
                request.headers.setdefault("Authorization", format!("Bearer {token}"));
            }
            Auth::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            Auth::Bearer(_) => f.write_str("Bearer(..)"),
            Auth::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
