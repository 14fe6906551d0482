#![forbid(unsafe_code)]
//! muninn-client: an HTTP/1.1 client library.
//!
//! The pieces, bottom up: a sans-I/O protocol engine ([`h1`]), a socket
//! layer with a combined send/receive pump ([`transport`]), a connection
//! manager pooling sockets by security posture ([`pool`]), a transaction
//! that multiplexes request upload with response download
//! ([`transaction`]), and a session orchestrator handling preparation,
//! cookies, redirects and retries ([`session`]). Response bodies stream
//! through a decoding pipeline ([`response`], [`decoders`]) with charset
//! auto-detection.
//!
//! ```no_run
//! # async fn run() -> muninn_client::Result<()> {
//! let session = muninn_client::Session::new();
//! let mut response = session
//!     .get("http://example.com/search")
//!     .param("q", "ravens")
//!     .send()
//!     .await?;
//! println!("{} {}", response.status(), response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod blocking;
pub mod cookies;
pub mod decoders;
pub mod error;
pub mod fields;
pub mod h1;
pub mod pool;
pub mod request;
pub mod response;
pub mod retry;
pub mod session;
pub mod tls;
pub mod transaction;
pub mod transport;
pub mod url;

pub use auth::Auth;
pub use cookies::CookieJar;
pub use error::{Error, Result};
pub use fields::{Headers, Param, Params};
pub use request::{Body, MultipartForm, Request};
pub use response::{Response, ResponseSnapshot};
pub use retry::Retry;
pub use session::{Proxies, Redirects, RequestBuilder, Session, SessionBuilder, Timeout};
pub use tls::{CaCerts, PinSet, PinnedCert, TlsVersion};
pub use url::{Origin, Url};

// The HTTP core types are the `http` crate's.
pub use http::{Method, StatusCode, Version};

/// One-shot request on a throwaway session.
pub async fn request(method: Method, url: &str) -> Result<Response> {
    Session::new().request(method, url).send().await
}

/// One-shot GET on a throwaway session.
pub async fn get(url: &str) -> Result<Response> {
    Session::new().get(url).send().await
}
