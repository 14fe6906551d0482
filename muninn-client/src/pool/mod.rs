//! Connection manager: keyed socket pool, liveness probing and new
//! connection construction (TCP connect, TLS handshake, pin verification).
//!
//! A [`ConnectionConfig`] describes what a request will accept (version
//! sets, TLS ranges); a [`ConnectionKey`] records what a live socket
//! actually negotiated. A config matches a key when the exact fields are
//! equal and the negotiated values fall inside the config's ranges.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use http::Version;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::h1::H1Connection;
use crate::tls::{build_client_config, verify_pinned_certificate, CaCerts, PinnedCert, TlsVersion};
use crate::transaction::Http11Transaction;
use crate::transport::{Socket, SocketOptions};
use crate::url::Origin;

/// Identity of a pooled socket: resolved, negotiated values only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub origin: Origin,
    pub server_hostname: String,
    pub http_version: Version,
    pub ca_certs: CaCerts,
    pub pinned_cert: Option<PinnedCert>,
    pub tls_version: Option<TlsVersion>,
}

/// Pool lookup request: like a key but with ranges where negotiation has
/// not happened yet.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub origin: Origin,
    /// SNI / certificate hostname override; defaults to the origin host.
    pub server_hostname: Option<String>,
    pub http_versions: Vec<Version>,
    pub ca_certs: CaCerts,
    pub pinned_cert: Option<PinnedCert>,
    pub tls_min_version: TlsVersion,
    pub tls_max_version: TlsVersion,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub source_address: Option<SocketAddr>,
    pub socket_options: SocketOptions,
}

impl ConnectionConfig {
    pub fn effective_server_hostname(&self) -> &str {
        self.server_hostname.as_deref().unwrap_or(&self.origin.host)
    }

    /// Whether a pooled socket under `key` satisfies this config.
    pub fn matches(&self, key: &ConnectionKey) -> bool {
        self.origin == key.origin
            && self.effective_server_hostname() == key.server_hostname
            && self.ca_certs == key.ca_certs
            && self.pinned_cert == key.pinned_cert
            && self.http_versions.contains(&key.http_version)
            && key
                .tls_version
                .is_none_or(|v| v.in_range(self.tls_min_version, self.tls_max_version))
    }
}

/// Owns idle sockets between transactions. One idle socket per key; a
/// returning socket displaces (and thereby closes) any previous occupant.
pub struct ConnectionManager {
    pool: Mutex<AHashMap<ConnectionKey, Socket>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> ConnectionManager {
        ConnectionManager { pool: Mutex::new(AHashMap::new()) }
    }

    /// Returns a transaction bound to a live socket for `config`, reusing
    /// a pooled connection when a healthy match exists.
    pub async fn start_transaction(
        self: &Arc<Self>,
        config: &ConnectionConfig,
    ) -> Result<Http11Transaction> {
        let (key, socket) = match self.checkout(config).await {
            Some(found) => found,
            None => self.new_connection(config).await?,
        };
        Ok(Http11Transaction::new(socket, H1Connection::new(), self.clone(), key, config.read_timeout))
    }

    /// Scans the pool for a matching key, probing candidates for liveness.
    /// Dead sockets are evicted on the way.
    async fn checkout(&self, config: &ConnectionConfig) -> Option<(ConnectionKey, Socket)> {
        let mut pool = self.pool.lock().await;
        let mut dead: Vec<ConnectionKey> = Vec::new();
        let mut found: Option<ConnectionKey> = None;
        for (key, socket) in pool.iter() {
            if !config.matches(key) {
                continue;
            }
            if socket.is_connected() {
                found = Some(key.clone());
                break;
            }
            dead.push(key.clone());
        }
        for key in dead {
            trace!(origin = %key.origin, "evicting dead pooled connection");
            pool.remove(&key);
        }
        let key = found?;
        let socket = pool.remove(&key)?;
        debug!(origin = %key.origin, "reusing pooled connection");
        Some((key, socket))
    }

    async fn new_connection(&self, config: &ConnectionConfig) -> Result<(ConnectionKey, Socket)> {
        let origin = &config.origin;
        let mut socket = Socket::connect(
            &origin.host,
            origin.port,
            config.connect_timeout,
            config.source_address,
            &config.socket_options,
        )
        .await?;

        if origin.scheme == "https" {
            let tls_config = build_client_config(
                &config.ca_certs,
                config.pinned_cert.as_ref(),
                &config.http_versions,
                config.tls_min_version,
                config.tls_max_version,
            )?;
            let server_hostname = config.effective_server_hostname().to_string();
            socket = socket.start_tls(&server_hostname, Arc::new(tls_config)).await?;

            if let Some(pin) = &config.pinned_cert {
                let peer_cert = socket.peer_certificate().ok_or_else(|| {
                    crate::error::Error::Tls("peer presented no certificate to pin against".into())
                })?;
                verify_pinned_certificate(&peer_cert, pin)?;
            }
        }

        let key = ConnectionKey {
            origin: origin.clone(),
            server_hostname: config.effective_server_hostname().to_string(),
            http_version: socket.http_version(),
            ca_certs: config.ca_certs.clone(),
            pinned_cert: config.pinned_cert.clone(),
            tls_version: socket.tls_version(),
        };
        debug!(origin = %key.origin, http_version = ?key.http_version, "opened new connection");
        Ok((key, socket))
    }

    /// Returns a socket to the pool after a completed transaction. Sockets
    /// that fail the liveness probe are dropped instead.
    pub(crate) async fn release(&self, key: ConnectionKey, socket: Socket) {
        if !socket.is_connected() {
            warn!(origin = %key.origin, "connection went away before returning to pool");
            return;
        }
        self.pool.lock().await.insert(key, socket);
    }

    /// Drops every idle connection.
    pub async fn close(&self) {
        self.pool.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn idle_count(&self) -> usize {
        self.pool.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(scheme: &str, host: &str, port: u16) -> Origin {
        Origin { scheme: scheme.to_string(), host: host.to_string(), port }
    }

    fn config(origin_: Origin) -> ConnectionConfig {
        ConnectionConfig {
            origin: origin_,
            server_hostname: None,
            http_versions: vec![Version::HTTP_11],
            ca_certs: CaCerts::Bundled,
            pinned_cert: None,
            tls_min_version: TlsVersion::MinimumSupported,
            tls_max_version: TlsVersion::MaximumSupported,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(5)),
            source_address: None,
            socket_options: SocketOptions::default(),
        }
    }

    fn key(origin_: Origin) -> ConnectionKey {
        ConnectionKey {
            origin: origin_,
            server_hostname: "h".to_string(),
            http_version: Version::HTTP_11,
            ca_certs: CaCerts::Bundled,
            pinned_cert: None,
            tls_version: None,
        }
    }

    #[test]
    fn config_matches_same_origin() {
        let mut cfg = config(origin("http", "h", 80));
        cfg.server_hostname = Some("h".to_string());
        assert!(cfg.matches(&key(origin("http", "h", 80))));
        assert!(!cfg.matches(&key(origin("http", "other", 80))));
        assert!(!cfg.matches(&key(origin("https", "h", 80))));
        assert!(!cfg.matches(&key(origin("http", "h", 8080))));
    }

    #[test]
    fn config_rejects_version_outside_allowed_set() {
        let mut cfg = config(origin("http", "h", 80));
        cfg.server_hostname = Some("h".to_string());
        let mut k = key(origin("http", "h", 80));
        k.http_version = Version::HTTP_2;
        assert!(!cfg.matches(&k));
        cfg.http_versions = vec![Version::HTTP_11, Version::HTTP_2];
        assert!(cfg.matches(&k));
    }

    #[test]
    fn config_checks_tls_version_range() {
        let mut cfg = config(origin("https", "h", 443));
        cfg.server_hostname = Some("h".to_string());
        let mut k = key(origin("https", "h", 443));

        k.tls_version = Some(TlsVersion::V1_2);
        assert!(cfg.matches(&k));

        cfg.tls_min_version = TlsVersion::V1_3;
        assert!(!cfg.matches(&k));

        k.tls_version = Some(TlsVersion::V1_3);
        assert!(cfg.matches(&k));
    }

    #[test]
    fn config_distinguishes_ca_and_pin_identity() {
        let mut cfg = config(origin("https", "h", 443));
        cfg.server_hostname = Some("h".to_string());
        let mut k = key(origin("https", "h", 443));

        cfg.ca_certs = CaCerts::File("/tmp/custom.pem".into());
        assert!(!cfg.matches(&k));
        k.ca_certs = CaCerts::File("/tmp/custom.pem".into());
        assert!(cfg.matches(&k));

        cfg.pinned_cert = Some(PinnedCert::new("h", "ab".repeat(32)).unwrap());
        assert!(!cfg.matches(&k));
        k.pinned_cert = cfg.pinned_cert.clone();
        assert!(cfg.matches(&k));
    }

    #[test]
    fn sni_override_takes_part_in_matching() {
        let mut cfg = config(origin("https", "h", 443));
        cfg.server_hostname = Some("other-sni".to_string());
        assert!(!cfg.matches(&key(origin("https", "h", 443))));
    }
}
