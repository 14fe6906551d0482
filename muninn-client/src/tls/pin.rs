//! Certificate pinning.
//!
//! A pin pairs a hostname with a hex fingerprint of the expected leaf
//! certificate. The digest is inferred from the fingerprint length:
//! 16 bytes selects MD5, 20 selects SHA-1 and 32 selects SHA-256.
//! Comparison is constant-time.

use md5::Digest as _;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FingerprintHash {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintHash {
    fn for_len(len: usize) -> Option<FingerprintHash> {
        match len {
            16 => Some(FingerprintHash::Md5),
            20 => Some(FingerprintHash::Sha1),
            32 => Some(FingerprintHash::Sha256),
            _ => None,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            FingerprintHash::Md5 => md5::Md5::digest(data).to_vec(),
            FingerprintHash::Sha1 => sha1::Sha1::digest(data).to_vec(),
            FingerprintHash::Sha256 => sha2::Sha256::digest(data).to_vec(),
        }
    }
}

/// A `(host, fingerprint)` pin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PinnedCert {
    host: String,
    fingerprint: Vec<u8>,
}

impl PinnedCert {
    /// Accepts hex with or without `:` separators, any case. The length
    /// must correspond to an MD5, SHA-1 or SHA-256 digest.
    pub fn new(host: impl Into<String>, fingerprint: impl AsRef<str>) -> Result<PinnedCert> {
        let cleaned: String =
            fingerprint.as_ref().chars().filter(|c| *c != ':').collect::<String>().to_lowercase();
        let fingerprint = hex::decode(&cleaned)
            .map_err(|_| Error::Config(format!("fingerprint '{cleaned}' is not valid hex")))?;
        if FingerprintHash::for_len(fingerprint.len()).is_none() {
            return Err(Error::Config(format!(
                "fingerprint of {} bytes matches no supported digest (md5, sha1, sha256)",
                fingerprint.len()
            )));
        }
        Ok(PinnedCert { host: host.into(), fingerprint })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Colon-separated lowercase hex, the usual display form.
    pub fn fingerprint_pretty(&self) -> String {
        pretty_hex(&self.fingerprint)
    }
}

/// A host → fingerprint mapping configured on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSet {
    pins: Vec<PinnedCert>,
}

impl PinSet {
    pub fn new() -> Self {
        Self { pins: Vec::new() }
    }

    pub fn add(&mut self, pin: PinnedCert) {
        self.pins.push(pin);
    }

    pub fn lookup(&self, host: &str) -> Option<&PinnedCert> {
        self.pins.iter().find(|p| p.host.eq_ignore_ascii_case(host))
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

fn pretty_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

/// Compares the presented leaf certificate (DER) against the pin.
pub fn verify_pinned_certificate(peer_cert_der: &[u8], pin: &PinnedCert) -> Result<()> {
    let hash = FingerprintHash::for_len(pin.fingerprint.len())
        .expect("pin length validated at construction");
    let presented = hash.digest(peer_cert_der);
    if bool::from(presented.ct_eq(&pin.fingerprint)) {
        Ok(())
    } else {
        Err(Error::CertificateFingerprintMismatch {
            pinned: pretty_hex(&pin.fingerprint),
            presented: pretty_hex(&presented),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &[u8] = b"not really DER but any bytes hash fine";

    #[test]
    fn sha256_pin_matches() {
        let fingerprint = hex::encode(sha2::Sha256::digest(CERT));
        let pin = PinnedCert::new("example.com", fingerprint).unwrap();
        assert!(verify_pinned_certificate(CERT, &pin).is_ok());
    }

    #[test]
    fn sha1_and_md5_lengths_select_digest() {
        let sha1_pin = PinnedCert::new("h", hex::encode(sha1::Sha1::digest(CERT))).unwrap();
        assert!(verify_pinned_certificate(CERT, &sha1_pin).is_ok());

        let md5_pin = PinnedCert::new("h", hex::encode(md5::Md5::digest(CERT))).unwrap();
        assert!(verify_pinned_certificate(CERT, &md5_pin).is_ok());
    }

    #[test]
    fn colon_separated_uppercase_accepted() {
        let raw = sha2::Sha256::digest(CERT);
        let pretty = raw.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":");
        let pin = PinnedCert::new("h", pretty).unwrap();
        assert!(verify_pinned_certificate(CERT, &pin).is_ok());
    }

    #[test]
    fn single_bit_flip_is_rejected() {
        let mut fingerprint = sha2::Sha256::digest(CERT).to_vec();
        fingerprint[0] ^= 0x01;
        let pin = PinnedCert::new("h", hex::encode(&fingerprint)).unwrap();
        let err = verify_pinned_certificate(CERT, &pin).unwrap_err();
        match err {
            Error::CertificateFingerprintMismatch { pinned, presented } => {
                assert_ne!(pinned, presented);
                assert!(pinned.contains(':'));
            }
            other => panic!("expected fingerprint mismatch, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_length_is_config_error() {
        assert!(PinnedCert::new("h", "abcd").is_err());
        assert!(PinnedCert::new("h", "zz".repeat(32)).is_err());
    }

    #[test]
    fn pin_set_lookup_ignores_case() {
        let mut pins = PinSet::new();
        pins.add(PinnedCert::new("Example.COM", "a".repeat(64)).unwrap());
        assert!(pins.lookup("example.com").is_some());
        assert!(pins.lookup("other.com").is_none());
    }
}
