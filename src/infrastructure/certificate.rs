//! The concrete `ports::CertificateHasher`. `spec.md` §1 keeps the real
//! MbedTLS-based hashing external to the core; this crate's ambient stack
//! already carries `sha2` for the teacher's own certificate-fingerprinting
//! code, so the infrastructure adapter reuses it rather than binding MbedTLS.

use crate::ports::CertificateHasher;
use sha2::{Digest, Sha256};

#[derive(Debug, Default)]
pub struct Sha256CertificateHasher;

impl CertificateHasher for Sha256CertificateHasher {
    fn hash(&self, pem: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(pem.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Small inline hex encoder so the adapter does not need to pull in a
/// dedicated `hex` crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
