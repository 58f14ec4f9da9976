//! MbedTLS-based certificate hashing is explicitly out of scope (`spec.md` §1);
//! `Install/Delete/GetInstalledCertificateId` depend on this one-method port
//! instead of performing hashing themselves (`SPEC_FULL.md`'s Security supplement).

pub trait CertificateHasher {
    fn hash(&self, pem: &str) -> String;
}

/// Deterministic, non-cryptographic stand-in for tests — real deployments supply
/// an MbedTLS- or `sha2`-backed implementation in `infrastructure`.
#[derive(Debug, Default)]
pub struct NoopCertificateHasher;

impl CertificateHasher for NoopCertificateHasher {
    fn hash(&self, pem: &str) -> String {
        format!("noop-hash:{}", pem.len())
    }
}
