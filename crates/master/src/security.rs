//! Cluster-internal certificate authority and token-signing keys.
//!
//! The master generates an Ed25519 CA keypair at startup and signs
//! tablet-server certificates with it during the heartbeat exchange.
//! Token-signing keys are separate Ed25519 keypairs with monotonically
//! increasing sequence numbers; new keys are appended by rotation and the
//! public half of the set is exported to tablet servers so they can
//! locally verify authentication tokens issued by the master. A node's
//! view of the key set is append-only; keys leave it only by explicit
//! expiry.
//!
//! All key material is process-lifetime: a restarted master mints a fresh
//! CA and key set, and servers pick the new material up over heartbeats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use quarry_types::{MasterError, Result, TsId, codec, error::InvalidRegistrationSnafu};
use quarry_wire::security::{
    CertSignRequest, CertificatePayload, SignedCertificate, SigningKeyEntry,
};

struct TokenSigningKey {
    seq: u64,
    key: SigningKey,
    expires_unix: u64,
}

/// The master's security state: CA plus token-signing key set.
pub struct ClusterSecurity {
    ca_key: SigningKey,
    cert_validity: Duration,
    tsk_validity: Duration,
    next_serial: AtomicU64,
    keys: RwLock<Vec<TokenSigningKey>>,
    // Precomputed export snapshot, swapped on every rotation so heartbeat
    // responses never take the key lock.
    exported: ArcSwap<Vec<SigningKeyEntry>>,
}

impl ClusterSecurity {
    /// Generates a fresh CA and the first token-signing key.
    #[must_use]
    pub fn new(tsk_validity: Duration, cert_validity: Duration) -> Self {
        let ca_key = SigningKey::generate(&mut OsRng);
        let security = Self {
            ca_key,
            cert_validity,
            tsk_validity,
            next_serial: AtomicU64::new(1),
            keys: RwLock::new(Vec::new()),
            exported: ArcSwap::from_pointee(Vec::new()),
        };
        security.rotate_signing_key();
        tracing::info!(
            ca_fingerprint = %fingerprint(security.authority_key().as_bytes()),
            "Initialized cluster security"
        );
        security
    }

    /// The CA's public key, for verifiers.
    #[must_use]
    pub fn authority_key(&self) -> VerifyingKey {
        self.ca_key.verifying_key()
    }

    /// Appends a new token-signing key and makes it the active one.
    pub fn rotate_signing_key(&self) {
        let mut keys = self.keys.write();
        let seq = keys.last().map_or(1, |k| k.seq + 1);
        let key = SigningKey::generate(&mut OsRng);
        let expires_unix = unix_now().saturating_add(self.tsk_validity.as_secs());
        keys.push(TokenSigningKey { seq, key, expires_unix });

        let snapshot: Vec<SigningKeyEntry> = keys
            .iter()
            .map(|k| SigningKeyEntry {
                seq: k.seq,
                public_key: k.key.verifying_key().as_bytes().to_vec(),
                is_active: k.seq == seq,
                expires_unix: k.expires_unix,
            })
            .collect();
        drop(keys);
        self.exported.store(std::sync::Arc::new(snapshot));
        tracing::info!(seq, "Rotated token-signing key");
    }

    /// Exports the public signing-key set, in sequence order.
    ///
    /// With `after` set, only keys with a higher sequence are returned;
    /// the heartbeat delta. `None` returns the full set.
    #[must_use]
    pub fn export_signing_keys(&self, after: Option<u64>) -> Vec<SigningKeyEntry> {
        let snapshot = self.exported.load();
        match after {
            None => snapshot.as_ref().clone(),
            Some(seq) => snapshot.iter().filter(|k| k.seq > seq).cloned().collect(),
        }
    }

    /// Signs a tablet server's certificate request.
    ///
    /// Repeated requests from the same server are not an error; each one
    /// is simply re-signed with a fresh serial and validity window.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::InvalidRegistration`] if the CSR's public
    /// key is not 32 bytes, and [`MasterError::Storage`] if payload
    /// encoding fails.
    pub fn sign_certificate(
        &self,
        subject: TsId,
        csr: &CertSignRequest,
    ) -> Result<SignedCertificate> {
        snafu::ensure!(
            csr.public_key.len() == PUBLIC_KEY_LENGTH,
            InvalidRegistrationSnafu {
                reason: format!(
                    "CSR public key is {} bytes, expected {PUBLIC_KEY_LENGTH}",
                    csr.public_key.len()
                ),
            }
        );

        let now = unix_now();
        let payload = CertificatePayload {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            subject,
            subject_public_key: csr.public_key.clone(),
            not_before_unix: now,
            not_after_unix: now.saturating_add(self.cert_validity.as_secs()),
        };
        let encoded = codec::encode(&payload).map_err(MasterError::storage)?;
        let signature = self.ca_key.sign(&encoded);

        tracing::info!(
            ts_id = %subject,
            serial = payload.serial,
            key_fingerprint = %fingerprint(&payload.subject_public_key),
            "Signed tablet server certificate"
        );
        Ok(SignedCertificate { payload, signature: signature.to_bytes().to_vec() })
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn fingerprint(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> ClusterSecurity {
        ClusterSecurity::new(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    fn test_csr() -> CertSignRequest {
        let key = SigningKey::generate(&mut OsRng);
        CertSignRequest { public_key: key.verifying_key().as_bytes().to_vec() }
    }

    #[test]
    fn test_starts_with_one_active_key() {
        let security = security();
        let keys = security.export_signing_keys(None);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].seq, 1);
        assert!(keys[0].is_active);
    }

    #[test]
    fn test_rotation_appends_and_reassigns_active() {
        let security = security();
        security.rotate_signing_key();
        let keys = security.export_signing_keys(None);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].seq, 2);
        assert!(!keys[0].is_active);
        assert!(keys[1].is_active);
    }

    #[test]
    fn test_export_delta_skips_seen_keys() {
        let security = security();
        security.rotate_signing_key();
        assert!(security.export_signing_keys(Some(2)).is_empty());
        let delta = security.export_signing_keys(Some(1));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].seq, 2);
    }

    #[test]
    fn test_signed_certificate_verifies() {
        let security = security();
        let subject = TsId::generate();
        let cert = security.sign_certificate(subject, &test_csr()).expect("sign");
        cert.verify(&security.authority_key()).expect("verifies under CA key");
        assert_eq!(cert.payload.subject, subject);
        assert!(cert.is_valid_at(unix_now()));
    }

    #[test]
    fn test_repeated_signing_is_allowed() {
        let security = security();
        let subject = TsId::generate();
        let csr = test_csr();
        let first = security.sign_certificate(subject, &csr).expect("first");
        let second = security.sign_certificate(subject, &csr).expect("second");
        assert_ne!(first.payload.serial, second.payload.serial);
        second.verify(&security.authority_key()).expect("verifies");
    }

    #[test]
    fn test_rejects_malformed_csr() {
        let security = security();
        let err = security
            .sign_certificate(TsId::generate(), &CertSignRequest { public_key: vec![1, 2, 3] })
            .expect_err("short key rejected");
        assert!(matches!(err, MasterError::InvalidRegistration { .. }));
    }

    #[test]
    fn test_certificate_fails_under_wrong_authority() {
        let security = security();
        let other = security();
        let cert = security.sign_certificate(TsId::generate(), &test_csr()).expect("sign");
        cert.verify(&other.authority_key()).expect_err("wrong CA rejected");
    }
}
