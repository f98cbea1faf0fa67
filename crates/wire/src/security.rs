//! Security payloads exchanged over the heartbeat.
//!
//! The master runs a cluster-internal certificate authority and a set of
//! rotating token-signing keys. A tablet server without a signed
//! certificate attaches a [`CertSignRequest`] to its heartbeats; the master
//! answers with a [`SignedCertificate`]. Every heartbeat response also
//! carries the signing-key entries the server has not seen yet, so each
//! server can locally verify authentication tokens issued by the master.
//!
//! Signatures are Ed25519 over the postcard encoding of
//! [`CertificatePayload`].

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use quarry_types::TsId;

/// Certificate-signing request from a tablet server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertSignRequest {
    /// The server's Ed25519 public identity key (32 bytes).
    pub public_key: Vec<u8>,
}

/// The signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePayload {
    /// Certificate serial, unique per issuance.
    pub serial: u64,
    /// The certified server.
    pub subject: TsId,
    /// The server's Ed25519 public identity key.
    pub subject_public_key: Vec<u8>,
    /// Validity start, seconds since the Unix epoch.
    pub not_before_unix: u64,
    /// Validity end, seconds since the Unix epoch.
    pub not_after_unix: u64,
}

/// A certificate signed by the cluster's internal authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCertificate {
    /// The signed payload.
    pub payload: CertificatePayload,
    /// Ed25519 signature over the postcard encoding of `payload`.
    pub signature: Vec<u8>,
}

/// Certificate verification failure.
#[derive(Debug, Snafu)]
pub enum CertVerifyError {
    /// The signature or authority key bytes are not well-formed Ed25519
    /// material.
    #[snafu(display("Malformed certificate material: {reason}"))]
    Malformed {
        /// What failed to parse.
        reason: String,
    },

    /// The signature does not verify under the authority key.
    #[snafu(display("Certificate signature verification failed"))]
    BadSignature,
}

impl SignedCertificate {
    /// Verifies the certificate signature under the cluster authority key.
    ///
    /// Validity-window checks are the caller's concern; a verifier may
    /// deliberately accept a recently expired certificate during rotation.
    ///
    /// # Errors
    ///
    /// Returns [`CertVerifyError`] if the signature bytes are malformed or
    /// do not verify.
    pub fn verify(&self, authority: &VerifyingKey) -> Result<(), CertVerifyError> {
        let encoded = postcard::to_allocvec(&self.payload).map_err(|e| {
            CertVerifyError::Malformed { reason: format!("payload encoding: {e}") }
        })?;
        let sig_bytes: &[u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CertVerifyError::Malformed {
                reason: format!("signature is {} bytes, expected 64", self.signature.len()),
            })?;
        let signature = Signature::from_bytes(sig_bytes);
        authority.verify(&encoded, &signature).map_err(|_| CertVerifyError::BadSignature)
    }

    /// True if `now_unix` falls inside the certificate's validity window.
    #[must_use]
    pub fn is_valid_at(&self, now_unix: u64) -> bool {
        self.payload.not_before_unix <= now_unix && now_unix < self.payload.not_after_unix
    }
}

/// One entry of the exported token-signing key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyEntry {
    /// Monotonic key sequence number; higher supersedes lower.
    pub seq: u64,
    /// Ed25519 public verification key (32 bytes).
    pub public_key: Vec<u8>,
    /// True for the key currently used to sign new tokens.
    pub is_active: bool,
    /// Expiry, seconds since the Unix epoch. A node drops a key only when
    /// told it expired; the set is otherwise append-only on the node side.
    pub expires_unix: u64,
}
