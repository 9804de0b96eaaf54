//! # X.509 Trust Anchors
//!
//! IdP certificates configured on the SP side: PEM/DER loading, fingerprint
//! computation and comparison, validity-window checks, and extraction of the
//! RSA public key used for signature verification.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{SamlError, SamlResult};

/// Digest used to fingerprint an IdP certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Default for FingerprintAlgorithm {
    fn default() -> Self {
        Self::Sha1
    }
}

impl FingerprintAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// An IdP signing certificate held as DER bytes
#[derive(Clone, PartialEq, Eq)]
pub struct IdpCertificate {
    der: Vec<u8>,
}

impl std::fmt::Debug for IdpCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpCertificate")
            .field("sha1", &self.fingerprint(FingerprintAlgorithm::Sha1))
            .finish()
    }
}

impl IdpCertificate {
    /// Load from PEM, or from a bare base64 DER blob as found in IdP
    /// metadata `<ds:X509Certificate>` elements.
    pub fn from_pem(text: &str) -> SamlResult<Self> {
        let der = decode_cert_base64(text)?;
        Self::from_der(der)
    }

    /// Load from DER bytes, validating that they parse as a certificate
    pub fn from_der(der: Vec<u8>) -> SamlResult<Self> {
        X509Certificate::from_der(&der)
            .map_err(|e| SamlError::Certificate(e.to_string()))?;
        Ok(Self { der })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Lowercase hex fingerprint without separators
    pub fn fingerprint(&self, algorithm: FingerprintAlgorithm) -> String {
        match algorithm {
            FingerprintAlgorithm::Sha1 => hex::encode(Sha1::digest(&self.der)),
            FingerprintAlgorithm::Sha256 => hex::encode(Sha256::digest(&self.der)),
            FingerprintAlgorithm::Sha512 => hex::encode(Sha512::digest(&self.der)),
        }
    }

    /// Compare against a configured fingerprint. The expected value may use
    /// any case and `:` or space separators.
    pub fn matches_fingerprint(
        &self,
        expected: &str,
        algorithm: FingerprintAlgorithm,
    ) -> bool {
        let normalized: String = expected
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect::<String>()
            .to_lowercase();
        !normalized.is_empty() && normalized == self.fingerprint(algorithm)
    }

    /// RSA public key from the certificate's SubjectPublicKeyInfo
    pub fn public_key(&self) -> SamlResult<RsaPublicKey> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| SamlError::Certificate(e.to_string()))?;
        RsaPublicKey::from_public_key_der(cert.public_key().raw)
            .map_err(|e| SamlError::Certificate(format!("not an RSA key: {}", e)))
    }

    /// Certificate validity window as UTC timestamps
    pub fn validity(&self) -> SamlResult<(DateTime<Utc>, DateTime<Utc>)> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| SamlError::Certificate(e.to_string()))?;
        let not_before = Utc
            .timestamp_opt(cert.validity().not_before.timestamp(), 0)
            .single()
            .ok_or_else(|| SamlError::Certificate("invalid notBefore".to_string()))?;
        let not_after = Utc
            .timestamp_opt(cert.validity().not_after.timestamp(), 0)
            .single()
            .ok_or_else(|| SamlError::Certificate("invalid notAfter".to_string()))?;
        Ok((not_before, not_after))
    }

    /// `true` when `now` is past the certificate's notAfter
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> SamlResult<bool> {
        let (_, not_after) = self.validity()?;
        Ok(now > not_after)
    }
}

/// Strip PEM armor and whitespace, then base64-decode
fn decode_cert_base64(text: &str) -> SamlResult<Vec<u8>> {
    let body: String = text
        .lines()
        .filter(|line| !line.contains("-----"))
        .collect::<Vec<_>>()
        .join("");
    let body: String = body.split_whitespace().collect();
    BASE64
        .decode(body.as_bytes())
        .map_err(|e| SamlError::Certificate(format!("invalid base64: {}", e)))
}
