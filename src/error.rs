//! # Error Types
//!
//! Crate-wide error type for the SAML toolkit. Submodules with a richer
//! internal failure vocabulary (XML parsing, signature verification) define
//! local enums and convert into [`SamlError`] at the API boundary.

use thiserror::Error;

use crate::xml::XmlError;

/// SAML processing errors
#[derive(Error, Debug)]
pub enum SamlError {
    /// Payload could not be decoded into an XML document
    #[error("Malformed SAML payload: {0}")]
    MalformedInput(String),

    /// XML parsing or manipulation error
    #[error("XML error: {0}")]
    Xml(#[from] XmlError),

    /// Document does not match the SAML protocol schema shape
    #[error("SAML schema violation: {0}")]
    SchemaViolation(String),

    /// XML-DSig verification failed
    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// The IdP certificate that produced a valid signature is expired
    #[error("IdP x509 certificate expired")]
    CertificateExpired,

    /// Certificate could not be parsed or used
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// An encrypted element was found but no SP private key is configured
    #[error("An encrypted element was found and no SP decryption key is configured")]
    DecryptionKeyMissing,

    /// All configured SP private keys failed to decrypt the element
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Decrypted bytes did not contain the expected element
    #[error("Decrypted plaintext did not contain the expected {0} element")]
    MalformedPlaintext(&'static str),

    /// A SAML profile validation predicate failed (strict mode)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Settings are incomplete or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An algorithm URI outside the supported matrix was declared
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

pub type SamlResult<T> = Result<T, SamlError>;
