//! # Cryptographic Verification and Decryption
//!
//! XML-DSig signature verification and XML-Encryption decryption for SAML
//! documents, plus X.509 trust-anchor handling. Primitives come from the
//! RustCrypto stack (`rsa`, `sha1`/`sha2`, `aes`/`cbc`, `aes-gcm`); this
//! module owns algorithm-URI dispatch and the XML plumbing around them.
//!
//! Only verification and decryption are implemented. The toolkit never
//! creates signatures.

pub mod certs;
pub mod dsig;
pub mod xmlenc;

pub use certs::{FingerprintAlgorithm, IdpCertificate};
pub use dsig::{verify_signature, DsigError, TrustAnchor};
pub use xmlenc::{decrypt_element, EncryptedElementKind};

/// Exclusive canonicalization
pub const ALG_C14N_EXC: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// Exclusive canonicalization, with comments
pub const ALG_C14N_EXC_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
/// Canonical XML 1.0
pub const ALG_C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// Canonical XML 1.0, with comments
pub const ALG_C14N_10_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
/// Canonical XML 1.1
pub const ALG_C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
/// Enveloped-signature transform
pub const ALG_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// SHA-1 digest
pub const ALG_DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// SHA-256 digest
pub const ALG_DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// SHA-512 digest
pub const ALG_DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

/// RSA with SHA-1
pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
/// RSA with SHA-256
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// RSA with SHA-512
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

/// AES-128 in CBC mode
pub const ALG_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
/// AES-256 in CBC mode
pub const ALG_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
/// AES-128 in GCM mode
pub const ALG_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
/// AES-256 in GCM mode
pub const ALG_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

/// RSA PKCS#1 v1.5 key transport
pub const ALG_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
/// RSA-OAEP (MGF1 with SHA-1) key transport
pub const ALG_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
