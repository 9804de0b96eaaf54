//! # XML-DSig Verification
//!
//! Verifies a `<ds:Signature>` over a SAML document: dereferences each
//! `<ds:Reference>` by same-document ID, applies the declared transforms
//! (enveloped-signature, canonicalization), checks digests, canonicalizes
//! `<ds:SignedInfo>`, and verifies the `<ds:SignatureValue>` against a trust
//! anchor.
//!
//! Trust anchors come in three shapes: one certificate, a certificate
//! fingerprint (matched against the embedded `<ds:X509Certificate>`), or an
//! ordered rotation list tried in sequence.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use super::certs::{FingerprintAlgorithm, IdpCertificate};
use crate::xml::{canonicalize, C14nMode, Document, NodeId, NS_DSIG};

/// Signature verification errors
#[derive(Error, Debug)]
pub enum DsigError {
    /// Signature element is missing required structure
    #[error("malformed Signature element: {0}")]
    Malformed(String),

    /// Algorithm URI outside the supported matrix
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Reference URI empty, missing, or not resolvable in this document
    #[error("reference URI {0:?} does not dereference within the document")]
    BadReference(Option<String>),

    /// Recomputed digest differs from `<ds:DigestValue>`
    #[error("digest mismatch for reference {0}")]
    DigestMismatch(String),

    /// `<ds:SignatureValue>` does not verify under the candidate key
    #[error("signature value does not verify")]
    BadSignatureValue,

    /// Embedded certificate does not match the configured fingerprint
    #[error("embedded certificate does not match the configured fingerprint")]
    FingerprintMismatch,

    /// Fingerprint trust requires an embedded `<ds:X509Certificate>`
    #[error("no embedded certificate available for fingerprint validation")]
    MissingEmbeddedCertificate,

    /// Every candidate certificate failed
    #[error("no candidate certificate verified the signature: {0}")]
    AllCandidatesFailed(String),

    /// Certificate parsing or key extraction failed
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The certificate that verified the signature is expired
    #[error("signing certificate is expired")]
    CertificateExpired,
}

/// Trust material used to verify one signature
#[derive(Debug)]
pub enum TrustAnchor<'a> {
    /// A single known IdP certificate
    Certificate(&'a IdpCertificate),
    /// A fingerprint of the IdP certificate; the embedded KeyInfo
    /// certificate is matched against it and then used for verification
    Fingerprint {
        value: &'a str,
        algorithm: FingerprintAlgorithm,
    },
    /// An ordered rotation list; candidates are tried until one verifies
    Certificates(&'a [IdpCertificate]),
}

#[derive(Debug, Clone, Copy)]
enum DigestAlg {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlg {
    fn from_uri(uri: &str) -> Result<Self, DsigError> {
        match uri {
            super::ALG_DIGEST_SHA1 => Ok(Self::Sha1),
            super::ALG_DIGEST_SHA256 => Ok(Self::Sha256),
            super::ALG_DIGEST_SHA512 => Ok(Self::Sha512),
            other => Err(DsigError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SignatureAlg {
    RsaSha1,
    RsaSha256,
    RsaSha512,
}

impl SignatureAlg {
    fn from_uri(uri: &str) -> Result<Self, DsigError> {
        match uri {
            super::ALG_RSA_SHA1 => Ok(Self::RsaSha1),
            super::ALG_RSA_SHA256 => Ok(Self::RsaSha256),
            super::ALG_RSA_SHA512 => Ok(Self::RsaSha512),
            other => Err(DsigError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn verify(
        &self,
        key: &RsaPublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), DsigError> {
        let result = match self {
            Self::RsaSha1 => key.verify(
                Pkcs1v15Sign::new::<Sha1>(),
                &Sha1::digest(data),
                signature,
            ),
            Self::RsaSha256 => key.verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(data),
                signature,
            ),
            Self::RsaSha512 => key.verify(
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(data),
                signature,
            ),
        };
        result.map_err(|_| DsigError::BadSignatureValue)
    }
}

/// One parsed `<ds:Reference>`
#[derive(Debug)]
struct Reference {
    uri: Option<String>,
    enveloped: bool,
    c14n: Option<C14nMode>,
    digest_method: String,
    digest_value: Vec<u8>,
}

/// Parsed shape of one `<ds:Signature>`
#[derive(Debug)]
struct ParsedSignature {
    signed_info: NodeId,
    c14n_mode: C14nMode,
    signature_method: String,
    references: Vec<Reference>,
    signature_value: Vec<u8>,
    embedded_certificate: Option<IdpCertificate>,
}

/// Verify a `<ds:Signature>` node against a trust anchor. On success
/// returns the certificate that verified the signature.
pub fn verify_signature(
    doc: &Document,
    signature: NodeId,
    trust: &TrustAnchor<'_>,
    check_cert_expiration: bool,
    now: DateTime<Utc>,
) -> Result<IdpCertificate, DsigError> {
    let parsed = parse_signature(doc, signature)?;

    for reference in &parsed.references {
        verify_reference(doc, signature, reference)?;
    }

    let signed_info_bytes =
        canonicalize(doc, parsed.signed_info, &parsed.c14n_mode, None).into_bytes();
    let algorithm = SignatureAlg::from_uri(&parsed.signature_method)?;

    let candidates: Vec<IdpCertificate> = match trust {
        TrustAnchor::Certificate(cert) => vec![(*cert).clone()],
        TrustAnchor::Certificates(certs) => certs.to_vec(),
        TrustAnchor::Fingerprint { value, algorithm } => {
            let embedded = parsed
                .embedded_certificate
                .clone()
                .ok_or(DsigError::MissingEmbeddedCertificate)?;
            if !embedded.matches_fingerprint(value, *algorithm) {
                return Err(DsigError::FingerprintMismatch);
            }
            vec![embedded]
        }
    };
    if candidates.is_empty() {
        return Err(DsigError::Certificate(
            "no candidate certificate configured".to_string(),
        ));
    }

    // Rotation: any verifying candidate wins and earlier failures are
    // discarded.
    let mut failures: Vec<String> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        let key = match candidate.public_key() {
            Ok(key) => key,
            Err(e) => {
                failures.push(format!("candidate {}: {}", index, e));
                continue;
            }
        };
        match algorithm.verify(&key, &signed_info_bytes, &parsed.signature_value) {
            Ok(()) => {
                if check_cert_expiration {
                    let expired = candidate
                        .is_expired_at(now)
                        .map_err(|e| DsigError::Certificate(e.to_string()))?;
                    if expired {
                        return Err(DsigError::CertificateExpired);
                    }
                }
                log::debug!("signature verified with candidate certificate {}", index);
                return Ok(candidate.clone());
            }
            Err(e) => failures.push(format!("candidate {}: {}", index, e)),
        }
    }

    if candidates.len() == 1 {
        Err(DsigError::BadSignatureValue)
    } else {
        Err(DsigError::AllCandidatesFailed(failures.join("; ")))
    }
}

fn parse_signature(doc: &Document, signature: NodeId) -> Result<ParsedSignature, DsigError> {
    let signed_info = doc
        .find_children(signature, NS_DSIG, "SignedInfo")
        .into_iter()
        .next()
        .ok_or_else(|| DsigError::Malformed("missing SignedInfo".to_string()))?;

    let c14n_node = doc
        .find_children(signed_info, NS_DSIG, "CanonicalizationMethod")
        .into_iter()
        .next()
        .ok_or_else(|| DsigError::Malformed("missing CanonicalizationMethod".to_string()))?;
    let c14n_uri = doc
        .attr(c14n_node, "Algorithm")
        .ok_or_else(|| DsigError::Malformed("CanonicalizationMethod has no Algorithm".to_string()))?;
    let c14n_mode = c14n_mode_from_uri(doc, c14n_node, c14n_uri)?;

    let signature_method = doc
        .find_children(signed_info, NS_DSIG, "SignatureMethod")
        .into_iter()
        .next()
        .and_then(|n| doc.attr(n, "Algorithm"))
        .ok_or_else(|| DsigError::Malformed("missing SignatureMethod".to_string()))?
        .to_string();

    let mut references = Vec::new();
    for node in doc.find_children(signed_info, NS_DSIG, "Reference") {
        references.push(parse_reference(doc, node)?);
    }
    if references.is_empty() {
        return Err(DsigError::Malformed("missing Reference".to_string()));
    }

    let signature_value = doc
        .find_children(signature, NS_DSIG, "SignatureValue")
        .into_iter()
        .next()
        .map(|n| doc.text_content(n))
        .ok_or_else(|| DsigError::Malformed("missing SignatureValue".to_string()))?;
    let signature_value = decode_base64_loose(&signature_value)
        .ok_or_else(|| DsigError::Malformed("SignatureValue is not base64".to_string()))?;

    let embedded_certificate = doc
        .find_first(signature, NS_DSIG, "X509Certificate")
        .map(|n| doc.text_content(n))
        .and_then(|b64| decode_base64_loose(&b64))
        .and_then(|der| IdpCertificate::from_der(der).ok());

    Ok(ParsedSignature {
        signed_info,
        c14n_mode,
        signature_method,
        references,
        signature_value,
        embedded_certificate,
    })
}

fn parse_reference(doc: &Document, node: NodeId) -> Result<Reference, DsigError> {
    let uri = doc.attr(node, "URI").map(|s| s.to_string());

    let mut enveloped = false;
    let mut c14n: Option<C14nMode> = None;
    if let Some(transforms) = doc
        .find_children(node, NS_DSIG, "Transforms")
        .into_iter()
        .next()
    {
        for transform in doc.find_children(transforms, NS_DSIG, "Transform") {
            let alg = doc
                .attr(transform, "Algorithm")
                .ok_or_else(|| DsigError::Malformed("Transform has no Algorithm".to_string()))?;
            if alg == super::ALG_ENVELOPED_SIGNATURE {
                enveloped = true;
            } else {
                c14n = Some(c14n_mode_from_uri(doc, transform, alg)?);
            }
        }
    }

    let digest_method = doc
        .find_children(node, NS_DSIG, "DigestMethod")
        .into_iter()
        .next()
        .and_then(|n| doc.attr(n, "Algorithm"))
        .ok_or_else(|| DsigError::Malformed("missing DigestMethod".to_string()))?
        .to_string();

    let digest_value = doc
        .find_children(node, NS_DSIG, "DigestValue")
        .into_iter()
        .next()
        .map(|n| doc.text_content(n))
        .and_then(|b64| decode_base64_loose(&b64))
        .ok_or_else(|| DsigError::Malformed("missing or invalid DigestValue".to_string()))?;

    Ok(Reference {
        uri,
        enveloped,
        c14n,
        digest_method,
        digest_value,
    })
}

fn verify_reference(
    doc: &Document,
    signature: NodeId,
    reference: &Reference,
) -> Result<(), DsigError> {
    let uri = reference
        .uri
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| DsigError::BadReference(reference.uri.clone()))?;
    let id = uri
        .strip_prefix('#')
        .ok_or_else(|| DsigError::BadReference(reference.uri.clone()))?;
    if id.is_empty() {
        return Err(DsigError::BadReference(reference.uri.clone()));
    }

    let target = doc
        .element_by_id(doc.root(), id)
        .ok_or_else(|| DsigError::BadReference(reference.uri.clone()))?;

    let exclude = if reference.enveloped {
        Some(signature)
    } else {
        None
    };
    // Without an explicit canonicalization transform, XML-DSig falls back to
    // Canonical XML 1.0 for node-set references.
    let mode = reference.c14n.clone().unwrap_or(C14nMode::Inclusive);
    let data = canonicalize(doc, target, &mode, exclude);

    let digest = DigestAlg::from_uri(&reference.digest_method)?.digest(data.as_bytes());
    if digest != reference.digest_value {
        return Err(DsigError::DigestMismatch(uri.to_string()));
    }
    Ok(())
}

/// Map a canonicalization algorithm URI to a mode, reading an optional
/// `InclusiveNamespaces` child for the exclusive variants.
fn c14n_mode_from_uri(
    doc: &Document,
    node: NodeId,
    uri: &str,
) -> Result<C14nMode, DsigError> {
    match uri {
        super::ALG_C14N_EXC | super::ALG_C14N_EXC_COMMENTS => {
            let prefixes = doc
                .child_elements(node)
                .into_iter()
                .find(|&n| {
                    doc.element(n).map(|e| e.local.as_str()) == Some("InclusiveNamespaces")
                })
                .and_then(|n| doc.attr(n, "PrefixList"))
                .map(|list| {
                    list.split_whitespace()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Ok(C14nMode::Exclusive {
                inclusive_prefixes: prefixes,
            })
        }
        super::ALG_C14N_10 | super::ALG_C14N_10_COMMENTS | super::ALG_C14N_11 => {
            Ok(C14nMode::Inclusive)
        }
        other => Err(DsigError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Base64 as found in XML text nodes: line-wrapped and padded loosely
pub(crate) fn decode_base64_loose(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    BASE64.decode(compact.as_bytes()).ok()
}
