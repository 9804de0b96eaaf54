//! # Signed-Scope Field Extraction
//!
//! Pure extractors over the signed scope of a Response document. Every
//! identity-bearing value the SP consumes is read through [`SignedScope`],
//! which only yields nodes inside the subtree covered by the verified
//! signature:
//!
//! - `/Response/Assertion[@ID=$id]/...` when the Assertion is signed, or
//! - `/Response[@ID=$id]/Assertion/...` when the whole Response is signed.
//!
//! Extractors return `Result` where extraction itself can fail (decryption,
//! duplicated attribute names, issuer cardinality); the validation engine
//! folds those into its error list.

use rsa::RsaPrivateKey;

use super::{Attributes, NameId, SubjectConfirmationData};
use crate::crypto::{decrypt_element, EncryptedElementKind};
use crate::utils::parse_saml_timestamp;
use crate::xml::{Document, NodeId, NS_ASSERTION, NS_PROTOCOL};

/// The signed subtree of a Response: a document plus the ID of the element
/// whose signature covers it
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignedScope<'a> {
    pub doc: &'a Document,
    pub id: Option<&'a str>,
}

impl<'a> SignedScope<'a> {
    /// Assertions the signed scope trusts, first matching pattern wins
    pub fn assertions(&self) -> Vec<NodeId> {
        let Some(id) = self.id else {
            return Vec::new();
        };
        let root = self.doc.root();

        let signed_assertions: Vec<NodeId> = self
            .doc
            .find_children(root, NS_ASSERTION, "Assertion")
            .into_iter()
            .filter(|&a| self.doc.attr(a, "ID") == Some(id))
            .collect();
        if !signed_assertions.is_empty() {
            return signed_assertions;
        }

        if self.doc.attr(root, "ID") == Some(id) {
            return self.doc.find_children(root, NS_ASSERTION, "Assertion");
        }
        Vec::new()
    }

    /// All nodes reached by walking `path` down from the trusted assertions
    pub fn all(&self, path: &[(&str, &str)]) -> Vec<NodeId> {
        let mut current = self.assertions();
        for &(ns, local) in path {
            let mut next = Vec::new();
            for node in current {
                next.extend(self.doc.find_children(node, ns, local));
            }
            current = next;
        }
        current
    }

    pub fn first(&self, path: &[(&str, &str)]) -> Option<NodeId> {
        self.all(path).into_iter().next()
    }
}

/// NameID of the subject; an `<EncryptedID>` is decrypted first
pub(crate) fn extract_name_id(
    scope: &SignedScope<'_>,
    keys: &[RsaPrivateKey],
) -> Result<Option<NameId>, String> {
    if let Some(encrypted) = scope.first(&[(NS_ASSERTION, "Subject"), (NS_ASSERTION, "EncryptedID")])
    {
        let (fragment, element) =
            decrypt_element(scope.doc, encrypted, keys, EncryptedElementKind::NameId)
                .map_err(|e| e.to_string())?;
        return Ok(Some(name_id_from(&fragment, element)));
    }
    Ok(scope
        .first(&[(NS_ASSERTION, "Subject"), (NS_ASSERTION, "NameID")])
        .map(|node| name_id_from(scope.doc, node)))
}

fn name_id_from(doc: &Document, node: NodeId) -> NameId {
    NameId {
        value: doc.text_content(node),
        format: doc.attr(node, "Format").map(|s| s.to_string()),
        sp_name_qualifier: doc.attr(node, "SPNameQualifier").map(|s| s.to_string()),
        name_qualifier: doc.attr(node, "NameQualifier").map(|s| s.to_string()),
    }
}

/// Non-empty `<Audience>` values under the AudienceRestriction
pub(crate) fn extract_audiences(scope: &SignedScope<'_>) -> Vec<String> {
    scope
        .all(&[
            (NS_ASSERTION, "Conditions"),
            (NS_ASSERTION, "AudienceRestriction"),
            (NS_ASSERTION, "Audience"),
        ])
        .into_iter()
        .map(|n| scope.doc.text_content(n).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Union of the Response-level and Assertion-level Issuer values. Each
/// level must carry exactly one Issuer.
pub(crate) fn extract_issuers(
    doc: &Document,
    scope: &SignedScope<'_>,
) -> Result<Vec<String>, String> {
    let mut issuers: Vec<String> = Vec::new();

    let response_issuers = doc.find_children(doc.root(), NS_ASSERTION, "Issuer");
    if response_issuers.len() != 1 {
        return Err("Issuer of the Response not found or multiple.".to_string());
    }
    issuers.push(doc.text_content(response_issuers[0]).trim().to_string());

    for assertion in scope.assertions() {
        let assertion_issuers = scope.doc.find_children(assertion, NS_ASSERTION, "Issuer");
        if assertion_issuers.len() != 1 {
            return Err("Issuer of the Assertion not found or multiple.".to_string());
        }
        let value = scope.doc.text_content(assertion_issuers[0]).trim().to_string();
        if !issuers.contains(&value) {
            issuers.push(value);
        }
    }
    Ok(issuers)
}

/// Attribute statements of the trusted assertion; encrypted attributes are
/// decrypted in place
pub(crate) fn extract_attributes(
    scope: &SignedScope<'_>,
    keys: &[RsaPrivateKey],
    check_duplicates: bool,
) -> Result<Attributes, String> {
    let mut attributes = Attributes::default();

    for statement in scope.all(&[(NS_ASSERTION, "AttributeStatement")]) {
        for child in scope.doc.child_elements(statement) {
            if scope.doc.is_named(child, NS_ASSERTION, "Attribute") {
                collect_attribute(scope.doc, child, &mut attributes, check_duplicates)?;
            } else if scope.doc.is_named(child, NS_ASSERTION, "EncryptedAttribute") {
                let (fragment, element) =
                    decrypt_element(scope.doc, child, keys, EncryptedElementKind::Attribute)
                        .map_err(|e| e.to_string())?;
                collect_attribute(&fragment, element, &mut attributes, check_duplicates)?;
            }
        }
    }
    Ok(attributes)
}

fn collect_attribute(
    doc: &Document,
    node: NodeId,
    attributes: &mut Attributes,
    check_duplicates: bool,
) -> Result<(), String> {
    let name = doc
        .attr(node, "Name")
        .ok_or_else(|| "Found an Attribute element without a Name".to_string())?
        .to_string();
    if check_duplicates && attributes.contains(&name) {
        return Err("Found an Attribute element with duplicated Name".to_string());
    }

    let mut values: Vec<Option<String>> = Vec::new();
    for value_node in doc.find_children(node, NS_ASSERTION, "AttributeValue") {
        let children = doc.child_elements(value_node);
        if children.is_empty() {
            let nil = doc
                .attr_ns(value_node, crate::xml::NS_XSI, "nil")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if nil {
                values.push(None);
            } else {
                values.push(Some(doc.text_content(value_node)));
            }
            continue;
        }

        let name_ids: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| doc.is_named(c, NS_ASSERTION, "NameID"))
            .collect();
        if name_ids.is_empty() {
            values.push(Some(doc.text_content(value_node)));
        } else {
            for name_id in name_ids {
                let text = doc.text_content(name_id);
                let value = match doc.attr(name_id, "NameQualifier") {
                    Some(qualifier) => format!("{}/{}", qualifier, text),
                    None => text,
                };
                values.push(Some(value));
            }
        }
    }

    attributes.add(name, values);
    Ok(())
}

/// SubjectConfirmation entries of the trusted assertion
pub(crate) fn extract_subject_confirmations(
    scope: &SignedScope<'_>,
) -> Vec<SubjectConfirmationData> {
    scope
        .all(&[(NS_ASSERTION, "Subject"), (NS_ASSERTION, "SubjectConfirmation")])
        .into_iter()
        .map(|node| {
            let data = scope
                .doc
                .find_children(node, NS_ASSERTION, "SubjectConfirmationData")
                .into_iter()
                .next();
            SubjectConfirmationData {
                method: scope.doc.attr(node, "Method").map(|s| s.to_string()),
                in_response_to: data
                    .and_then(|d| scope.doc.attr(d, "InResponseTo"))
                    .map(|s| s.to_string()),
                recipient: data
                    .and_then(|d| scope.doc.attr(d, "Recipient"))
                    .map(|s| s.to_string()),
                not_before: data
                    .and_then(|d| scope.doc.attr(d, "NotBefore"))
                    .and_then(parse_saml_timestamp),
                not_on_or_after: data
                    .and_then(|d| scope.doc.attr(d, "NotOnOrAfter"))
                    .and_then(parse_saml_timestamp),
            }
        })
        .collect()
}

/// Status code (nested codes joined with `" | "` on failure) and optional
/// StatusMessage
pub(crate) fn extract_status(doc: &Document) -> (Option<String>, Option<String>) {
    let root = doc.root();
    let Some(status) = doc
        .find_children(root, NS_PROTOCOL, "Status")
        .into_iter()
        .next()
    else {
        return (None, None);
    };

    let message = doc
        .find_children(status, NS_PROTOCOL, "StatusMessage")
        .into_iter()
        .next()
        .map(|n| doc.text_content(n).trim().to_string());

    let Some(code_node) = doc
        .find_children(status, NS_PROTOCOL, "StatusCode")
        .into_iter()
        .next()
    else {
        return (None, message);
    };
    let Some(top) = doc.attr(code_node, "Value").map(|s| s.to_string()) else {
        return (None, message);
    };

    if top == super::STATUS_SUCCESS {
        return (Some(top), message);
    }

    let mut codes = vec![top];
    for nested in doc.find_all(code_node, NS_PROTOCOL, "StatusCode") {
        if let Some(value) = doc.attr(nested, "Value") {
            codes.push(value.to_string());
        }
    }
    (Some(codes.join(" | ")), message)
}
