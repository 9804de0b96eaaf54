//! # Structural Validation
//!
//! Enforces the saml-schema-protocol-2.0 shape for the subset of the
//! vocabulary a Response can carry: required attributes on Response and
//! Assertion, the allowed child-element vocabulary at each level, and
//! cardinality of Status and StatusCode. Runs over both the original and
//! the decrypted document.

use crate::xml::{Document, NodeId, NS_ASSERTION, NS_DSIG, NS_PROTOCOL};

/// Validate the document against the Response schema subset
pub fn validate_response_structure(doc: &Document) -> Result<(), String> {
    let root = doc.root();
    if !doc.is_named(root, NS_PROTOCOL, "Response") {
        return Err("root element is not a samlp:Response".to_string());
    }
    for attr in ["ID", "Version", "IssueInstant"] {
        if doc.attr(root, attr).is_none() {
            return Err(format!("Response is missing the {} attribute", attr));
        }
    }

    let mut status_count = 0;
    for child in doc.child_elements(root) {
        match (doc.namespace(child), local(doc, child)) {
            (Some(ns), "Issuer") if ns == NS_ASSERTION => {}
            (Some(ns), "Signature") if ns == NS_DSIG => {}
            (Some(ns), "Extensions") if ns == NS_PROTOCOL => {}
            (Some(ns), "Status") if ns == NS_PROTOCOL => {
                status_count += 1;
                validate_status(doc, child)?;
            }
            (Some(ns), "Assertion") if ns == NS_ASSERTION => {
                validate_assertion(doc, child)?;
            }
            (Some(ns), "EncryptedAssertion") if ns == NS_ASSERTION => {}
            (ns, name) => {
                return Err(format!(
                    "unexpected element {} (namespace {:?}) under Response",
                    name, ns
                ));
            }
        }
    }
    if status_count != 1 {
        return Err("Response must carry exactly one Status element".to_string());
    }
    Ok(())
}

fn validate_status(doc: &Document, status: NodeId) -> Result<(), String> {
    let mut code_count = 0;
    for child in doc.child_elements(status) {
        match (doc.namespace(child), local(doc, child)) {
            (Some(ns), "StatusCode") if ns == NS_PROTOCOL => {
                code_count += 1;
                if doc.attr(child, "Value").is_none() {
                    return Err("StatusCode is missing the Value attribute".to_string());
                }
            }
            (Some(ns), "StatusMessage") | (Some(ns), "StatusDetail")
                if ns == NS_PROTOCOL => {}
            (ns, name) => {
                return Err(format!(
                    "unexpected element {} (namespace {:?}) under Status",
                    name, ns
                ));
            }
        }
    }
    if code_count != 1 {
        return Err("Status must carry exactly one top-level StatusCode".to_string());
    }
    Ok(())
}

fn validate_assertion(doc: &Document, assertion: NodeId) -> Result<(), String> {
    for attr in ["ID", "Version", "IssueInstant"] {
        if doc.attr(assertion, attr).is_none() {
            return Err(format!("Assertion is missing the {} attribute", attr));
        }
    }

    let mut issuer_count = 0;
    for child in doc.child_elements(assertion) {
        match (doc.namespace(child), local(doc, child)) {
            (Some(ns), "Issuer") if ns == NS_ASSERTION => issuer_count += 1,
            (Some(ns), "Signature") if ns == NS_DSIG => {}
            (Some(ns), "Subject") if ns == NS_ASSERTION => {
                validate_subject(doc, child)?;
            }
            (Some(ns), "Conditions") if ns == NS_ASSERTION => {
                validate_conditions(doc, child)?;
            }
            (Some(ns), "Advice") if ns == NS_ASSERTION => {}
            (Some(ns), "Statement")
            | (Some(ns), "AuthnStatement")
            | (Some(ns), "AuthzDecisionStatement")
            | (Some(ns), "AttributeStatement")
                if ns == NS_ASSERTION => {}
            (ns, name) => {
                return Err(format!(
                    "unexpected element {} (namespace {:?}) under Assertion",
                    name, ns
                ));
            }
        }
    }
    if issuer_count != 1 {
        return Err("Assertion must carry exactly one Issuer".to_string());
    }
    Ok(())
}

fn validate_subject(doc: &Document, subject: NodeId) -> Result<(), String> {
    for child in doc.child_elements(subject) {
        match (doc.namespace(child), local(doc, child)) {
            (Some(ns), "BaseID")
            | (Some(ns), "NameID")
            | (Some(ns), "EncryptedID")
            | (Some(ns), "SubjectConfirmation")
                if ns == NS_ASSERTION => {}
            (ns, name) => {
                return Err(format!(
                    "unexpected element {} (namespace {:?}) under Subject",
                    name, ns
                ));
            }
        }
    }
    Ok(())
}

fn validate_conditions(doc: &Document, conditions: NodeId) -> Result<(), String> {
    for child in doc.child_elements(conditions) {
        match (doc.namespace(child), local(doc, child)) {
            (Some(ns), "Condition")
            | (Some(ns), "AudienceRestriction")
            | (Some(ns), "OneTimeUse")
            | (Some(ns), "ProxyRestriction")
                if ns == NS_ASSERTION => {}
            (ns, name) => {
                return Err(format!(
                    "unexpected element {} (namespace {:?}) under Conditions",
                    name, ns
                ));
            }
        }
    }
    Ok(())
}

fn local<'d>(doc: &'d Document, id: NodeId) -> &'d str {
    doc.element(id).map(|e| e.local.as_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::Document;

    fn response(body: &str) -> String {
        format!(
            concat!(
                "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"_r\" Version=\"2.0\" IssueInstant=\"2024-06-01T00:00:00Z\">{}</samlp:Response>"
            ),
            body
        )
    }

    const STATUS: &str = concat!(
        "<samlp:Status><samlp:StatusCode ",
        "Value=\"urn:oasis:names:tc:SAML:2.0:status:Success\"/></samlp:Status>"
    );

    #[test]
    fn test_minimal_response_passes() {
        let doc = Document::parse(&response(STATUS)).unwrap();
        assert!(validate_response_structure(&doc).is_ok());
    }

    #[test]
    fn test_missing_status_fails() {
        let doc = Document::parse(&response("")).unwrap();
        assert!(validate_response_structure(&doc).is_err());
    }

    #[test]
    fn test_missing_response_id_fails() {
        let xml = concat!(
            "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
            "Version=\"2.0\" IssueInstant=\"2024-06-01T00:00:00Z\">",
            "<samlp:Status><samlp:StatusCode Value=\"x\"/></samlp:Status>",
            "</samlp:Response>"
        );
        let doc = Document::parse(xml).unwrap();
        assert!(validate_response_structure(&doc).is_err());
    }

    #[test]
    fn test_unexpected_child_fails() {
        let doc = Document::parse(&response(&format!("{}<samlp:Bogus/>", STATUS))).unwrap();
        assert!(validate_response_structure(&doc).is_err());
    }

    #[test]
    fn test_assertion_requires_issuer() {
        let body = format!(
            "{}<saml:Assertion ID=\"_a\" Version=\"2.0\" IssueInstant=\"2024-06-01T00:00:00Z\"/>",
            STATUS
        );
        let doc = Document::parse(&response(&body)).unwrap();
        assert!(validate_response_structure(&doc).is_err());

        let body = format!(
            concat!(
                "{}<saml:Assertion ID=\"_a\" Version=\"2.0\" ",
                "IssueInstant=\"2024-06-01T00:00:00Z\">",
                "<saml:Issuer>https://idp.example.com</saml:Issuer></saml:Assertion>"
            ),
            STATUS
        );
        let doc = Document::parse(&response(&body)).unwrap();
        assert!(validate_response_structure(&doc).is_ok());
    }

    #[test]
    fn test_nested_status_code_allowed_once() {
        // Nested codes live under the top-level StatusCode, not Status.
        let status = concat!(
            "<samlp:Status><samlp:StatusCode ",
            "Value=\"urn:oasis:names:tc:SAML:2.0:status:Requester\">",
            "<samlp:StatusCode Value=\"urn:oasis:names:tc:SAML:2.0:status:InvalidNameIDPolicy\"/>",
            "</samlp:StatusCode><samlp:StatusMessage>denied</samlp:StatusMessage></samlp:Status>"
        );
        let doc = Document::parse(&response(status)).unwrap();
        assert!(validate_response_structure(&doc).is_ok());
    }
}
