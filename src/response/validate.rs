//! # Response Validation Engine
//!
//! The ordered battery of profile validations run against a parsed
//! [`SamlResponse`]. Every predicate produces a fixed human-readable
//! message; in collect mode all predicates run and failures accumulate, in
//! short-circuit mode the first failure ends the run. Both modes share one
//! implementation, so the verdict is identical either way.

use chrono::{DateTime, Utc};

use super::{SamlResponse, CM_BEARER, SAML_VERSION};
use crate::crypto::{verify_signature, DsigError, TrustAnchor};
use crate::error::{SamlError, SamlResult};
use crate::schema::validate_response_structure;
use crate::utils::{format_saml_timestamp, uris_match};
use crate::xml::{Document, NS_ASSERTION, NS_DSIG, NS_PROTOCOL};

type Check = (&'static str, fn(&SamlResponse, DateTime<Utc>) -> Result<(), String>);

/// Validation order is part of the contract: structural gates run before
/// profile predicates, the signature check runs last.
const CHECKS: &[Check] = &[
    ("response_state", SamlResponse::validate_response_state),
    ("version", SamlResponse::validate_version),
    ("id", SamlResponse::validate_id),
    ("success_status", SamlResponse::validate_success_status),
    ("num_assertion", SamlResponse::validate_num_assertion),
    ("no_duplicated_attributes", SamlResponse::validate_no_duplicated_attributes),
    ("signed_elements", SamlResponse::validate_signed_elements),
    ("structure", SamlResponse::validate_structure),
    ("in_response_to", SamlResponse::validate_in_response_to),
    ("one_conditions", SamlResponse::validate_one_conditions),
    ("conditions", SamlResponse::validate_conditions),
    ("one_authnstatement", SamlResponse::validate_one_authnstatement),
    ("audience", SamlResponse::validate_audience),
    ("destination", SamlResponse::validate_destination),
    ("issuer", SamlResponse::validate_issuer),
    ("session_expiration", SamlResponse::validate_session_expiration),
    ("subject_confirmation", SamlResponse::validate_subject_confirmation),
    ("name_id", SamlResponse::validate_name_id),
    ("signature", SamlResponse::validate_signature),
];

impl SamlResponse {
    /// Run the validation sequence. With `collect_errors` every predicate
    /// runs and all failures are retained; otherwise the first failure
    /// aborts. The error list is replaced, never appended, so repeated
    /// calls are idempotent.
    pub fn is_valid(&mut self, collect_errors: bool) -> bool {
        let errors = self.run_validations(collect_errors);
        let valid = errors.is_empty();
        self.set_errors(errors);
        valid
    }

    /// Strict entry point: the first failing predicate is returned as a
    /// [`SamlError::ValidationFailed`]
    pub fn validate(&self) -> SamlResult<()> {
        match self.run_validations(false).into_iter().next() {
            Some(message) => Err(SamlError::ValidationFailed(message)),
            None => Ok(()),
        }
    }

    /// Entry point honoring the settings' `soft` flag: soft mode behaves
    /// like [`SamlResponse::is_valid`], strict mode raises the first
    /// failure
    pub fn check(&mut self, collect_errors: bool) -> SamlResult<bool> {
        if self.settings().soft {
            Ok(self.is_valid(collect_errors))
        } else {
            let errors = self.run_validations(false);
            let first = errors.first().cloned();
            self.set_errors(errors);
            match first {
                Some(message) => Err(SamlError::ValidationFailed(message)),
                None => Ok(true),
            }
        }
    }

    fn run_validations(&self, collect_errors: bool) -> Vec<String> {
        let now = Utc::now();
        let mut errors = Vec::new();
        for (name, check) in CHECKS {
            if let Err(message) = check(self, now) {
                log::debug!("validation {} failed: {}", name, message);
                errors.push(message);
                if !collect_errors {
                    break;
                }
            }
        }
        errors
    }

    // ------------------------------------------------------------------
    // Predicates, in contract order
    // ------------------------------------------------------------------

    fn validate_response_state(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.raw_payload().trim().is_empty() {
            return Err("Blank response".to_string());
        }
        if !self.settings().has_trust_anchor() {
            return Err("No fingerprint or certificate on settings".to_string());
        }
        Ok(())
    }

    fn validate_version(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.version() != Some(SAML_VERSION) {
            return Err("Unsupported SAML version".to_string());
        }
        Ok(())
    }

    fn validate_id(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.response_id().is_none() {
            return Err("Missing ID attribute on SAML Response".to_string());
        }
        Ok(())
    }

    fn validate_success_status(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.success() {
            return Ok(());
        }
        let mut message = "The status code of the Response was not Success".to_string();
        if let Some(code) = self.status_code() {
            message.push_str(&format!(", was {}", code));
        }
        if let Some(status_message) = self.status_message() {
            message.push_str(&format!(" -> {}", status_message));
        }
        Err(message)
    }

    fn validate_num_assertion(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let doc = self.document();
        let root = doc.root();
        let plaintext = doc.find_all(root, NS_ASSERTION, "Assertion").len();
        let encrypted = doc.find_all(root, NS_ASSERTION, "EncryptedAssertion").len();
        if plaintext + encrypted != 1 {
            return Err("SAML Response must contain 1 assertion".to_string());
        }
        if let Some(decrypted) = self.decrypted_document() {
            let count = decrypted
                .find_all(decrypted.root(), NS_ASSERTION, "Assertion")
                .len();
            if count != 1 {
                return Err("SAML Response must contain 1 assertion".to_string());
            }
        }
        Ok(())
    }

    fn validate_no_duplicated_attributes(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if !self.options().check_duplicated_attributes {
            return Ok(());
        }
        match self.attributes_result() {
            Ok(_) => Ok(()),
            Err(message) => Err(message.clone()),
        }
    }

    fn validate_signed_elements(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let doc = self.signed_elements_document();
        let root = doc.root();
        let signatures = doc.find_all(root, NS_DSIG, "Signature");
        if signatures.is_empty() || signatures.len() > 2 {
            return Err(
                "Found an unexpected number of Signature Element. SAML Response rejected"
                    .to_string(),
            );
        }

        let mut seen_ids: Vec<String> = Vec::new();
        let mut seen_uris: Vec<String> = Vec::new();
        let mut assertion_signed = false;
        for &signature in &signatures {
            let Some(parent) = doc.parent(signature) else {
                return Err(
                    "Found an unexpected Signature Element. SAML Response rejected".to_string(),
                );
            };
            let parent_is_response = doc.is_named(parent, NS_PROTOCOL, "Response");
            let parent_is_assertion = doc.is_named(parent, NS_ASSERTION, "Assertion");
            if !parent_is_response && !parent_is_assertion {
                return Err(
                    "Found an unexpected Signature Element. SAML Response rejected".to_string(),
                );
            }
            assertion_signed |= parent_is_assertion;

            let Some(parent_id) = doc.attr(parent, "ID") else {
                return Err("Signed Element must contain an ID. SAML Response rejected".to_string());
            };
            if seen_ids.iter().any(|id| id == parent_id) {
                return Err("Duplicated ID. SAML Response rejected".to_string());
            }
            seen_ids.push(parent_id.to_string());

            let reference_id = doc
                .find_first(signature, NS_DSIG, "Reference")
                .and_then(|r| doc.attr(r, "URI"))
                .and_then(|uri| uri.strip_prefix('#'))
                .filter(|id| !id.is_empty());
            let Some(reference_id) = reference_id else {
                return Err("Found an invalid Signed Element. SAML Response rejected".to_string());
            };
            if reference_id != parent_id {
                return Err("Found an invalid Signed Element. SAML Response rejected".to_string());
            }
            if seen_uris.iter().any(|uri| uri == reference_id) {
                return Err("Duplicated Reference URI. SAML Response rejected".to_string());
            }
            seen_uris.push(reference_id.to_string());
        }

        if self.settings().security.want_assertions_signed && !assertion_signed {
            return Err(
                "The Assertion of the Response is not signed and the SP requires it".to_string(),
            );
        }
        Ok(())
    }

    fn validate_structure(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let mut documents: Vec<&Document> = vec![self.document()];
        if let Some(decrypted) = self.decrypted_document() {
            documents.push(decrypted);
        }
        for doc in documents {
            if let Err(detail) = validate_response_structure(doc) {
                log::debug!("schema violation: {}", detail);
                return Err(
                    "Invalid SAML Response. Not match the saml-schema-protocol-2.0.xsd"
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    fn validate_in_response_to(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let Some(expected) = self.options().matches_request_id.as_deref() else {
            return Ok(());
        };
        if self.in_response_to() != Some(expected) {
            return Err(format!(
                "The InResponseTo of the Response: {}, does not match the ID of the AuthNRequest sent by the SP: {}",
                self.in_response_to().unwrap_or("none"),
                expected
            ));
        }
        Ok(())
    }

    fn validate_one_conditions(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_conditions {
            return Ok(());
        }
        if self.conditions_count() != 1 {
            return Err("The Assertion must include one Conditions element".to_string());
        }
        Ok(())
    }

    fn validate_conditions(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_conditions {
            return Ok(());
        }
        let drift = self.options().drift();
        if let Some(not_before) = self.not_before() {
            if now < not_before - drift {
                return Err(format!(
                    "Current time is earlier than NotBefore condition ({} < {})",
                    format_saml_timestamp(now),
                    format_saml_timestamp(not_before)
                ));
            }
        }
        if let Some(not_on_or_after) = self.not_on_or_after() {
            if now >= not_on_or_after + drift {
                return Err(format!(
                    "Current time is on or after NotOnOrAfter condition ({} >= {})",
                    format_saml_timestamp(now),
                    format_saml_timestamp(not_on_or_after)
                ));
            }
        }
        Ok(())
    }

    fn validate_one_authnstatement(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_authnstatement {
            return Ok(());
        }
        if self.authn_statement_count() != 1 {
            return Err("The Assertion must include one AuthnStatement element".to_string());
        }
        Ok(())
    }

    fn validate_audience(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_audience || self.settings().sp_entity_id.is_empty() {
            return Ok(());
        }
        let audiences = self.audiences();
        if audiences.is_empty() {
            if self.settings().security.strict_audience_validation {
                return Err("Invalid Audiences. The <Audience> value was empty.".to_string());
            }
            return Ok(());
        }
        if !audiences
            .iter()
            .any(|audience| audience == &self.settings().sp_entity_id)
        {
            return Err(format!(
                "Invalid Audiences. The audiences {}, did not match the expected audience {}",
                audiences.join(","),
                self.settings().sp_entity_id
            ));
        }
        Ok(())
    }

    fn validate_destination(&self, _now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_destination {
            return Ok(());
        }
        // A Response without a Destination attribute is accepted as-is.
        let Some(destination) = self.destination() else {
            return Ok(());
        };
        if destination.is_empty() {
            return Err("The response has an empty Destination value".to_string());
        }
        if let Some(acs_url) = self.settings().assertion_consumer_service_url.as_deref() {
            if !uris_match(destination, acs_url) {
                return Err(format!(
                    "The response was received at {} instead of {}",
                    destination, acs_url
                ));
            }
        }
        Ok(())
    }

    fn validate_issuer(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let Some(idp_entity_id) = self.settings().idp_entity_id.as_deref() else {
            return Ok(());
        };
        if idp_entity_id.is_empty() {
            return Ok(());
        }
        let issuers = match self.issuers_result() {
            Ok(issuers) => issuers,
            Err(message) => return Err(message.clone()),
        };
        for issuer in issuers {
            if !uris_match(issuer, idp_entity_id) {
                return Err(format!(
                    "Doesn't match the issuer, expected: <{}>, but was: <{}>",
                    idp_entity_id, issuer
                ));
            }
        }
        Ok(())
    }

    fn validate_session_expiration(&self, now: DateTime<Utc>) -> Result<(), String> {
        let Some(expires_at) = self.session_expires_at() else {
            return Ok(());
        };
        if now >= expires_at + self.options().drift() {
            return Err(
                "The attributes have expired, based on the SessionNotOnOrAfter of the AuthnStatement of the SAML Response"
                    .to_string(),
            );
        }
        Ok(())
    }

    fn validate_subject_confirmation(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.options().skip_subject_confirmation {
            return Ok(());
        }
        let drift = self.options().drift();
        let acs_url = self.settings().assertion_consumer_service_url.as_deref();

        let any_valid = self.subject_confirmations().iter().any(|confirmation| {
            if let Some(method) = confirmation.method.as_deref() {
                if method != CM_BEARER {
                    return false;
                }
            }
            if let Some(in_response_to) = confirmation.in_response_to.as_deref() {
                if Some(in_response_to) != self.in_response_to() {
                    return false;
                }
            }
            if let (Some(recipient), Some(acs_url), false) =
                (confirmation.recipient.as_deref(), acs_url, self.options().skip_recipient_check)
            {
                if !uris_match(recipient, acs_url) {
                    return false;
                }
            }
            if let Some(not_before) = confirmation.not_before {
                if now < not_before - drift {
                    return false;
                }
            }
            if let Some(not_on_or_after) = confirmation.not_on_or_after {
                if now >= not_on_or_after + drift {
                    return false;
                }
            }
            true
        });

        if !any_valid {
            return Err("A valid SubjectConfirmation was not found on this Response".to_string());
        }
        Ok(())
    }

    fn validate_name_id(&self, _now: DateTime<Utc>) -> Result<(), String> {
        let name_id = match self.name_id_result() {
            Ok(name_id) => name_id,
            Err(message) => return Err(message.clone()),
        };
        let Some(name_id) = name_id else {
            if self.settings().security.want_name_id {
                return Err("The NameID element is missing from the SAML Response".to_string());
            }
            return Ok(());
        };
        if name_id.value.trim().is_empty() {
            return Err("The response has an empty NameID value".to_string());
        }
        if let Some(sp_name_qualifier) = name_id.sp_name_qualifier.as_deref() {
            let sp_entity_id = self.settings().sp_entity_id.as_str();
            if !sp_name_qualifier.is_empty()
                && !sp_entity_id.is_empty()
                && sp_name_qualifier != sp_entity_id
            {
                return Err("The SPNameQualifier value mismatch the SP entityID value.".to_string());
            }
        }
        Ok(())
    }

    fn validate_signature(&self, now: DateTime<Utc>) -> Result<(), String> {
        let doc = self.scope_document();
        let root = doc.root();

        let signature = self.signed_element_id().and_then(|id| {
            doc.find_all(root, NS_DSIG, "Signature")
                .into_iter()
                .find(|&s| doc.parent(s).and_then(|p| doc.attr(p, "ID")) == Some(id))
        });
        let Some(signature) = signature else {
            return Err("Invalid Signature on SAML Response".to_string());
        };

        let certificates = self
            .settings()
            .signing_certificates()
            .map_err(|e| e.to_string())?;
        let anchor = if !certificates.is_empty() {
            if certificates.len() == 1 && self.settings().idp_cert_multi.is_none() {
                TrustAnchor::Certificate(&certificates[0])
            } else {
                TrustAnchor::Certificates(&certificates)
            }
        } else if let Some(fingerprint) = self.settings().idp_cert_fingerprint.as_deref() {
            TrustAnchor::Fingerprint {
                value: fingerprint,
                algorithm: self.settings().idp_cert_fingerprint_algorithm,
            }
        } else {
            return Err("No fingerprint or certificate on settings".to_string());
        };

        verify_signature(
            doc,
            signature,
            &anchor,
            self.settings().security.check_idp_cert_expiration,
            now,
        )
        .map(|_| ())
        .map_err(|error| match error {
            DsigError::CertificateExpired => "IdP x509 certificate expired".to_string(),
            other => {
                log::debug!("signature verification failed: {}", other);
                "Invalid Signature on SAML Response".to_string()
            }
        })
    }

    /// Signatures are inspected on the decrypted document when one exists,
    /// since an encrypted assertion's signature only appears there
    fn signed_elements_document(&self) -> &Document {
        self.decrypted_document().unwrap_or_else(|| self.document())
    }
}
