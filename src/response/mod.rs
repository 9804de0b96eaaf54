//! # SAML Response Processing
//!
//! [`SamlResponse`] is built once per IdP callback: the payload is decoded,
//! the document parsed, an `<EncryptedAssertion>` decrypted into a second
//! DOM, and every field the SP consumes extracted eagerly from the signed
//! scope. After construction the value is read-only; validation is
//! idempotent and can run any number of times.
//!
//! Callers must check [`SamlResponse::is_valid`] (or run
//! [`SamlResponse::validate`]) before trusting any accessor.

mod parser;
mod validate;

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;

use crate::crypto::{decrypt_element, EncryptedElementKind};
use crate::error::{SamlError, SamlResult};
use crate::settings::{ResponseOptions, Settings};
use crate::utils::{decode_raw_saml, parse_saml_timestamp};
use crate::xml::{Document, NodeId, NS_ASSERTION, NS_DSIG};

use parser::SignedScope;

/// Status value of a successful Response
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
/// Bearer subject-confirmation method
pub const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
/// SAML version accepted by this toolkit
pub const SAML_VERSION: &str = "2.0";

/// Subject identifier with its qualifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
    pub sp_name_qualifier: Option<String>,
    pub name_qualifier: Option<String>,
}

/// One `<SubjectConfirmation>` with its confirmation data
#[derive(Debug, Clone, Default)]
pub struct SubjectConfirmationData {
    pub method: Option<String>,
    pub in_response_to: Option<String>,
    pub recipient: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Attribute statement contents with single- and multi-value access.
/// Values are `None` where the IdP sent `xsi:nil`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, Vec<Option<String>>)>,
}

impl Attributes {
    /// Append values for a name, merging with an existing entry
    pub(crate) fn add(&mut self, name: String, mut values: Vec<Option<String>>) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => existing.append(&mut values),
            None => self.entries.push((name, values)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// All values for a name; empty when absent
    pub fn multi(&self, name: &str) -> &[Option<String>] {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First non-nil value for a name
    pub fn single(&self, name: &str) -> Option<&str> {
        self.multi(name)
            .iter()
            .find_map(|v| v.as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Option<String>])> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed SAML Response awaiting (or having completed) validation
pub struct SamlResponse {
    settings: Settings,
    options: ResponseOptions,

    raw_payload: String,
    document: Document,
    decrypted_document: Option<Document>,
    assertion_encrypted: bool,

    /// `true` when the signed scope lives in the decrypted document
    scope_on_decrypted: bool,
    signed_element_id: Option<String>,

    response_id: Option<String>,
    in_response_to: Option<String>,
    destination: Option<String>,
    version: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,

    assertion_id: Option<String>,
    name_id: Result<Option<NameId>, String>,
    issuers: Result<Vec<String>, String>,
    audiences: Vec<String>,
    conditions_count: usize,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    authn_statement_count: usize,
    session_index: Option<String>,
    session_expires_at: Option<DateTime<Utc>>,
    subject_confirmations: Vec<SubjectConfirmationData>,
    attributes: Result<Attributes, String>,

    errors: Vec<String>,
}

impl SamlResponse {
    /// Process a payload with default per-response options
    pub fn new(settings: Settings, payload: &str) -> SamlResult<Self> {
        Self::with_options(settings, payload, ResponseOptions::default())
    }

    /// Process a payload as received from the IdP. Decodes, parses, and
    /// decrypts an encrypted assertion when one is present; extraction of
    /// every field happens here so the value is immutable afterwards.
    pub fn with_options(
        settings: Settings,
        payload: &str,
        options: ResponseOptions,
    ) -> SamlResult<Self> {
        if payload.trim().is_empty() {
            return Err(SamlError::MalformedInput("SAML Response is empty".to_string()));
        }

        let xml = decode_raw_saml(payload)?;
        let document = Document::parse(&xml)?;
        let keys = settings.decryption_keys()?;

        let encrypted_node =
            document.find_first(document.root(), NS_ASSERTION, "EncryptedAssertion");
        let assertion_encrypted = encrypted_node.is_some();
        let decrypted_document = match encrypted_node {
            Some(node) => Some(build_decrypted_document(&document, node, &keys)?),
            None => None,
        };

        // Signature placement decides which document carries the signed
        // scope: a Response-level signature is verified on the original
        // document, an Assertion signature on the decrypted one.
        let response_level_signature = !document
            .find_children(document.root(), NS_DSIG, "Signature")
            .is_empty();
        let scope_on_decrypted = decrypted_document.is_some() && !response_level_signature;
        let scope_doc = if scope_on_decrypted {
            decrypted_document.as_ref().unwrap()
        } else {
            &document
        };
        let signed_element_id = compute_signed_element_id(scope_doc);

        let scope = SignedScope {
            doc: scope_doc,
            id: signed_element_id.as_deref(),
        };

        let root = document.root();
        let attr = |name: &str| document.attr(root, name).map(|s| s.to_string());
        let (status_code, status_message) = parser::extract_status(&document);

        let conditions = scope.all(&[(NS_ASSERTION, "Conditions")]);
        let first_conditions = conditions.first().copied();
        let authn_statements = scope.all(&[(NS_ASSERTION, "AuthnStatement")]);
        let first_authn = authn_statements.first().copied();

        let response = Self {
            response_id: attr("ID"),
            in_response_to: attr("InResponseTo"),
            destination: attr("Destination"),
            version: attr("Version"),
            status_code,
            status_message,

            assertion_id: scope
                .assertions()
                .first()
                .and_then(|&a| scope.doc.attr(a, "ID"))
                .map(|s| s.to_string()),
            name_id: parser::extract_name_id(&scope, &keys),
            issuers: parser::extract_issuers(&document, &scope),
            audiences: parser::extract_audiences(&scope),
            conditions_count: conditions.len(),
            not_before: first_conditions
                .and_then(|c| scope.doc.attr(c, "NotBefore"))
                .and_then(parse_saml_timestamp),
            not_on_or_after: first_conditions
                .and_then(|c| scope.doc.attr(c, "NotOnOrAfter"))
                .and_then(parse_saml_timestamp),
            authn_statement_count: authn_statements.len(),
            session_index: first_authn
                .and_then(|a| scope.doc.attr(a, "SessionIndex"))
                .map(|s| s.to_string()),
            session_expires_at: first_authn
                .and_then(|a| scope.doc.attr(a, "SessionNotOnOrAfter"))
                .and_then(parse_saml_timestamp),
            subject_confirmations: parser::extract_subject_confirmations(&scope),
            attributes: parser::extract_attributes(
                &scope,
                &keys,
                options.check_duplicated_attributes,
            ),

            signed_element_id,
            scope_on_decrypted,
            settings,
            options,
            raw_payload: payload.to_string(),
            document,
            decrypted_document,
            assertion_encrypted,
            errors: Vec::new(),
        };
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    /// Subject NameID value
    pub fn name_id(&self) -> Option<&str> {
        self.name_id_parts().map(|n| n.value.as_str())
    }

    pub fn name_id_format(&self) -> Option<&str> {
        self.name_id_parts().and_then(|n| n.format.as_deref())
    }

    pub fn name_id_spnamequalifier(&self) -> Option<&str> {
        self.name_id_parts()
            .and_then(|n| n.sp_name_qualifier.as_deref())
    }

    pub fn name_id_namequalifier(&self) -> Option<&str> {
        self.name_id_parts()
            .and_then(|n| n.name_qualifier.as_deref())
    }

    fn name_id_parts(&self) -> Option<&NameId> {
        self.name_id.as_ref().ok().and_then(|n| n.as_ref())
    }

    /// SessionIndex of the AuthnStatement
    pub fn sessionindex(&self) -> Option<&str> {
        self.session_index.as_deref()
    }

    /// SessionNotOnOrAfter of the AuthnStatement
    pub fn session_expires_at(&self) -> Option<DateTime<Utc>> {
        self.session_expires_at
    }

    /// Attributes of the trusted assertion; `None` when extraction failed
    /// (for example, an EncryptedAttribute no configured key decrypts)
    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref().ok()
    }

    pub fn status_code(&self) -> Option<&str> {
        self.status_code.as_deref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// `true` when the Response status is Success
    pub fn success(&self) -> bool {
        self.status_code.as_deref() == Some(STATUS_SUCCESS)
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.not_on_or_after
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Deduplicated Response and Assertion issuers; empty when issuer
    /// extraction failed
    pub fn issuers(&self) -> &[String] {
        self.issuers.as_ref().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn in_response_to(&self) -> Option<&str> {
        self.in_response_to.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    /// Version attribute of the Response
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn assertion_id(&self) -> Option<&str> {
        self.assertion_id.as_deref()
    }

    /// `true` when the Response carried an `<EncryptedAssertion>`
    pub fn assertion_encrypted(&self) -> bool {
        self.assertion_encrypted
    }

    /// The original document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The decrypted document, when an encrypted assertion was present
    pub fn decrypted_document(&self) -> Option<&Document> {
        self.decrypted_document.as_ref()
    }

    /// Errors collected by the last `is_valid` call
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub(crate) fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn options(&self) -> &ResponseOptions {
        &self.options
    }

    /// The document holding the signed scope
    pub(crate) fn scope_document(&self) -> &Document {
        if self.scope_on_decrypted {
            self.decrypted_document.as_ref().unwrap_or(&self.document)
        } else {
            &self.document
        }
    }

    pub(crate) fn signed_element_id(&self) -> Option<&str> {
        self.signed_element_id.as_deref()
    }

    pub(crate) fn name_id_result(&self) -> &Result<Option<NameId>, String> {
        &self.name_id
    }

    pub(crate) fn issuers_result(&self) -> &Result<Vec<String>, String> {
        &self.issuers
    }

    pub(crate) fn attributes_result(&self) -> &Result<Attributes, String> {
        &self.attributes
    }

    pub(crate) fn conditions_count(&self) -> usize {
        self.conditions_count
    }

    pub(crate) fn authn_statement_count(&self) -> usize {
        self.authn_statement_count
    }

    pub(crate) fn subject_confirmations(&self) -> &[SubjectConfirmationData] {
        &self.subject_confirmations
    }

    pub(crate) fn set_errors(&mut self, errors: Vec<String>) {
        self.errors = errors;
    }
}

/// Deep-copy the original document, graft the decrypted assertion under the
/// Response, and drop the encrypted node
fn build_decrypted_document(
    original: &Document,
    encrypted: NodeId,
    keys: &[RsaPrivateKey],
) -> SamlResult<Document> {
    let mut doc = original.clone();
    let (fragment, element) =
        decrypt_element(&doc, encrypted, keys, EncryptedElementKind::Assertion)?;

    let bindings = fragment.in_scope_namespaces(element);
    let imported = doc.import_subtree(&fragment, element);
    doc.append_child(doc.root(), imported);
    doc.detach(encrypted);

    // Restore prefix bindings the fragment inherited from its wrapper.
    for (prefix, uri) in bindings {
        if doc.resolve_prefix(imported, prefix.as_deref()).as_deref() != Some(uri.as_str()) {
            doc.push_namespace_decl(imported, prefix.as_deref(), &uri);
        }
    }
    Ok(doc)
}

/// The ID of the element covered by the first signature: its Reference URI
/// without the leading `#`, falling back to the parent's own ID
fn compute_signed_element_id(doc: &Document) -> Option<String> {
    let signature = doc.find_first(doc.root(), NS_DSIG, "Signature")?;
    let from_reference = doc
        .find_first(signature, NS_DSIG, "Reference")
        .and_then(|r| doc.attr(r, "URI"))
        .and_then(|uri| uri.strip_prefix('#'))
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string());
    from_reference.or_else(|| {
        doc.parent(signature)
            .and_then(|p| doc.attr(p, "ID"))
            .map(|id| id.to_string())
    })
}
