#![allow(dead_code)]

//! Shared fixtures for the Response validation tests.
//!
//! Builds well-formed SAML Responses at test runtime and signs/encrypts
//! them with the same primitive crates the library verifies with. Key
//! material is generated per test via `rsa` and wrapped into self-signed
//! certificates via `rcgen`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rsa::pkcs8::EncodePrivateKey;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use palisade::xml::{canonicalize, C14nMode, Document};

pub const IDP_ENTITY_ID: &str = "https://idp.example.com/metadata";
pub const SP_ENTITY_ID: &str = "https://sp.example.com/metadata";
pub const ACS_URL: &str = "https://sp.example.com/acs";

/// IdP-side key material: the signing key and its self-signed certificate
pub struct IdpKeys {
    pub private_key: RsaPrivateKey,
    pub cert_pem: String,
}

pub fn generate_idp_keys() -> IdpKeys {
    generate_idp_keys_with_validity(None)
}

/// `not_after` in the past produces an expired certificate
pub fn generate_idp_keys_with_validity(not_after: Option<(i32, u8, u8)>) -> IdpKeys {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let pkcs8 = private_key
        .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();

    let key_pair =
        rcgen::KeyPair::from_pem_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256).unwrap();
    let mut params = rcgen::CertificateParams::new(vec!["idp.example.com".to_string()]).unwrap();
    if let Some((year, month, day)) = not_after {
        params.not_after = rcgen::date_time_ymd(year, month, day);
    }
    let cert = params.self_signed(&key_pair).unwrap();

    IdpKeys {
        private_key,
        cert_pem: cert.pem(),
    }
}

/// SP-side decryption key pair
pub struct SpKeys {
    pub private_key_pem: String,
    pub public_key: RsaPublicKey,
}

pub fn generate_sp_keys() -> SpKeys {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    SpKeys {
        public_key: private_key.to_public_key(),
        private_key_pem: private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string(),
    }
}

/// Where the `%SIGNATURE%` placeholder lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    AssertionSigned,
    ResponseSigned,
    Unsigned,
}

/// Knobs for the Response template. Defaults form a valid response for
/// settings built by `base_settings`.
pub struct ResponseFixture {
    pub response_id: String,
    pub assertion_id: String,
    pub issuer: String,
    pub destination: Option<String>,
    pub in_response_to: Option<String>,
    pub status_code: String,
    pub status_message: Option<String>,
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub sp_name_qualifier: Option<String>,
    /// Raw XML used in place of the NameID element (empty string omits it)
    pub name_id_xml_override: Option<String>,
    pub audience: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub session_index: String,
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    pub recipient: Option<String>,
    pub confirmation_not_on_or_after: DateTime<Utc>,
    pub attributes: Vec<(String, Vec<String>)>,
    /// Raw XML appended inside the AttributeStatement
    pub extra_attribute_xml: String,
}

impl Default for ResponseFixture {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            response_id: "_resp-f3a1".to_string(),
            assertion_id: "_assert-9b2c".to_string(),
            issuer: IDP_ENTITY_ID.to_string(),
            destination: Some(ACS_URL.to_string()),
            in_response_to: None,
            status_code: "urn:oasis:names:tc:SAML:2.0:status:Success".to_string(),
            status_message: None,
            name_id: "user@example.com".to_string(),
            name_id_format: Some("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress".to_string()),
            sp_name_qualifier: None,
            name_id_xml_override: None,
            audience: Some(SP_ENTITY_ID.to_string()),
            not_before: now - Duration::minutes(5),
            not_on_or_after: now + Duration::minutes(5),
            session_index: "_session-77".to_string(),
            session_not_on_or_after: Some(now + Duration::hours(8)),
            recipient: Some(ACS_URL.to_string()),
            confirmation_not_on_or_after: now + Duration::minutes(5),
            attributes: vec![
                ("uid".to_string(), vec!["jdoe".to_string()]),
                (
                    "groups".to_string(),
                    vec!["admin".to_string(), "staff".to_string()],
                ),
            ],
            extra_attribute_xml: String::new(),
        }
    }
}

impl ResponseFixture {
    fn timestamp(value: DateTime<Utc>) -> String {
        value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// The standalone Assertion template, self-contained namespace-wise so
    /// it can be signed and encrypted independently of the Response.
    pub fn assertion_template(&self) -> String {
        let now = Self::timestamp(Utc::now());

        let name_id_xml = match &self.name_id_xml_override {
            Some(xml) => xml.clone(),
            None => format!(
                "<saml:NameID{}{}>{}</saml:NameID>",
                self.name_id_format
                    .as_deref()
                    .map(|f| format!(" Format=\"{}\"", f))
                    .unwrap_or_default(),
                self.sp_name_qualifier
                    .as_deref()
                    .map(|q| format!(" SPNameQualifier=\"{}\"", q))
                    .unwrap_or_default(),
                self.name_id,
            ),
        };
        let confirmation_data_attrs = format!(
            "{}{} NotOnOrAfter=\"{}\"",
            self.in_response_to
                .as_deref()
                .map(|v| format!(" InResponseTo=\"{}\"", v))
                .unwrap_or_default(),
            self.recipient
                .as_deref()
                .map(|v| format!(" Recipient=\"{}\"", v))
                .unwrap_or_default(),
            Self::timestamp(self.confirmation_not_on_or_after),
        );
        let audience_restriction = self
            .audience
            .as_deref()
            .map(|a| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction>",
                    a
                )
            })
            .unwrap_or_default();
        let session_attr = self
            .session_not_on_or_after
            .map(|v| format!(" SessionNotOnOrAfter=\"{}\"", Self::timestamp(v)))
            .unwrap_or_default();

        let mut attribute_statement = String::new();
        if !self.attributes.is_empty() || !self.extra_attribute_xml.is_empty() {
            attribute_statement.push_str("<saml:AttributeStatement>");
            for (name, values) in &self.attributes {
                attribute_statement.push_str(&format!("<saml:Attribute Name=\"{}\">", name));
                for value in values {
                    attribute_statement.push_str(&format!(
                        "<saml:AttributeValue>{}</saml:AttributeValue>",
                        value
                    ));
                }
                attribute_statement.push_str("</saml:Attribute>");
            }
            attribute_statement.push_str(&self.extra_attribute_xml);
            attribute_statement.push_str("</saml:AttributeStatement>");
        }

        format!(
            concat!(
                "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{now}\">",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "%SIGNATURE%",
                "<saml:Subject>",
                "{name_id_xml}",
                "<saml:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\">",
                "<saml:SubjectConfirmationData{confirmation_data_attrs}/>",
                "</saml:SubjectConfirmation>",
                "</saml:Subject>",
                "<saml:Conditions NotBefore=\"{not_before}\" NotOnOrAfter=\"{not_on_or_after}\">",
                "{audience_restriction}",
                "</saml:Conditions>",
                "<saml:AuthnStatement AuthnInstant=\"{now}\" SessionIndex=\"{session_index}\"{session_attr}>",
                "<saml:AuthnContext><saml:AuthnContextClassRef>",
                "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport",
                "</saml:AuthnContextClassRef></saml:AuthnContext>",
                "</saml:AuthnStatement>",
                "{attribute_statement}",
                "</saml:Assertion>",
            ),
            id = self.assertion_id,
            now = now,
            issuer = self.issuer,
            name_id_xml = name_id_xml,
            confirmation_data_attrs = confirmation_data_attrs,
            not_before = Self::timestamp(self.not_before),
            not_on_or_after = Self::timestamp(self.not_on_or_after),
            audience_restriction = audience_restriction,
            session_index = self.session_index,
            session_attr = session_attr,
            attribute_statement = attribute_statement,
        )
    }

    /// The full Response template with `%SIGNATURE%` at the requested
    /// placement (the other placeholder is removed).
    pub fn response_template(&self, placement: Placement) -> String {
        let assertion = self.assertion_template();
        let assertion = match placement {
            Placement::AssertionSigned => assertion,
            _ => assertion.replace("%SIGNATURE%", ""),
        };
        let body = self.response_shell(&assertion, placement);
        match placement {
            Placement::Unsigned => body.replace("%SIGNATURE%", ""),
            _ => body,
        }
    }

    /// A Response whose assertion body is replaced by pre-built XML (used
    /// for encrypted assertions).
    pub fn response_shell(&self, assertion_xml: &str, placement: Placement) -> String {
        let response_placeholder = match placement {
            Placement::ResponseSigned => "%SIGNATURE%",
            _ => "",
        };
        let status_message = self
            .status_message
            .as_deref()
            .map(|m| format!("<samlp:StatusMessage>{}</samlp:StatusMessage>", m))
            .unwrap_or_default();

        format!(
            concat!(
                "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"{id}\" Version=\"2.0\" IssueInstant=\"{now}\"{destination}{in_response_to}>",
                "<saml:Issuer>{issuer}</saml:Issuer>",
                "{response_placeholder}",
                "<samlp:Status><samlp:StatusCode Value=\"{status_code}\"/>{status_message}</samlp:Status>",
                "{assertion}",
                "</samlp:Response>",
            ),
            id = self.response_id,
            now = Self::timestamp(Utc::now()),
            destination = self
                .destination
                .as_deref()
                .map(|d| format!(" Destination=\"{}\"", d))
                .unwrap_or_default(),
            in_response_to = self
                .in_response_to
                .as_deref()
                .map(|v| format!(" InResponseTo=\"{}\"", v))
                .unwrap_or_default(),
            issuer = self.issuer,
            response_placeholder = response_placeholder,
            status_code = self.status_code,
            status_message = status_message,
            assertion = assertion_xml,
        )
    }
}

/// Sign the element with `signed_id` inside `template`, replacing the
/// `%SIGNATURE%` placeholder with an enveloped RSA-SHA256 signature.
pub fn sign_document(
    template: &str,
    signed_id: &str,
    key: &RsaPrivateKey,
    cert_pem: &str,
) -> String {
    let unsigned = template.replace("%SIGNATURE%", "");
    let doc = Document::parse(&unsigned).unwrap();
    let target = doc
        .element_by_id(doc.root(), signed_id)
        .expect("signed element not found in template");
    let canonical = canonicalize(&doc, target, &C14nMode::exclusive(), None);
    let digest_value = BASE64.encode(Sha256::digest(canonical.as_bytes()));

    let signed_info = format!(
        concat!(
            "<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
            "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"/>",
            "<ds:Reference URI=\"#{id}\">",
            "<ds:Transforms>",
            "<ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>",
            "<ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
            "</ds:Transforms>",
            "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>",
            "<ds:DigestValue>{digest}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>",
        ),
        id = signed_id,
        digest = digest_value,
    );

    let signed_info_doc = Document::parse(&signed_info).unwrap();
    let signed_info_canonical = canonicalize(
        &signed_info_doc,
        signed_info_doc.root(),
        &C14nMode::exclusive(),
        None,
    );
    let signature_value = key
        .sign(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(signed_info_canonical.as_bytes()),
        )
        .unwrap();

    let signature_xml = format!(
        concat!(
            "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "{signed_info}",
            "<ds:SignatureValue>{value}</ds:SignatureValue>",
            "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
            "</ds:Signature>",
        ),
        signed_info = signed_info,
        value = BASE64.encode(signature_value),
        cert = pem_body(cert_pem),
    );
    template.replace("%SIGNATURE%", &signature_xml)
}

/// Strip PEM armor, leaving the base64 body
pub fn pem_body(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.contains("-----"))
        .collect::<Vec<_>>()
        .join("")
}

/// Encrypt an element's XML with AES-256-GCM under a fresh content key,
/// wrapping the key for the SP with RSA-OAEP.
pub fn encrypt_element_xml(
    element_local: &str,
    plaintext_xml: &str,
    sp_public: &RsaPublicKey,
) -> String {
    let mut rng = rand::thread_rng();
    let mut content_key = [0u8; 32];
    rng.fill_bytes(&mut content_key);
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let sealed = Aes256Gcm::new_from_slice(&content_key)
        .unwrap()
        .encrypt(
            aes_gcm::Nonce::from_slice(&nonce),
            plaintext_xml.as_bytes(),
        )
        .unwrap();
    let mut payload = nonce.to_vec();
    payload.extend(sealed);

    let wrapped_key = sp_public
        .encrypt(&mut rng, Oaep::new::<Sha1>(), &content_key)
        .unwrap();

    format!(
        concat!(
            "<saml:Encrypted{local} xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\">",
            "<xenc:EncryptedData xmlns:xenc=\"http://www.w3.org/2001/04/xmlenc#\">",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2009/xmlenc11#aes256-gcm\"/>",
            "<ds:KeyInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "<xenc:EncryptedKey>",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p\"/>",
            "<xenc:CipherData><xenc:CipherValue>{key}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedKey>",
            "</ds:KeyInfo>",
            "<xenc:CipherData><xenc:CipherValue>{data}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedData>",
            "</saml:Encrypted{local}>",
        ),
        local = element_local,
        key = BASE64.encode(wrapped_key),
        data = BASE64.encode(payload),
    )
}

/// CBC variant of [`encrypt_element_xml`], exercising the padded path
pub fn encrypt_element_xml_cbc(
    element_local: &str,
    plaintext_xml: &str,
    sp_public: &RsaPublicKey,
) -> String {
    use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    let mut rng = rand::thread_rng();
    let mut content_key = [0u8; 16];
    rng.fill_bytes(&mut content_key);
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut iv);

    let mut padded = plaintext_xml.as_bytes().to_vec();
    let pad = 16 - (padded.len() % 16);
    padded.extend(std::iter::repeat(pad as u8).take(pad));
    let encrypted = Aes128CbcEnc::new_from_slices(&content_key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<NoPadding>(&padded);
    let mut payload = iv.to_vec();
    payload.extend(encrypted);

    let wrapped_key = sp_public
        .encrypt(&mut rng, Oaep::new::<Sha1>(), &content_key)
        .unwrap();

    format!(
        concat!(
            "<saml:Encrypted{local} xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\">",
            "<xenc:EncryptedData xmlns:xenc=\"http://www.w3.org/2001/04/xmlenc#\">",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#aes128-cbc\"/>",
            "<ds:KeyInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "<xenc:EncryptedKey>",
            "<xenc:EncryptionMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p\"/>",
            "<xenc:CipherData><xenc:CipherValue>{key}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedKey>",
            "</ds:KeyInfo>",
            "<xenc:CipherData><xenc:CipherValue>{data}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedData>",
            "</saml:Encrypted{local}>",
        ),
        local = element_local,
        key = BASE64.encode(wrapped_key),
        data = BASE64.encode(payload),
    )
}

/// Settings matching the fixture defaults, trusting the given certificate
pub fn base_settings(idp: &IdpKeys) -> palisade::Settings {
    palisade::Settings {
        sp_entity_id: SP_ENTITY_ID.to_string(),
        assertion_consumer_service_url: Some(ACS_URL.to_string()),
        idp_entity_id: Some(IDP_ENTITY_ID.to_string()),
        idp_cert: Some(idp.cert_pem.clone()),
        ..palisade::Settings::default()
    }
}

pub fn encode_response(xml: &str) -> String {
    BASE64.encode(xml)
}
