//! # Outgoing AuthnRequest
//!
//! Builds the SP-initiated authentication request for the HTTP-POST and
//! HTTP-Redirect bindings. Requests are never signed; signature creation is
//! outside this toolkit's surface.

use std::io::Write;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::error::{SamlError, SamlResult};
use crate::settings::{NameIdFormat, Settings};
use crate::utils::format_saml_timestamp;
use crate::xml::dom::escape_attr;

/// SAML Authentication Request
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
    pub issuer: String,
    pub name_id_format: NameIdFormat,
    pub force_authn: bool,
    pub is_passive: bool,
}

impl AuthnRequest {
    /// Generate a new AuthnRequest from the SP settings
    pub fn new(settings: &Settings) -> Self {
        Self {
            id: format!("_{}", Uuid::new_v4()),
            issue_instant: Utc::now(),
            destination: settings.idp_sso_url.clone(),
            assertion_consumer_service_url: settings.assertion_consumer_service_url.clone(),
            issuer: settings.sp_entity_id.clone(),
            name_id_format: settings.sp_name_id_format,
            force_authn: false,
            is_passive: false,
        }
    }

    /// Require the IdP to re-authenticate the user
    pub fn force_authn(mut self) -> Self {
        self.force_authn = true;
        self
    }

    /// Forbid visible IdP interaction
    pub fn passive(mut self) -> Self {
        self.is_passive = true;
        self
    }

    pub fn name_id_format(mut self, format: NameIdFormat) -> Self {
        self.name_id_format = format;
        self
    }

    /// Render the request XML
    pub fn to_xml(&self) -> String {
        let mut optional_attrs = String::new();
        if let Some(destination) = &self.destination {
            optional_attrs.push_str(&format!(" Destination=\"{}\"", escape_attr(destination)));
        }
        if let Some(acs_url) = &self.assertion_consumer_service_url {
            optional_attrs.push_str(&format!(
                " AssertionConsumerServiceURL=\"{}\"",
                escape_attr(acs_url)
            ));
        }

        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}"{optional} ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" ForceAuthn="{force}" IsPassive="{passive}"><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="{format}" AllowCreate="true"/></samlp:AuthnRequest>"#,
            id = self.id,
            instant = format_saml_timestamp(self.issue_instant),
            optional = optional_attrs,
            force = self.force_authn,
            passive = self.is_passive,
            issuer = crate::xml::dom::escape_text(&self.issuer),
            format = self.name_id_format.as_str(),
        )
    }

    /// Base64 encoding for the HTTP-POST binding
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_xml())
    }

    /// Deflate-then-base64 encoding for the HTTP-Redirect binding
    pub fn to_deflated_base64(&self) -> SamlResult<String> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(self.to_xml().as_bytes())
            .map_err(|e| SamlError::MalformedInput(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| SamlError::MalformedInput(e.to_string()))?;
        Ok(BASE64.encode(compressed))
    }

    /// Full redirect URL to the IdP SSO endpoint
    pub fn redirect_url(&self, relay_state: Option<&str>) -> SamlResult<String> {
        let sso_url = self.destination.as_deref().ok_or_else(|| {
            SamlError::InvalidConfig("idp_sso_url is required for the redirect binding".to_string())
        })?;

        let request = self.to_deflated_base64()?;
        let separator = if sso_url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}SAMLRequest={}",
            sso_url,
            separator,
            urlencoding::encode(&request)
        );
        if let Some(state) = relay_state {
            url.push_str(&format!("&RelayState={}", urlencoding::encode(state)));
        }
        Ok(url)
    }
}
