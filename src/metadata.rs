//! # SP Metadata
//!
//! Generates the metadata document an IdP consumes to configure this
//! Service Provider.

use crate::settings::Settings;
use crate::xml::dom::escape_attr;

/// Render the SP EntityDescriptor XML
pub fn sp_metadata_xml(settings: &Settings) -> String {
    let acs = settings
        .assertion_consumer_service_url
        .as_deref()
        .unwrap_or("");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="{want_signed}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{acs_url}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape_attr(&settings.sp_entity_id),
        want_signed = settings.security.want_assertions_signed,
        name_id_format = settings.sp_name_id_format.as_str(),
        acs_url = escape_attr(acs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{Document, NS_METADATA};

    #[test]
    fn test_metadata_shape() {
        let settings = Settings {
            sp_entity_id: "https://sp.example.com".to_string(),
            assertion_consumer_service_url: Some("https://sp.example.com/acs".to_string()),
            ..Settings::default()
        };
        let xml = sp_metadata_xml(&settings);
        let doc = Document::parse(&xml).unwrap();
        let root = doc.root();

        assert!(doc.is_named(root, NS_METADATA, "EntityDescriptor"));
        assert_eq!(doc.attr(root, "entityID"), Some("https://sp.example.com"));

        let acs = doc
            .find_first(root, NS_METADATA, "AssertionConsumerService")
            .unwrap();
        assert_eq!(doc.attr(acs, "Location"), Some("https://sp.example.com/acs"));
        assert_eq!(
            doc.attr(acs, "Binding"),
            Some("urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST")
        );
    }
}
