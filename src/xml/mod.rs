//! # XML Infrastructure
//!
//! A small owned DOM tailored to SAML processing plus the canonicalization
//! routines XML-DSig needs. The DOM keeps namespace declarations and
//! attribute order exactly as parsed so that canonical forms are stable
//! across parse/serialize round trips.

pub mod c14n;
pub mod dom;

pub use c14n::{canonicalize, C14nMode};
pub use dom::{Attribute, Document, Element, NodeId, NodeKind, XmlError};

/// SAML 2.0 assertion namespace
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// SAML 2.0 protocol namespace
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 metadata namespace
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
/// XML digital signature namespace
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML encryption namespace
pub const NS_XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
/// XML Schema instance namespace
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// The reserved `xml` prefix namespace
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";
