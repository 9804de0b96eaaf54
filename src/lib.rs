//! # PALISADE - Enterprise SAML 2.0 Service Provider Toolkit
//!
//! A Service Provider-side SAML 2.0 implementation centered on Response
//! validation: XML-DSig verification, XML-Encryption decryption, and the
//! full battery of SAML profile checks, plus the outgoing AuthnRequest and
//! SP metadata an SP needs to integrate with an Identity Provider.
//!
//! ## Architecture
//!
//! - `xml`: owned DOM and canonicalization (exclusive/inclusive C14N)
//! - `crypto`: signature verification, decryption, trust anchors
//! - `response`: the Response processor and validation engine
//! - `settings`: SP configuration and per-response options
//! - `schema`: structural validation of the protocol shape
//! - `authn_request` / `metadata`: outgoing SP surface
//!
//! ## Usage
//!
//! ```rust,ignore
//! use palisade::{SamlResponse, Settings};
//!
//! let settings = Settings {
//!     sp_entity_id: "https://sp.example.com".into(),
//!     assertion_consumer_service_url: Some("https://sp.example.com/acs".into()),
//!     idp_cert: Some(idp_certificate_pem),
//!     ..Settings::default()
//! };
//! let mut response = SamlResponse::new(settings, &saml_response_param)?;
//! if response.is_valid(true) {
//!     let subject = response.name_id();
//! } else {
//!     let reasons = response.errors();
//! }
//! ```

// XML infrastructure - DOM and canonicalization
pub mod xml;

// Cryptographic verification and decryption
pub mod crypto;

// Error types
pub mod error;

// SP configuration
pub mod settings;

// Structural validation
pub mod schema;

// Decoding and comparison utilities
pub mod utils;

// Response processing and validation
pub mod response;

// Outgoing AuthnRequest
pub mod authn_request;

// SP metadata generation
pub mod metadata;

// Re-export commonly used types
pub use authn_request::AuthnRequest;
pub use crypto::{FingerprintAlgorithm, IdpCertificate};
pub use error::{SamlError, SamlResult};
pub use metadata::sp_metadata_xml;
pub use response::{Attributes, NameId, SamlResponse, SubjectConfirmationData};
pub use settings::{IdpCertRotation, NameIdFormat, ResponseOptions, SecurityFlags, Settings};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
