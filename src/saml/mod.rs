//! SAML authentication module.
//!
//! Provides SP-initiated SSO: AuthnRequest creation, request correlation and
//! signed assertion validation.

pub mod certificate;
pub mod config;
pub mod provider;
pub mod requests;
pub mod validator;

pub use config::SamlConfig;
pub use provider::{AuthnRedirect, SamlProvider};
pub use requests::{PendingRequest, PendingRequests};
pub use validator::{AssertionValidator, IdentityAssertion, SamaelValidator, ValidationOutcome};
