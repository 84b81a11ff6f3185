//! Short-lived bearer tokens issued after SAML login.

pub mod config;
pub mod issuer;

pub use config::TokenConfig;
pub use issuer::{AuthToken, TokenClaims, TokenIssuer};
