//! SAML Service Provider implementation.
//!
//! Handles the SP-initiated half of the SSO flow: building the AuthnRequest
//! and remembering it until the IdP answers.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use quick_xml::escape::escape;
use std::sync::Arc;
use tracing::debug;

use super::config::SamlConfig;
use super::requests::{PendingRequest, PendingRequests};

/// Redirect to the IdP for a freshly issued AuthnRequest.
#[derive(Debug, Clone)]
pub struct AuthnRedirect {
    /// Full IdP URL including `SAMLRequest` and `RelayState`.
    pub url: String,
    /// AuthnRequest ID.
    pub request_id: String,
    /// Correlation value round-tripped through the IdP.
    pub relay_state: String,
}

/// SAML Service Provider that starts authentications.
pub struct SamlProvider {
    /// SP configuration.
    config: SamlConfig,
    /// Requests waiting for an IdP response.
    pending: Arc<PendingRequests>,
}

impl SamlProvider {
    /// Create a new SAML provider with the given configuration.
    pub fn new(config: SamlConfig) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;

        let pending = Arc::new(PendingRequests::new(config.request_ttl_secs));
        Ok(Self { config, pending })
    }

    pub fn config(&self) -> &SamlConfig {
        &self.config
    }

    /// Shared handle to the pending request tracker (for the cleanup task).
    pub fn pending_requests(&self) -> Arc<PendingRequests> {
        Arc::clone(&self.pending)
    }

    /// Create an AuthnRequest, record it, and return the redirect to the IdP.
    pub fn create_authn_request(&self, return_to: Option<&str>) -> Result<AuthnRedirect> {
        let config = &self.config;

        let request_id = format!("_id{}", uuid::Uuid::new_v4().simple());
        let relay_state = hex::encode(rand::random::<[u8; 16]>());
        let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let name_id_policy = config
            .name_id_format
            .as_deref()
            .map(|format| {
                format!(
                    r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                    escape(format)
                )
            })
            .unwrap_or_default();

        let authn_request = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{}" Version="2.0" IssueInstant="{}" Destination="{}" ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" AssertionConsumerServiceURL="{}"><saml:Issuer>{}</saml:Issuer>{}</samlp:AuthnRequest>"#,
            request_id,
            issue_instant,
            escape(config.idp_sso_url.as_str()),
            escape(config.acs_url.as_str()),
            escape(config.entity_id.as_str()),
            name_id_policy
        );

        // Deflate and base64 encode
        let encoded = deflate_and_encode(&authn_request)?;

        let separator = if config.idp_sso_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}SAMLRequest={}&RelayState={}",
            config.idp_sso_url,
            separator,
            urlencoding::encode(&encoded),
            urlencoding::encode(&relay_state)
        );

        let return_to = sanitize_return_to(return_to, &config.default_return_to);
        self.pending
            .insert(relay_state.clone(), request_id.clone(), return_to)?;

        debug!(request_id = %request_id, "Created SAML AuthnRequest redirect");

        Ok(AuthnRedirect {
            url,
            request_id,
            relay_state,
        })
    }

    /// Resolve a RelayState back to the request it belongs to. Single use.
    pub fn take_pending(&self, relay_state: &str) -> Result<Option<PendingRequest>> {
        self.pending.take(relay_state)
    }
}

/// Only local absolute paths are acceptable return targets.
fn sanitize_return_to(requested: Option<&str>, default: &str) -> String {
    match requested {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(|c| c.is_control()) =>
        {
            path.to_string()
        }
        _ => default.to_string(),
    }
}

/// Deflate and base64 encode for SAML redirect binding.
fn deflate_and_encode(xml: &str) -> Result<String> {
    use std::io::Write;

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}
