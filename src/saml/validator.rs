//! SAML response verification.
//!
//! The controller never looks at XML. It hands the encoded response to an
//! [`AssertionValidator`] and gets back one of three outcomes. Only this
//! module can construct an [`IdentityAssertion`], and it does so after the
//! verifier has accepted the response.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use samael::metadata::EntityDescriptor;
use samael::schema::{Assertion, Response};
use samael::service_provider::ServiceProvider;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::certificate;
use super::config::SamlConfig;

/// Identity established by a verified assertion.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityAssertion {
    subject_id: String,
    name_id_format: Option<String>,
    attributes: HashMap<String, Vec<String>>,
    issued_at: DateTime<Utc>,
    assertion_id: String,
    idp_entity_id: String,
    session_index: Option<String>,
}

impl IdentityAssertion {
    /// NameID value (typically an email address).
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn name_id_format(&self) -> Option<&str> {
        self.name_id_format.as_deref()
    }

    /// Attribute name to values, as provided by the IdP.
    pub fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    /// Get a single-valued attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Assertion ID, tracked for replay prevention.
    pub fn assertion_id(&self) -> &str {
        &self.assertion_id
    }

    pub fn idp_entity_id(&self) -> &str {
        &self.idp_entity_id
    }

    /// Session index from the AuthnStatement.
    pub fn session_index(&self) -> Option<&str> {
        self.session_index.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(subject_id: &str, assertion_id: &str) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("email".to_string(), vec![subject_id.to_string()]);
        attributes.insert(
            "groups".to_string(),
            vec!["admin".to_string(), "users".to_string()],
        );
        Self {
            subject_id: subject_id.to_string(),
            name_id_format: Some(super::config::NAME_ID_FORMAT_EMAIL.to_string()),
            attributes,
            issued_at: Utc::now(),
            assertion_id: assertion_id.to_string(),
            idp_entity_id: "https://idp.example".to_string(),
            session_index: Some("_session-1".to_string()),
        }
    }
}

/// Result of verifying one SAML response.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// The response was rejected. The reason is safe to show to clients.
    Error(String),
    /// The response verified but did not identify anyone.
    NoIdentity,
    /// The response verified and identifies a subject.
    Identity(IdentityAssertion),
}

/// Verifies encoded SAML responses.
///
/// Implementations are synchronous; the controller runs them on a blocking
/// thread under a timeout.
pub trait AssertionValidator: Send + Sync {
    /// Verify a base64 `SAMLResponse`.
    ///
    /// `expected_request_id` is the ID of the AuthnRequest this response
    /// must answer; `None` means the response is unsolicited.
    fn validate(&self, saml_response: &str, expected_request_id: Option<&str>) -> ValidationOutcome;
}

/// Validator backed by `samael`.
///
/// Signature verification needs the `xmlsec` feature. Built without it, the
/// validator refuses every response unless unsigned assertions are allowed.
/// Time conditions are checked by samael with the configured clock skew.
pub struct SamaelValidator {
    service_provider: ServiceProvider,
    idp_entity_id: String,
    allow_unsigned_assertions: bool,
}

impl SamaelValidator {
    /// Build a validator for the configured IdP.
    pub fn new(config: &SamlConfig) -> anyhow::Result<Self> {
        let idp_metadata = build_idp_metadata(config)?;

        let service_provider = ServiceProvider {
            entity_id: Some(config.entity_id.clone()),
            acs_url: Some(config.acs_url.clone()),
            idp_metadata,
            allow_idp_initiated: config.allow_unsolicited_responses,
            max_issue_delay: Duration::seconds(config.max_issue_delay_secs),
            max_clock_skew: Duration::seconds(config.clock_skew_secs),
            ..ServiceProvider::default()
        };

        if config.allow_unsigned_assertions {
            warn!("Unsigned SAML assertions are accepted; do not run this configuration in production");
        }

        Ok(Self {
            service_provider,
            idp_entity_id: config.idp_entity_id().to_string(),
            allow_unsigned_assertions: config.allow_unsigned_assertions,
        })
    }

    fn signatures_verifiable(&self) -> bool {
        cfg!(feature = "xmlsec")
    }

    fn check_assertion(&self, assertion: Assertion) -> ValidationOutcome {
        // Extract subject (user ID)
        let Some(name_id) = assertion
            .subject
            .as_ref()
            .and_then(|subject| subject.name_id.as_ref())
        else {
            debug!(assertion_id = %assertion.id, "SAML assertion missing NameID");
            return ValidationOutcome::NoIdentity;
        };

        let subject_id = name_id.value.trim().to_string();
        if subject_id.is_empty() {
            return ValidationOutcome::NoIdentity;
        }

        let session_index = assertion
            .authn_statements
            .as_ref()
            .and_then(|stmts| stmts.first())
            .and_then(|s| s.session_index.clone());

        let idp_entity_id = assertion
            .issuer
            .value
            .clone()
            .unwrap_or_else(|| self.idp_entity_id.clone());

        let attributes = extract_attributes(&assertion);

        info!(
            user_id = %subject_id,
            idp = %idp_entity_id,
            attributes = attributes.len(),
            "SAML assertion validated"
        );

        ValidationOutcome::Identity(IdentityAssertion {
            subject_id,
            name_id_format: name_id.format.clone(),
            attributes,
            issued_at: assertion.issue_instant,
            assertion_id: assertion.id.clone(),
            idp_entity_id,
            session_index,
        })
    }
}

impl AssertionValidator for SamaelValidator {
    fn validate(&self, saml_response: &str, expected_request_id: Option<&str>) -> ValidationOutcome {
        let compact: String = saml_response.chars().filter(|c| !c.is_whitespace()).collect();

        let response_xml = match BASE64.decode(compact.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to decode SAML response base64");
                return ValidationOutcome::Error("response is not valid base64".to_string());
            }
        };
        let response_xml = match String::from_utf8(response_xml) {
            Ok(xml) => xml,
            Err(_) => {
                return ValidationOutcome::Error("response is not valid UTF-8".to_string());
            }
        };

        if !self.signatures_verifiable() && !self.allow_unsigned_assertions {
            warn!("Refusing SAML response: built without xmlsec signature verification");
            return ValidationOutcome::Error("signature verification unavailable".to_string());
        }

        debug!(xml_len = response_xml.len(), "Processing SAML response");

        let possible_request_ids: Option<Vec<&str>> = expected_request_id.map(|id| vec![id]);
        let assertion = match self
            .service_provider
            .parse_xml_response(&response_xml, possible_request_ids.as_deref())
        {
            Ok(assertion) => assertion,
            Err(e) => {
                warn!(error = %e, "SAML response verification failed");
                return ValidationOutcome::Error("response could not be verified".to_string());
            }
        };

        // samael skips InResponseTo entirely when unsolicited responses are
        // allowed, and never looks at the SubjectConfirmationData copy.
        if let Some(expected) = expected_request_id {
            if let Some(other) = foreign_request_id(&response_xml, &assertion, expected) {
                warn!(
                    expected = %expected,
                    in_response_to = %other,
                    "SAML response answers another request"
                );
                return ValidationOutcome::Error(
                    "response does not answer this request".to_string(),
                );
            }
        }

        self.check_assertion(assertion)
    }
}

/// An `InResponseTo` value in the response or its subject confirmations that
/// is not `expected`.
fn foreign_request_id(response_xml: &str, assertion: &Assertion, expected: &str) -> Option<String> {
    let response_level = response_xml
        .parse::<Response>()
        .ok()
        .and_then(|response| response.in_response_to);

    let confirmation_level = assertion
        .subject
        .iter()
        .flat_map(|subject| subject.subject_confirmations.iter().flatten())
        .filter_map(|confirmation| confirmation.subject_confirmation_data.as_ref())
        .filter_map(|data| data.in_response_to.clone());

    response_level
        .into_iter()
        .chain(confirmation_level)
        .find(|id| id != expected)
}

/// Build an EntityDescriptor for the IdP from direct configuration.
fn build_idp_metadata(config: &SamlConfig) -> anyhow::Result<EntityDescriptor> {
    let cert = certificate::parse_pem(&config.idp_certificate_pem)?;

    let xml = format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        quick_xml::escape::escape(config.idp_entity_id()),
        cert.to_base64_der(),
        quick_xml::escape::escape(config.idp_sso_url.as_str()),
    );

    samael::metadata::de::from_str(&xml)
        .map_err(|e| anyhow::anyhow!("Failed to build IdP metadata: {}", e))
}

fn extract_attributes(assertion: &Assertion) -> HashMap<String, Vec<String>> {
    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();

    if let Some(ref attr_statements) = assertion.attribute_statements {
        for attr_statement in attr_statements {
            for attr in &attr_statement.attributes {
                if let Some(ref name) = attr.name {
                    let values: Vec<String> = attr
                        .values
                        .iter()
                        .filter_map(|v| v.value.clone())
                        .collect();
                    if !values.is_empty() {
                        attributes.entry(name.clone()).or_default().extend(values);
                    }
                }
            }
        }
    }

    attributes
}
