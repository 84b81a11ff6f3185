//! SAML Service Provider configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use super::certificate;

/// Email address NameID format, requested by default.
pub const NAME_ID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Upper bound for time windows (one day).
const MAX_WINDOW_SECS: i64 = 86_400;

/// SAML Service Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// SP Entity ID (the issuer of our AuthnRequests).
    #[serde(default)]
    pub entity_id: String,

    /// Assertion Consumer Service URL (where IdP posts SAML response).
    #[serde(default)]
    pub acs_url: String,

    /// IdP SSO URL (HTTP-Redirect binding entry point).
    #[serde(default)]
    pub idp_sso_url: String,

    /// IdP Entity ID. Falls back to the SSO URL when unset.
    #[serde(default)]
    pub idp_entity_id: Option<String>,

    /// IdP certificate (PEM format, for signature verification).
    #[serde(default)]
    pub idp_certificate_pem: String,

    /// Accept responses without verified signatures (NOT for production).
    #[serde(default)]
    pub allow_unsigned_assertions: bool,

    /// Accept responses that do not answer a request we issued.
    #[serde(default)]
    pub allow_unsolicited_responses: bool,

    /// NameID format to request.
    #[serde(default = "default_name_id_format")]
    pub name_id_format: Option<String>,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Maximum age of a response's IssueInstant, in seconds.
    #[serde(default = "default_max_issue_delay")]
    pub max_issue_delay_secs: i64,

    /// How long an issued AuthnRequest may stay unanswered.
    #[serde(default = "default_request_ttl")]
    pub request_ttl_secs: u64,

    /// Upper bound on a single response validation.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Where to send the browser after login when no return path was requested.
    #[serde(default = "default_return_to")]
    pub default_return_to: String,
}

fn default_name_id_format() -> Option<String> {
    Some(NAME_ID_FORMAT_EMAIL.to_string())
}

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

fn default_max_issue_delay() -> i64 {
    300
}

fn default_request_ttl() -> u64 {
    300
}

fn default_validation_timeout() -> u64 {
    10
}

fn default_return_to() -> String {
    "/profile".to_string()
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            acs_url: String::new(),
            idp_sso_url: String::new(),
            idp_entity_id: None,
            idp_certificate_pem: String::new(),
            allow_unsigned_assertions: false,
            allow_unsolicited_responses: false,
            name_id_format: default_name_id_format(),
            clock_skew_secs: default_clock_skew(),
            max_issue_delay_secs: default_max_issue_delay(),
            request_ttl_secs: default_request_ttl(),
            validation_timeout_secs: default_validation_timeout(),
            default_return_to: default_return_to(),
        }
    }
}

impl SamlConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity_id.trim().is_empty() {
            return Err("SAML SP entity ID (issuer) is required".to_string());
        }

        parse_http_url(&self.idp_sso_url, "IdP SSO URL")?;
        parse_http_url(&self.acs_url, "ACS URL")?;

        if self.idp_certificate_pem.trim().is_empty() {
            return Err("IdP certificate is required".to_string());
        }
        certificate::parse_pem(&self.idp_certificate_pem)
            .map_err(|e| format!("IdP certificate is malformed: {}", e))?;

        if !self.default_return_to.starts_with('/') {
            return Err("default return path must be a relative path".to_string());
        }

        if self.validation_timeout_secs == 0 {
            return Err("validation timeout must be greater than zero".to_string());
        }

        for (value, what) in [
            (self.clock_skew_secs, "clock skew"),
            (self.max_issue_delay_secs, "maximum issue delay"),
        ] {
            if !(0..=MAX_WINDOW_SECS).contains(&value) {
                return Err(format!("{} must be between 0 and {} seconds", what, MAX_WINDOW_SECS));
            }
        }
        if self.request_ttl_secs == 0 || self.request_ttl_secs > MAX_WINDOW_SECS as u64 {
            return Err(format!(
                "request TTL must be between 1 and {} seconds",
                MAX_WINDOW_SECS
            ));
        }

        Ok(())
    }

    /// Path component of the ACS URL; this is the route the IdP posts to.
    pub fn acs_path(&self) -> String {
        Url::parse(&self.acs_url)
            .ok()
            .map(|u| u.path().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/acs".to_string())
    }

    /// Entity ID the IdP signs its responses as.
    pub fn idp_entity_id(&self) -> &str {
        self.idp_entity_id.as_deref().unwrap_or(&self.idp_sso_url)
    }
}

fn parse_http_url(value: &str, what: &str) -> Result<Url, String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", what));
    }
    let url = Url::parse(value).map_err(|e| format!("{} is not a valid URL: {}", what, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("{} must use http or https, got {}", what, other)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Self-signed RSA certificate for `CN=idp.example`, valid until 2126.
    pub(crate) const TEST_IDP_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIDDzCCAfegAwIBAgIUFE/M5Q0v96x7YeqTEW7ceOVbJ30wDQYJKoZIhvcNAQEL
BQAwFjEUMBIGA1UEAwwLaWRwLmV4YW1wbGUwIBcNMjYxMDE5MTIyNjM2WhgPMjEy
NjA5MjUxMjI2MzZaMBYxFDASBgNVBAMMC2lkcC5leGFtcGxlMIIBIjANBgkqhkiG
9w0BAQEFAAOCAQ8AMIIBCgKCAQEAm/l/UMYTyeIBdvQsfg9w7WhnTx2vtuAN/kdi
iEIDnqivAm1CPUnti1gNrwWf2hjbjZDcdYuEEJpdhmPCgrS1jowE1jX2hkNDukdk
fSwouAwDd57Ef0msXDayh1j/Eg+Bo7QE8/Gs0gFHgSThc2r82LdwJ3kb9y5Zjv8l
8htHqRNTlGfiQaxk0YaEsdyxD+xZuAZLwimmkVV/c+9JcC+YaxprzfFi331izBGx
vNRgFo/+l5MMeXVbVOiPI7G0tCJQGcSOvHm9pD8wRf/HmVCNXjBWwuafL2x0mZOW
LP25nZ7YYG3kv+yRQXSlQ5CFXXan1fVtizEN6iLwdF8TrZTkCwIDAQABo1MwUTAd
BgNVHQ4EFgQU+jHCHuE4VycdimN+3p8ozB/qjOowHwYDVR0jBBgwFoAU+jHCHuE4
VycdimN+3p8ozB/qjOowDwYDVR0TAQH/BAUwAwEB/zANBgkqhkiG9w0BAQsFAAOC
AQEAikvSv1OfAYu1t686kuesxI5RyOFsNHHqoYWy0AYVLPNl5oEVEHeMKpbdIjPt
J+3U5z7QL7UTHUliFnYtwC9DkwDXS5zp2niHsjwpv0i+FLBOl/wC+KkZ2zwgN9sK
XCR1ACd5eGJOjt9o14hXj/ufvPnhGYbKLvoWEwzZ4pKLkTysdBlTI9tOTCke7d4j
Amnp4YPDr6dVueHZosBhUCEb9AED73NqDJjMVBMBLeQ0dUNAo/HKTbtbsFPG68MB
DMh087vtTo11Grp3Wz3NYgX+GJ6ioNvZx3YKU7J/ED+dHAahGAr9KLTNgn8LGxcH
Ng4FB3Xw6YM8MVbKpXQw74nBzw==
-----END CERTIFICATE-----";

    pub(crate) fn test_config() -> SamlConfig {
        SamlConfig {
            entity_id: "sp-test".to_string(),
            acs_url: "https://sp.example.com/acs".to_string(),
            idp_sso_url: "https://idp.example/sso".to_string(),
            idp_entity_id: Some("https://idp.example".to_string()),
            idp_certificate_pem: TEST_IDP_CERT_PEM.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SamlConfig::default();
        assert_eq!(config.clock_skew_secs, 300);
        assert_eq!(config.request_ttl_secs, 300);
        assert_eq!(config.default_return_to, "/profile");
        assert_eq!(config.name_id_format.as_deref(), Some(NAME_ID_FORMAT_EMAIL));
        assert!(!config.allow_unsigned_assertions);
        assert!(!config.allow_unsolicited_responses);
    }

    #[test]
    fn test_validation() {
        let mut config = SamlConfig::default();
        assert!(config.validate().is_err()); // missing entity_id

        config.entity_id = "sp-test".to_string();
        assert!(config.validate().is_err()); // missing SSO URL

        config.idp_sso_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.idp_sso_url = "ftp://idp.example/sso".to_string();
        assert!(config.validate().is_err());

        config.idp_sso_url = "https://idp.example/sso".to_string();
        config.acs_url = "https://sp.example.com/acs".to_string();
        assert!(config.validate().is_err()); // missing certificate

        config.idp_certificate_pem = "-----BEGIN CERTIFICATE-----\nZm9v\n-----END CERTIFICATE-----".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("malformed"));

        config.idp_certificate_pem = TEST_IDP_CERT_PEM.to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_acs_path() {
        let config = test_config();
        assert_eq!(config.acs_path(), "/acs");

        let config = SamlConfig {
            acs_url: "https://sp.example.com/saml/acs".to_string(),
            ..test_config()
        };
        assert_eq!(config.acs_path(), "/saml/acs");
    }

    #[test]
    fn test_idp_entity_id_fallback() {
        let mut config = test_config();
        assert_eq!(config.idp_entity_id(), "https://idp.example");

        config.idp_entity_id = None;
        assert_eq!(config.idp_entity_id(), "https://idp.example/sso");
    }
}
