//! Token issuer for short-lived bearer tokens.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::config::TokenConfig;
use crate::error::AuthError;
use crate::saml::IdentityAssertion;

/// Authentication method recorded in every token.
pub const AUTH_TYPE_SAML: &str = "saml";

/// Token issuer for creating and checking JWTs.
pub struct TokenIssuer {
    /// Signing key.
    encoding_key: EncodingKey,
    /// Verification key (same secret).
    decoding_key: DecodingKey,
    /// Signing algorithm.
    algorithm: Algorithm,
    /// Issuer claim.
    issuer: String,
    /// Token TTL.
    ttl_secs: u64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Create a new token issuer from configuration.
    pub fn new(config: &TokenConfig) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;

        let algorithm = parse_algorithm(&config.signing_algorithm)?;
        let secret = config
            .signing_secret
            .as_deref()
            .ok_or_else(|| anyhow!("No signing secret provided"))?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            issuer: config.issuer.clone(),
            ttl_secs: config.token_ttl_secs,
        })
    }

    /// Issuer whose keys do not match its algorithm, so every `issue` fails.
    #[cfg(test)]
    pub(crate) fn failing_for_tests(config: &TokenConfig) -> Self {
        Self {
            algorithm: Algorithm::RS256,
            ..Self::new(config).unwrap()
        }
    }

    /// Issue a token for a verified identity.
    pub fn issue(&self, identity: &IdentityAssertion) -> Result<AuthToken, AuthError> {
        let issued_at = Utc::now();
        let now = issued_at.timestamp().max(0) as u64;

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: identity.subject_id().to_string(),
            attributes: identity.attributes().clone(),
            auth_type: AUTH_TYPE_SAML.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
            nbf: now,
            jti: generate_jti(),
        };

        let header = Header::new(self.algorithm);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenCreationFailed(e.to_string()))?;

        debug!(
            sub = %claims.sub,
            jti = %claims.jti,
            exp = %claims.exp,
            "Issued access token"
        );

        Ok(AuthToken {
            token,
            token_type: "Bearer".to_string(),
            expires_in: self.ttl_secs,
            issued_at,
        })
    }

    /// Decode a token issued by this service, checking signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_nbf = true;

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("Token verification failed: {}", e))?;
        Ok(data.claims)
    }
}

/// Claims carried by issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (NameID).
    pub sub: String,
    /// IdP attributes.
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
    /// Always "saml".
    pub auth_type: String,
    /// Issued at.
    pub iat: u64,
    /// Expiration time.
    pub exp: u64,
    /// Not before.
    pub nbf: u64,
    /// JWT ID.
    pub jti: String,
}

/// Issued token result.
#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    /// The compact JWT.
    pub token: String,
    /// Token type (always "Bearer").
    pub token_type: String,
    /// Expires in seconds.
    pub expires_in: u64,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
}

/// Parse algorithm string to jsonwebtoken Algorithm.
fn parse_algorithm(alg: &str) -> Result<Algorithm> {
    match alg {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        _ => Err(anyhow!("Unsupported algorithm: {}", alg)),
    }
}

/// Generate a unique JWT ID.
fn generate_jti() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-that-is-long-enough!";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&TokenConfig {
            enabled: true,
            signing_secret: Some(SECRET.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_algorithm() {
        assert!(matches!(parse_algorithm("HS256"), Ok(Algorithm::HS256)));
        assert!(matches!(parse_algorithm("HS512"), Ok(Algorithm::HS512)));
        assert!(parse_algorithm("RS256").is_err());
        assert!(parse_algorithm("INVALID").is_err());
    }

    #[test]
    fn test_issuer_requires_secret() {
        let config = TokenConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(TokenIssuer::new(&config).is_err());
    }

    #[test]
    fn test_issue_token_shape() {
        let identity = IdentityAssertion::for_tests("user@example.com", "assertion-1");
        let token = issuer().issue(&identity).unwrap();

        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);
        assert_eq!(token.token.split('.').count(), 3);
    }

    #[test]
    fn test_decode_returns_subject_and_attributes() {
        let issuer = issuer();
        let identity = IdentityAssertion::for_tests("user@example.com", "assertion-1");
        let token = issuer.issue(&identity).unwrap();

        let claims = issuer.verify(&token.token).unwrap();
        assert_eq!(claims.sub, "user@example.com");
        assert_eq!(claims.iss, "zentinel-saml-sp");
        assert_eq!(claims.auth_type, "saml");
        assert_eq!(claims.exp, claims.iat + 3600);
        assert_eq!(
            claims.attributes.get("groups"),
            Some(&vec!["admin".to_string(), "users".to_string()])
        );
    }

    #[test]
    fn test_encoding_failure_is_token_error() {
        let issuer = TokenIssuer::failing_for_tests(&TokenConfig {
            enabled: true,
            signing_secret: Some(SECRET.to_string()),
            ..Default::default()
        });
        let identity = IdentityAssertion::for_tests("user@example.com", "assertion-1");

        let err = issuer.issue(&identity).unwrap_err();
        assert!(matches!(err, AuthError::TokenCreationFailed(_)));
    }

    #[test]
    fn test_tokens_are_unique() {
        let issuer = issuer();
        let identity = IdentityAssertion::for_tests("user@example.com", "assertion-1");
        let a = issuer.issue(&identity).unwrap();
        let b = issuer.issue(&identity).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let identity = IdentityAssertion::for_tests("user@example.com", "assertion-1");
        let token = issuer().issue(&identity).unwrap();

        let other = TokenIssuer::new(&TokenConfig {
            enabled: true,
            signing_secret: Some("a-completely-different-secret-value".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(other.verify(&token.token).is_err());
        assert!(issuer().verify("not.a.token").is_err());
    }
}
