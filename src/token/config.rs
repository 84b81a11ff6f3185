//! Access token configuration.

use serde::{Deserialize, Serialize};

/// Minimum accepted signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Tokens are short-lived; one day at most.
const MAX_TTL_SECS: u64 = 86_400;

/// Configuration for the bearer tokens issued after login.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// Issue a token on successful login.
    #[serde(default)]
    pub enabled: bool,

    /// Symmetric signing secret.
    #[serde(default, skip_serializing)]
    pub signing_secret: Option<String>,

    /// Signing algorithm (HS256, HS384, HS512).
    #[serde(default = "default_algorithm")]
    pub signing_algorithm: String,

    /// Issuer claim for issued tokens.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Token TTL in seconds.
    #[serde(default = "default_ttl")]
    pub token_ttl_secs: u64,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_issuer() -> String {
    "zentinel-saml-sp".to_string()
}

fn default_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signing_secret: None,
            signing_algorithm: default_algorithm(),
            issuer: default_issuer(),
            token_ttl_secs: default_ttl(),
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("enabled", &self.enabled)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("signing_algorithm", &self.signing_algorithm)
            .field("issuer", &self.issuer)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl TokenConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        match self.signing_secret {
            None => return Err("Token issuance requires a signing secret".to_string()),
            Some(ref secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(format!(
                    "Token signing secret must be at least {} bytes",
                    MIN_SECRET_LEN
                ));
            }
            Some(_) => {}
        }

        let valid_algs = ["HS256", "HS384", "HS512"];
        if !valid_algs.contains(&self.signing_algorithm.as_str()) {
            return Err(format!(
                "Invalid signing algorithm: {}. Valid: {:?}",
                self.signing_algorithm, valid_algs
            ));
        }

        if self.issuer.trim().is_empty() {
            return Err("Token issuer must not be empty".to_string());
        }

        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TTL_SECS {
            return Err(format!(
                "Token TTL must be between 1 and {} seconds",
                MAX_TTL_SECS
            ));
        }

        Ok(())
    }
}
