//! Service configuration from command line flags and environment.
//!
//! Every setting can come from a flag or its environment variable; a `.env`
//! file is loaded before parsing. [`ServiceConfig::from_args`] checks the
//! whole configuration up front so a bad deployment fails before binding.

use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::controller::ControllerSettings;
use crate::error::AuthError;
use crate::saml::SamlConfig;
use crate::session::cookie::{CookieSettings, DEFAULT_COOKIE_NAME, MIN_SECRET_LEN};
use crate::session::DEFAULT_CLEANUP_INTERVAL_SECS;
use crate::token::TokenConfig;

/// How a successful login is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResponseMode {
    /// 302 to the requested page with the session cookie.
    #[default]
    Redirect,
    /// 200 JSON with the identity and token.
    Json,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-saml-sp")]
#[command(about = "SAML 2.0 Service Provider with session and token issuance")]
pub struct Args {
    /// IdP single sign-on URL (HTTP-Redirect binding)
    #[arg(long, env = "SAML_IDP_SSO_URL")]
    pub idp_sso_url: Option<String>,

    /// IdP entity ID (defaults to the SSO URL)
    #[arg(long, env = "SAML_IDP_ENTITY_ID")]
    pub idp_entity_id: Option<String>,

    /// SP entity ID used as the AuthnRequest issuer
    #[arg(long, env = "SAML_SP_ENTITY_ID")]
    pub sp_entity_id: Option<String>,

    /// Absolute ACS URL; its path is the route the IdP posts to
    #[arg(long, env = "SAML_SP_ASSERTION_CONSUMER_URL")]
    pub acs_url: Option<String>,

    /// IdP signing certificate (PEM)
    #[arg(long, env = "SAML_IDP_CERT", hide_env_values = true)]
    pub idp_cert: Option<String>,

    /// File containing the IdP signing certificate (PEM)
    #[arg(long, env = "SAML_IDP_CERT_FILE")]
    pub idp_cert_file: Option<PathBuf>,

    /// NameID format to request from the IdP
    #[arg(long, env = "SAML_NAME_ID_FORMAT")]
    pub name_id_format: Option<String>,

    /// Accept unsigned assertions (development only)
    #[arg(long, env = "SAML_ALLOW_UNSIGNED_ASSERTIONS")]
    pub allow_unsigned_assertions: bool,

    /// Accept responses that do not answer an AuthnRequest we issued
    #[arg(long, env = "SAML_ALLOW_UNSOLICITED_RESPONSES")]
    pub allow_unsolicited_responses: bool,

    /// Clock skew tolerance for assertion conditions, in seconds
    #[arg(long, default_value = "300", env = "SAML_CLOCK_SKEW_SECS")]
    pub clock_skew_secs: i64,

    /// How long an AuthnRequest may stay unanswered, in seconds
    #[arg(long, default_value = "300", env = "SAML_REQUEST_TTL_SECS")]
    pub request_ttl_secs: u64,

    /// Upper bound on validating one response, in seconds
    #[arg(long, default_value = "10", env = "SAML_VALIDATION_TIMEOUT_SECS")]
    pub validation_timeout_secs: u64,

    /// Secret for signing session cookies (at least 32 bytes)
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, default_value = "3600", env = "SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// Session cookie name
    #[arg(long, default_value = DEFAULT_COOKIE_NAME, env = "SESSION_COOKIE_NAME")]
    pub cookie_name: String,

    /// Session cookie domain
    #[arg(long, env = "SESSION_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Omit the Secure cookie attribute (plain HTTP development setups)
    #[arg(long, env = "INSECURE_COOKIES")]
    pub insecure_cookies: bool,

    /// Issue a bearer token on successful login
    #[arg(long, env = "ISSUE_TOKENS")]
    pub issue_tokens: bool,

    /// Secret for signing bearer tokens (at least 32 bytes)
    #[arg(long, env = "TOKEN_SIGNING_SECRET", hide_env_values = true)]
    pub token_signing_secret: Option<String>,

    /// Token signing algorithm (HS256, HS384, HS512)
    #[arg(long, default_value = "HS256", env = "TOKEN_ALGORITHM")]
    pub token_algorithm: String,

    /// Issuer claim for bearer tokens
    #[arg(long, default_value = "zentinel-saml-sp", env = "TOKEN_ISSUER")]
    pub token_issuer: String,

    /// Bearer token lifetime in seconds
    #[arg(long, default_value = "3600", env = "TOKEN_TTL_SECS")]
    pub token_ttl_secs: u64,

    /// Comma-separated subjects allowed to log in (default: everyone)
    #[arg(long, env = "ALLOWED_SUBJECTS")]
    pub allowed_subjects: Option<String>,

    /// How to answer a successful login
    #[arg(long, value_enum, default_value = "redirect", env = "AUTH_RESPONSE_MODE")]
    pub response_mode: ResponseMode,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", env = "BIND_ADDRESS")]
    pub bind_address: String,

    /// Port to listen on
    #[arg(long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// Interval between expiry sweeps, in seconds
    #[arg(long, default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS, env = "CLEANUP_INTERVAL_SECS")]
    pub cleanup_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, env = "SAML_SP_VERBOSE")]
    pub verbose: bool,
}

/// Fully validated service configuration.
#[derive(Debug)]
pub struct ServiceConfig {
    pub saml: SamlConfig,
    pub token: TokenConfig,
    pub cookie: CookieSettings,
    pub session_secret: SessionSecret,
    pub controller: ControllerSettings,
    pub response_mode: ResponseMode,
    pub bind_addr: SocketAddr,
    pub cleanup_interval_secs: u64,
}

/// Session cookie secret; never printed.
pub struct SessionSecret(String);

impl SessionSecret {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

fn required(value: Option<String>, what: &str) -> Result<String, AuthError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::Configuration(format!("{} is required", what)))
}

impl ServiceConfig {
    pub fn from_args(args: Args) -> Result<Self, AuthError> {
        let idp_certificate_pem = match (args.idp_cert, args.idp_cert_file) {
            (Some(pem), _) if !pem.trim().is_empty() => pem,
            (_, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                AuthError::Configuration(format!(
                    "Failed to read IdP certificate {:?}: {}",
                    path, e
                ))
            })?,
            _ => {
                return Err(AuthError::Configuration(
                    "IdP certificate is required (SAML_IDP_CERT or SAML_IDP_CERT_FILE)".to_string(),
                ))
            }
        };

        let mut saml = SamlConfig {
            entity_id: required(args.sp_entity_id, "SP entity ID (SAML_SP_ENTITY_ID)")?,
            acs_url: required(args.acs_url, "ACS URL (SAML_SP_ASSERTION_CONSUMER_URL)")?,
            idp_sso_url: required(args.idp_sso_url, "IdP SSO URL (SAML_IDP_SSO_URL)")?,
            idp_entity_id: args.idp_entity_id.filter(|s| !s.trim().is_empty()),
            idp_certificate_pem,
            allow_unsigned_assertions: args.allow_unsigned_assertions,
            allow_unsolicited_responses: args.allow_unsolicited_responses,
            clock_skew_secs: args.clock_skew_secs,
            request_ttl_secs: args.request_ttl_secs,
            validation_timeout_secs: args.validation_timeout_secs,
            ..SamlConfig::default()
        };
        if let Some(format) = args.name_id_format.filter(|s| !s.trim().is_empty()) {
            saml.name_id_format = Some(format);
        }
        saml.validate().map_err(AuthError::Configuration)?;

        let session_secret = required(args.session_secret, "Session secret (SESSION_SECRET)")?;
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Configuration(format!(
                "Session secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if args.session_ttl_secs == 0 {
            return Err(AuthError::Configuration(
                "Session TTL must be greater than zero".to_string(),
            ));
        }

        let token = TokenConfig {
            enabled: args.issue_tokens,
            signing_secret: args.token_signing_secret.filter(|s| !s.is_empty()),
            signing_algorithm: args.token_algorithm,
            issuer: args.token_issuer,
            token_ttl_secs: args.token_ttl_secs,
        };
        token.validate().map_err(AuthError::Configuration)?;

        let cookie = CookieSettings {
            name: args.cookie_name,
            domain: args.cookie_domain,
            secure: !args.insecure_cookies,
            max_age_secs: args.session_ttl_secs,
            ..CookieSettings::default()
        };

        let allowed_subjects = args
            .allowed_subjects
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let ip: IpAddr = args.bind_address.parse().map_err(|e| {
            AuthError::Configuration(format!("Invalid bind address {}: {}", args.bind_address, e))
        })?;

        Ok(Self {
            saml,
            token,
            cookie,
            session_secret: SessionSecret(session_secret),
            controller: ControllerSettings {
                session_ttl_secs: args.session_ttl_secs,
                allowed_subjects,
            },
            response_mode: args.response_mode,
            bind_addr: SocketAddr::new(ip, args.port),
            cleanup_interval_secs: args.cleanup_interval_secs,
        })
    }
}
