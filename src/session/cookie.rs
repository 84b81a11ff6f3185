//! Session cookie binding.
//!
//! The cookie value is `{session id hex}.{HMAC-SHA256 tag}`, so a client can
//! carry its session ID but cannot forge or alter one.

use anyhow::{anyhow, Result};
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::types::SessionId;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted session secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "saml_sp_session";

/// Cookie attributes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
    /// Max-Age in seconds; matches the session TTL.
    pub max_age_secs: u64,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            domain: None,
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: "Lax".to_string(),
            max_age_secs: 3600,
        }
    }
}

/// Signs, parses and expires session cookies.
#[derive(Clone)]
pub struct SessionCookie {
    mac: HmacSha256,
    settings: CookieSettings,
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("secret", &"[REDACTED]")
            .field("settings", &self.settings)
            .finish()
    }
}

impl SessionCookie {
    pub fn new(secret: &[u8], settings: CookieSettings) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "Session secret must be at least {} bytes",
                MIN_SECRET_LEN
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow!("Invalid session secret: {}", e))?;
        Ok(Self { mac, settings })
    }

    fn tag(&self, id_hex: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(id_hex.as_bytes());
        mac
    }

    /// Signed cookie value for a session.
    pub fn sign(&self, id: SessionId) -> String {
        let id_hex = id.to_hex();
        let tag = self.tag(&id_hex).finalize().into_bytes();
        format!("{}.{}", id_hex, URL_SAFE_NO_PAD.encode(tag))
    }

    /// Verify a signed value and return the session ID it carries.
    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (id_hex, tag) = value.split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        self.tag(id_hex).verify_slice(&tag).ok()?;
        SessionId::parse(id_hex)
    }

    /// `Set-Cookie` value binding the browser to a session.
    pub fn build(&self, id: SessionId) -> String {
        self.format(&self.sign(id), self.settings.max_age_secs)
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn expire(&self) -> String {
        self.format("", 0)
    }

    fn format(&self, value: &str, max_age: u64) -> String {
        let settings = &self.settings;
        let mut cookie = format!("{}={}", settings.name, value);

        if let Some(ref domain) = settings.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }

        cookie.push_str(&format!("; Path={}", settings.path));

        if settings.secure {
            cookie.push_str("; Secure");
        }

        if settings.http_only {
            cookie.push_str("; HttpOnly");
        }

        cookie.push_str(&format!("; SameSite={}", settings.same_site));
        cookie.push_str(&format!("; Max-Age={}", max_age));

        cookie
    }

    /// Session ID from the request's cookies, if present and authentic.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        let prefix = format!("{}=", self.settings.name);
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|part| part.trim().strip_prefix(prefix.as_str()))
            .find_map(|value| self.verify(value))
    }
}
