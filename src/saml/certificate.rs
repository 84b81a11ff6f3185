//! IdP signing certificate handling.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use x509_parser::prelude::*;

const BEGIN_MARKER: &str = "-----BEGIN CERTIFICATE-----";
const END_MARKER: &str = "-----END CERTIFICATE-----";

/// Parsed IdP certificate, kept for startup diagnostics and metadata.
#[derive(Debug, Clone)]
pub struct IdpCertificate {
    /// DER bytes of the certificate.
    pub der: Vec<u8>,
    /// Full Subject Distinguished Name.
    pub subject_dn: String,
    /// Not valid after (Unix timestamp).
    pub not_after: i64,
}

impl IdpCertificate {
    /// Base64 DER body, as carried in `<ds:X509Certificate>`.
    pub fn to_base64_der(&self) -> String {
        BASE64.encode(&self.der)
    }

    /// Check if the certificate is past its validity period.
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.not_after
    }
}

/// Decode and parse a PEM certificate.
///
/// Accepts the PEM armour or a bare base64 DER body, since IdP consoles
/// commonly hand out the latter.
pub fn parse_pem(pem: &str) -> Result<IdpCertificate> {
    let der = decode_pem(pem)?;

    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| anyhow!("Failed to parse X.509 certificate: {:?}", e))?;

    let subject_dn = cert.subject().to_string();
    let not_after = cert.validity().not_after.timestamp();

    Ok(IdpCertificate {
        der,
        subject_dn,
        not_after,
    })
}

fn decode_pem(data: &str) -> Result<Vec<u8>> {
    let data = data.trim();

    let body = if data.contains(BEGIN_MARKER) {
        let start = data
            .find(BEGIN_MARKER)
            .ok_or_else(|| anyhow!("Invalid PEM: missing BEGIN marker"))?;
        let end = data
            .find(END_MARKER)
            .ok_or_else(|| anyhow!("Invalid PEM: missing END marker"))?;
        if end < start {
            return Err(anyhow!("Invalid PEM: END marker before BEGIN marker"));
        }
        &data[start + BEGIN_MARKER.len()..end]
    } else {
        data
    };

    let base64_content: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if base64_content.is_empty() {
        return Err(anyhow!("Certificate body is empty"));
    }

    BASE64
        .decode(&base64_content)
        .context("Failed to decode certificate base64 content")
}
