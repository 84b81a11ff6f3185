//! Zentinel SAML Service Provider
//!
//! Runs SP-initiated SAML 2.0 single sign-on against one IdP: redirects the
//! browser with an AuthnRequest, consumes the signed response on the ACS,
//! and keeps the user signed in with a server-side session and an optional
//! short-lived bearer token.

mod assets;
mod config;
mod controller;
mod error;
mod routes;
mod saml;
mod session;
mod token;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use assets::EmbeddedAssets;
use config::{Args, ServiceConfig};
use controller::AuthController;
use routes::AppState;
use saml::{SamaelValidator, SamlProvider};
use session::{spawn_cleanup_task, MemorySessionStore, SessionCookie, SessionStore};
use token::TokenIssuer;

#[tokio::main]
async fn main() -> Result<()> {
    // Variables from .env do not override the real environment
    let dotenv = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!("Starting Zentinel SAML Service Provider");
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    // Build configuration
    let config = ServiceConfig::from_args(args)?;

    info!(
        sp_entity_id = %config.saml.entity_id,
        idp_entity_id = %config.saml.idp_entity_id(),
        acs_path = %config.saml.acs_path(),
        tokens_enabled = config.token.enabled,
        response_mode = ?config.response_mode,
        allowed_subjects = config.controller.allowed_subjects.len(),
        "Configuration loaded"
    );

    let certificate = saml::certificate::parse_pem(&config.saml.idp_certificate_pem)?;
    if certificate.is_expired() {
        warn!(
            subject = %certificate.subject_dn,
            not_after = %certificate.not_after,
            "IdP certificate has expired; signed responses will not verify"
        );
    }

    let validator = SamaelValidator::new(&config.saml).context("Failed to build SAML validator")?;
    let provider = SamlProvider::new(config.saml.clone()).context("Failed to build SAML provider")?;
    let pending = provider.pending_requests();

    let token_issuer = if config.token.enabled {
        Some(TokenIssuer::new(&config.token).context("Failed to build token issuer")?)
    } else {
        None
    };

    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let cookies = SessionCookie::new(config.session_secret.as_bytes(), config.cookie.clone())
        .context("Failed to configure session cookies")?;

    let controller = AuthController::new(
        provider,
        Arc::new(validator),
        sessions,
        token_issuer,
        config.controller.clone(),
    );

    info!(interval_secs = config.cleanup_interval_secs, "Starting session cleanup task");
    let _cleanup_handle = spawn_cleanup_task(controller.sessions(), pending, config.cleanup_interval_secs);

    let app = routes::router(AppState {
        controller: Arc::new(controller),
        cookies,
        assets: Arc::new(EmbeddedAssets),
        response_mode: config.response_mode,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(address = %config.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
