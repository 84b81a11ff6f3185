//! Authentication controller.
//!
//! Orchestrates the two halves of SP-initiated SSO. `initiate` sends the
//! browser to the IdP; `consume` takes the IdP's answer through validation,
//! the subject allowlist and replay checks, and ends in a new session (plus an
//! optional bearer token).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::saml::{
    AssertionValidator, AuthnRedirect, IdentityAssertion, SamlProvider, ValidationOutcome,
};
use crate::session::{AssertionReplayed, Session, SessionId, SessionStore};
use crate::token::{AuthToken, TokenClaims, TokenIssuer};

/// Where a client is in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    PendingIdpRedirect,
    AwaitingAssertion,
    Authenticated,
    Rejected,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Anonymous => "anonymous",
            AuthState::PendingIdpRedirect => "pending_idp_redirect",
            AuthState::AwaitingAssertion => "awaiting_assertion",
            AuthState::Authenticated => "authenticated",
            AuthState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Form fields the IdP posts to the ACS.
#[derive(Debug, Default, Deserialize)]
pub struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Result of a successful login.
#[derive(Debug)]
pub struct Authenticated {
    pub session: Session,
    pub token: Option<AuthToken>,
    /// Local path the browser asked to come back to.
    pub return_to: String,
}

/// Controller tuning that is not part of the SAML configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub session_ttl_secs: u64,
    /// Subjects allowed to log in (case-insensitive). Empty allows everyone.
    pub allowed_subjects: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            allowed_subjects: Vec::new(),
        }
    }
}

pub struct AuthController {
    provider: SamlProvider,
    validator: Arc<dyn AssertionValidator>,
    sessions: Arc<dyn SessionStore>,
    token_issuer: Option<TokenIssuer>,
    allowed_subjects: HashSet<String>,
    session_ttl_secs: u64,
    validation_timeout: Duration,
}

impl AuthController {
    pub fn new(
        provider: SamlProvider,
        validator: Arc<dyn AssertionValidator>,
        sessions: Arc<dyn SessionStore>,
        token_issuer: Option<TokenIssuer>,
        settings: ControllerSettings,
    ) -> Self {
        let validation_timeout = Duration::from_secs(provider.config().validation_timeout_secs);
        let allowed_subjects = settings
            .allowed_subjects
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            provider,
            validator,
            sessions,
            token_issuer,
            allowed_subjects,
            session_ttl_secs: settings.session_ttl_secs,
            validation_timeout,
        }
    }

    pub fn provider(&self) -> &SamlProvider {
        &self.provider
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Start a login: create an AuthnRequest and return the IdP redirect.
    pub fn initiate(&self, return_to: Option<&str>) -> Result<AuthnRedirect, AuthError> {
        let redirect = self
            .provider
            .create_authn_request(return_to)
            .map_err(|e| AuthError::Internal(format!("failed to build AuthnRequest: {}", e)))?;

        info!(
            state = %AuthState::PendingIdpRedirect,
            request_id = %redirect.request_id,
            relay_state = %redirect.relay_state,
            "Redirecting to IdP for SAML authentication"
        );
        Ok(redirect)
    }

    /// Consume an IdP response posted to the ACS.
    ///
    /// `existing` is the session the browser still presents, if any. It is
    /// replaced once the new session is fully established.
    pub async fn consume(
        &self,
        form: AcsForm,
        existing: Option<SessionId>,
    ) -> Result<Authenticated, AuthError> {
        let saml_response = form
            .saml_response
            .filter(|s| !s.trim().is_empty())
            .ok_or(AuthError::MissingSamlResponse)?;

        debug!(state = %AuthState::AwaitingAssertion, "Consuming SAML response");

        let pending = match form.relay_state.as_deref().filter(|s| !s.is_empty()) {
            Some(relay_state) => self
                .provider
                .take_pending(relay_state)
                .map_err(|e| self.reject(AuthError::SessionStore(e.to_string())))?,
            None => None,
        };

        let (expected_request_id, return_to) = match pending {
            Some(request) => (Some(request.request_id), request.return_to),
            None if self.provider.config().allow_unsolicited_responses => {
                debug!("Accepting unsolicited SAML response");
                (None, self.provider.config().default_return_to.clone())
            }
            None => {
                return Err(self.reject(AuthError::AssertionValidation(
                    "response does not match a pending request".to_string(),
                )));
            }
        };

        let identity = match self.run_validator(saml_response, expected_request_id).await? {
            ValidationOutcome::Identity(identity) => identity,
            ValidationOutcome::NoIdentity => return Err(self.reject(AuthError::IdentityMissing)),
            ValidationOutcome::Error(reason) => {
                return Err(self.reject(AuthError::AssertionValidation(reason)))
            }
        };

        if !self.is_subject_allowed(identity.subject_id()) {
            return Err(self.reject(AuthError::SubjectNotAllowed(
                identity.subject_id().to_string(),
            )));
        }

        let replayed = self
            .sessions
            .is_assertion_used(identity.assertion_id())
            .map_err(|e| self.reject(AuthError::SessionStore(e.to_string())))?;
        if replayed {
            return Err(self.reject_replay(identity.assertion_id()));
        }

        let assertion_valid_until = self.assertion_valid_until(&identity);
        let session = Session::new(identity, self.session_ttl_secs);
        let session_id = self
            .sessions
            .create(session.clone(), assertion_valid_until)
            .map_err(|e| match e.downcast_ref::<AssertionReplayed>() {
                Some(AssertionReplayed(assertion_id)) => self.reject_replay(assertion_id),
                None => self.reject(AuthError::SessionStore(e.to_string())),
            })?;

        let token = match self.token_issuer {
            Some(ref issuer) => match issuer.issue(&session.identity) {
                Ok(token) => Some(token),
                Err(e) => {
                    // No half-built login survives a failure.
                    if let Err(destroy_err) = self.sessions.destroy(session_id) {
                        warn!(error = %destroy_err, "Failed to roll back session");
                    }
                    return Err(self.reject(e));
                }
            },
            None => None,
        };

        if let Some(old) = existing.filter(|old| *old != session_id) {
            match self.sessions.destroy(old) {
                Ok(true) => debug!(session_id = %old, "Replaced previous session"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to destroy previous session"),
            }
        }

        info!(
            state = %AuthState::Authenticated,
            user_id = %session.user_id(),
            idp = %session.identity.idp_entity_id(),
            name_id_format = ?session.identity.name_id_format(),
            idp_session_index = ?session.identity.session_index(),
            session_id = %session_id,
            token_issued = token.is_some(),
            "SAML login succeeded"
        );

        Ok(Authenticated {
            session,
            token,
            return_to,
        })
    }

    /// Resolve a session. Store failures count as not authenticated.
    pub fn lookup(&self, id: SessionId) -> Option<Session> {
        match self.sessions.lookup(id) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// End a session. Returns whether one existed.
    pub fn logout(&self, id: SessionId) -> bool {
        match self.sessions.destroy(id) {
            Ok(existed) => {
                if existed {
                    info!(state = %AuthState::Anonymous, session_id = %id, "Session destroyed");
                }
                existed
            }
            Err(e) => {
                warn!(error = %e, "Session destroy failed");
                false
            }
        }
    }

    /// Claims of a bearer token, when token issuance is enabled and the token verifies.
    pub fn verify_token(&self, token: &str) -> Option<TokenClaims> {
        let issuer = self.token_issuer.as_ref()?;
        match issuer.verify(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Bearer token rejected");
                None
            }
        }
    }

    /// Last instant at which the validator could still accept this assertion.
    fn assertion_valid_until(&self, identity: &IdentityAssertion) -> DateTime<Utc> {
        let config = self.provider.config();
        config
            .max_issue_delay_secs
            .checked_add(config.clock_skew_secs)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| identity.issued_at().checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn is_subject_allowed(&self, subject_id: &str) -> bool {
        self.allowed_subjects.is_empty()
            || self.allowed_subjects.contains(&subject_id.trim().to_lowercase())
    }

    /// Run the validator on a blocking thread, bounded by the timeout.
    async fn run_validator(
        &self,
        saml_response: String,
        expected_request_id: Option<String>,
    ) -> Result<ValidationOutcome, AuthError> {
        let validator = Arc::clone(&self.validator);
        let task = tokio::task::spawn_blocking(move || {
            validator.validate(&saml_response, expected_request_id.as_deref())
        });

        match tokio::time::timeout(self.validation_timeout, task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(self.reject(AuthError::Internal(format!(
                "validator task failed: {}",
                e
            )))),
            Err(_) => Err(self.reject(AuthError::ValidationTimeout(self.validation_timeout))),
        }
    }

    fn reject_replay(&self, assertion_id: &str) -> AuthError {
        warn!(assertion_id = %assertion_id, "SAML assertion replay rejected");
        self.reject(AuthError::AssertionValidation(
            "assertion has already been used".to_string(),
        ))
    }

    fn reject(&self, error: AuthError) -> AuthError {
        info!(
            state = %AuthState::Rejected,
            category = error.category(),
            "SAML login rejected"
        );
        error
    }
}
