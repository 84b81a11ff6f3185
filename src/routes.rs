//! HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assets::AssetSource;
use crate::config::ResponseMode;
use crate::controller::{AcsForm, AuthController};
use crate::error::AuthError;
use crate::saml::IdentityAssertion;
use crate::session::SessionCookie;
use crate::token::{AuthToken, TokenClaims};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AuthController>,
    pub cookies: SessionCookie,
    pub assets: Arc<dyn AssetSource>,
    pub response_mode: ResponseMode,
}

/// Build the router. The ACS route is the path of the configured ACS URL.
pub fn router(state: AppState) -> Router {
    let acs_path = state.controller.provider().config().acs_path();

    Router::new()
        .route("/", get(handle_index))
        .route("/login", get(handle_login))
        .route(&acs_path, post(handle_acs))
        .route("/profile", get(handle_profile))
        .route("/logout", get(handle_logout))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Identity as shown to clients.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub email: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl From<&IdentityAssertion> for UserView {
    fn from(identity: &IdentityAssertion) -> Self {
        Self {
            email: identity
                .attribute("email")
                .unwrap_or(identity.subject_id())
                .to_string(),
            attributes: identity.attributes().clone(),
        }
    }
}

impl From<TokenClaims> for UserView {
    fn from(claims: TokenClaims) -> Self {
        let email = claims
            .attributes
            .get("email")
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or(claims.sub);
        Self {
            email,
            attributes: claims.attributes,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    message: &'static str,
    user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<AuthToken>,
}

#[derive(Debug, Serialize)]
struct SessionView {
    authenticated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionView>,
    auth_method: &'static str,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    return_to: Option<String>,
}

/// 302 Found. `Redirect::to` answers 303, which some IdPs and browsers treat differently.
fn redirect_found(url: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn handle_index(State(state): State<AppState>) -> Response {
    match state.assets.serve("index.html") {
        Some(asset) => ([(CONTENT_TYPE, asset.content_type)], asset.body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AuthError> {
    let redirect = state.controller.initiate(query.return_to.as_deref())?;
    Ok(redirect_found(&redirect.url))
}

async fn handle_acs(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<AcsForm>, FormRejection>,
) -> Result<Response, AuthError> {
    let Form(form) = form.map_err(|e| {
        debug!(error = %e, "Unreadable ACS form");
        AuthError::MissingSamlResponse
    })?;

    let existing = state.cookies.from_headers(&headers);
    let login = state.controller.consume(form, existing).await?;
    let cookie = state.cookies.build(login.session.id);

    let response = match state.response_mode {
        ResponseMode::Redirect => redirect_found(&login.return_to),
        ResponseMode::Json => Json(LoginResponse {
            message: "Login successful",
            user: UserView::from(&login.session.identity),
            token: login.token,
        })
        .into_response(),
    };

    Ok(([(SET_COOKIE, cookie)], response).into_response())
}

async fn handle_profile(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = state
        .cookies
        .from_headers(&headers)
        .and_then(|id| state.controller.lookup(id));

    if let Some(session) = session {
        return Json(ProfileResponse {
            user: UserView::from(&session.identity),
            session: Some(SessionView {
                authenticated_at: session.identity.issued_at(),
                created_at: session.created_at,
                expires_at: session.expires_at,
            }),
            auth_method: "session",
        })
        .into_response();
    }

    if let Some(claims) = bearer_token(&headers).and_then(|t| state.controller.verify_token(t)) {
        return Json(ProfileResponse {
            user: UserView::from(claims),
            session: None,
            auth_method: "token",
        })
        .into_response();
    }

    redirect_found("/login")
}

async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = state.cookies.from_headers(&headers) {
        state.controller.logout(id);
    }

    (
        [(SET_COOKIE, state.cookies.expire())],
        Json(MessageResponse {
            message: "Logged out",
        }),
    )
        .into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::EmbeddedAssets;
    use crate::controller::tests::{controller_with, token_config, ScriptedValidator};
    use crate::controller::ControllerSettings;
    use crate::saml::config::tests::test_config;
    use crate::saml::validator::tests::{signed_response, UNTRUSTED_SIGNING_KEY};
    use crate::saml::{AssertionValidator, SamaelValidator, SamlProvider, ValidationOutcome};
    use crate::session::{CookieSettings, MemorySessionStore};
    use crate::token::TokenIssuer;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn app_with(validator: Arc<dyn AssertionValidator>, tokens: bool, mode: ResponseMode) -> Router {
        let controller = controller_with(validator, tokens, ControllerSettings::default());
        app_for(controller, mode)
    }

    fn app_for(controller: AuthController, mode: ResponseMode) -> Router {
        router(AppState {
            controller: Arc::new(controller),
            cookies: SessionCookie::new(SECRET, CookieSettings::default()).unwrap(),
            assets: Arc::new(EmbeddedAssets),
            response_mode: mode,
        })
    }

    fn app() -> Router {
        app_with(
            Arc::new(ScriptedValidator::identity("user@example.com", "assertion-1")),
            false,
            ResponseMode::Redirect,
        )
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_acs(body: String, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/acs")
            .header("content-type", "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers().get(LOCATION).unwrap().to_str().unwrap()
    }

    /// `name=value` part of the Set-Cookie header.
    fn session_cookie(response: &Response) -> String {
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Run /login and /acs, returning the ACS response.
    async fn login(app: &Router, cookie: Option<&str>) -> Response {
        login_with(app, "PHNhbWxwOlJlc3BvbnNlLz4=", cookie).await
    }

    async fn login_with(app: &Router, saml_response: &str, cookie: Option<&str>) -> Response {
        let response = send(app, get("/login", None)).await;
        let url = url::Url::parse(location(&response)).unwrap();
        let relay_state = url
            .query_pairs()
            .find(|(k, _)| k == "RelayState")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let body = format!(
            "SAMLResponse={}&RelayState={}",
            urlencoding::encode(saml_response),
            urlencoding::encode(&relay_state)
        );
        send(app, post_acs(body, cookie)).await
    }

    #[tokio::test]
    async fn test_login_redirects_to_idp() {
        let response = send(&app(), get("/login", None)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = location(&response);
        assert!(location.starts_with("https://idp.example/sso"));
        assert!(location.contains("SAMLRequest="));
    }

    #[tokio::test]
    async fn test_acs_without_response_is_bad_request() {
        let response = send(&app(), post_acs("RelayState=abc".to_string(), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "missing_saml_response");
    }

    #[tokio::test]
    async fn test_acs_without_form_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/acs")
            .body(Body::empty())
            .unwrap();
        let response = send(&app(), request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_profile_without_cookie_redirects_to_login() {
        let response = send(&app(), get("/profile", None)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn test_full_login_flow() {
        let app = app();

        let response = login(&app, None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/profile");
        let cookie = session_cookie(&response);
        assert!(cookie.starts_with("saml_sp_session="));

        let response = send(&app, get("/profile", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user"]["email"], "user@example.com");
        assert_eq!(body["user"]["attributes"]["groups"][0], "admin");
        assert_eq!(body["auth_method"], "session");
        assert!(body["session"]["expires_at"].is_string());
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let app = app();
        let cookie = session_cookie(&login(&app, None).await);

        let response = send(&app, get("/logout", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let expired = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(expired.contains("Max-Age=0"));

        let response = send(&app, get("/profile", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        // Logging out again is harmless
        let response = send(&app, get("/logout", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tampered_cookie_is_anonymous() {
        let app = app();
        let cookie = session_cookie(&login(&app, None).await);

        let (name_and_id, _) = cookie.split_once('.').unwrap();
        let tampered = format!("{}.AAAA", name_and_id);
        let response = send(&app, get("/profile", Some(&tampered))).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn test_rejected_response_creates_no_session() {
        let app = app_with(
            Arc::new(ScriptedValidator::new(ValidationOutcome::Error(
                "response could not be verified".to_string(),
            ))),
            false,
            ResponseMode::Redirect,
        );

        let response = login(&app, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"], "assertion_validation");
        assert_eq!(
            body["message"],
            "SAML processing failed: response could not be verified"
        );
    }

    #[tokio::test]
    async fn test_untrusted_signature_sets_no_cookie() {
        let sessions = Arc::new(MemorySessionStore::new());
        let controller = AuthController::new(
            SamlProvider::new(test_config()).unwrap(),
            Arc::new(SamaelValidator::new(&test_config()).unwrap()),
            sessions.clone(),
            None,
            ControllerSettings::default(),
        );
        let app = app_for(controller, ResponseMode::Redirect);

        let response = login_with(&app, &signed_response("_id1", UNTRUSTED_SIGNING_KEY), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"], "assertion_validation");
        assert_eq!(sessions.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_token_failure_is_server_error_without_session() {
        let sessions = Arc::new(MemorySessionStore::new());
        let controller = AuthController::new(
            SamlProvider::new(test_config()).unwrap(),
            Arc::new(ScriptedValidator::identity("user@example.com", "assertion-1")),
            sessions.clone(),
            Some(TokenIssuer::failing_for_tests(&token_config())),
            ControllerSettings::default(),
        );
        let app = app_for(controller, ResponseMode::Json);

        let response = login(&app, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"], "token_creation_failed");
        assert_eq!(sessions.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_identity_is_unauthorized() {
        let app = app_with(
            Arc::new(ScriptedValidator::new(ValidationOutcome::NoIdentity)),
            false,
            ResponseMode::Redirect,
        );
        let response = login(&app, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_json_mode_returns_token() {
        let app = app_with(
            Arc::new(ScriptedValidator::identity("user@example.com", "assertion-1")),
            true,
            ResponseMode::Json,
        );

        let response = login(&app, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_some());
        let body = json_body(response).await;
        assert_eq!(body["message"], "Login successful");
        assert_eq!(body["user"]["email"], "user@example.com");
        assert_eq!(body["token"]["token_type"], "Bearer");

        // The token authenticates /profile on its own
        let token = body["token"]["token"].as_str().unwrap();
        let request = Request::builder()
            .uri("/profile")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["auth_method"], "token");
        assert_eq!(body["user"]["email"], "user@example.com");
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let app = app();

        let response = send(&app, get("/", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));

        let response = send(&app, get("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }
}
