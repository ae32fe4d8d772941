//! Security policy and the request filter enforcing it.
//!
//! The policy is a single immutable value built from `AppConfig` at start up. It owns the
//! permission table, the login/logout URLs and the token signers. The filter applies it to
//! every request before routing: CSRF check, rule lookup, authentication, role decision.

use axum::{
    Form,
    body::Body,
    extract::{FromRequest, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::{
    AppState,
    auth::{
        AuthUser, CSRF_COOKIE, CsrfToken, PasswordEncoder, REMEMBER_ME_COOKIE, SESSION_COOKIE,
        TokenKind, TokenSigner, build_cookie, constant_time_eq, expire_cookie, read_cookie,
    },
    config::AppConfig,
    error::AppError,
    models::Role,
    repository::RepositoryError,
};

/// Header carrying the CSRF token for script-issued requests.
pub const CSRF_HEADER: &str = "x-xsrf-token";
/// Form field or query parameter carrying the CSRF token.
pub const CSRF_PARAM: &str = "_csrf";
/// Upper bound on a urlencoded body buffered to look for `_csrf`.
const FORM_BODY_LIMIT: usize = 64 * 1024;

static FALLBACK_ACCESS: Access = Access::Authenticated;

/// Who may reach a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    /// Authenticated and holding one of these roles.
    Roles(Vec<Role>),
}

/// Outcome of an authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    /// No principal: send the caller to the login page.
    RedirectToLogin,
    /// Authenticated, but the role is not allowed.
    Forbidden,
}

impl Access {
    /// Pure role check. `None` means the caller is anonymous.
    pub fn decide(&self, role: Option<Role>) -> Decision {
        match (self, role) {
            (Access::Public, _) => Decision::Permit,
            (_, None) => Decision::RedirectToLogin,
            (Access::Authenticated, Some(_)) => Decision::Permit,
            (Access::Roles(allowed), Some(role)) if allowed.contains(&role) => Decision::Permit,
            (Access::Roles(_), Some(_)) => Decision::Forbidden,
        }
    }
}

/// Ant-style path pattern: exact (`/medicos`), one trailing segment (`/medicos/*`) or a
/// whole subtree (`/css/**`, which also matches `/css` itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        Self(pattern.to_string())
    }

    pub fn matches(&self, path: &str) -> bool {
        let pattern = self.0.as_str();
        if let Some(base) = pattern.strip_suffix("/**") {
            return base.is_empty()
                || path == base
                || path
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.starts_with('/'));
        }
        if let Some(base) = pattern.strip_suffix("/*") {
            return path
                .strip_prefix(base)
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|segment| !segment.is_empty() && !segment.contains('/'));
        }
        pattern == path
    }
}

/// One row of the permission table. An empty method list matches every method, and a
/// rule listing `GET` also covers `HEAD`, which the router serves with the GET handler.
#[derive(Debug, Clone)]
pub struct Rule {
    pub methods: Vec<Method>,
    pub pattern: PathPattern,
    pub access: Access,
}

impl Rule {
    pub fn new(methods: &[Method], pattern: &str, access: Access) -> Self {
        Self {
            methods: methods.to_vec(),
            pattern: PathPattern::new(pattern),
            access,
        }
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        let method_matches = self.methods.is_empty()
            || self.methods.contains(method)
            || (*method == Method::HEAD && self.methods.contains(&Method::GET));
        method_matches && self.pattern.matches(path)
    }
}

/// The central permission table, evaluated top to bottom; the first matching rule wins.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(&[], "/css/**", Access::Public),
        Rule::new(&[], "/js/**", Access::Public),
        Rule::new(&[], "/assets/**", Access::Public),
        Rule::new(&[], "/login", Access::Public),
        Rule::new(&[], "/logout", Access::Public),
        Rule::new(
            &[Method::GET],
            "/medicos",
            Access::Roles(vec![Role::Atendente, Role::Paciente]),
        ),
        Rule::new(
            &[Method::POST, Method::DELETE],
            "/medicos",
            Access::Roles(vec![Role::Atendente]),
        ),
        Rule::new(&[], "/medicos/formulario", Access::Roles(vec![Role::Atendente])),
        Rule::new(&[Method::GET], "/medicos/*", Access::Authenticated),
        Rule::new(&[], "/**", Access::Authenticated),
    ]
}

/// SecurityPolicy
///
/// Process-wide security configuration. Constructed once, shared behind an `Arc`, never
/// mutated at request time.
pub struct SecurityPolicy {
    rules: Vec<Rule>,
    pub login_page: String,
    pub login_failure_url: String,
    pub default_success_url: String,
    pub logout_success_url: String,
    pub session: TokenSigner,
    pub remember_me: TokenSigner,
    pub password_encoder: PasswordEncoder,
    pub secure_cookies: bool,
}

impl SecurityPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: &AppConfig, rules: Vec<Rule>) -> Self {
        Self {
            rules,
            login_page: "/login".to_string(),
            login_failure_url: "/login?error".to_string(),
            default_success_url: "/".to_string(),
            logout_success_url: "/login?logout".to_string(),
            session: TokenSigner::new(
                &config.session_secret,
                TokenKind::Session,
                config.session_ttl_secs,
            ),
            remember_me: TokenSigner::new(
                &config.remember_me_key,
                TokenKind::RememberMe,
                config.remember_me_validity_secs,
            ),
            password_encoder: PasswordEncoder::default(),
            secure_cookies: config.secure_cookies(),
        }
    }

    /// The access rule for a request. Paths no rule matches require authentication.
    pub fn access_for(&self, method: &Method, path: &str) -> &Access {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(|rule| &rule.access)
            .unwrap_or(&FALLBACK_ACCESS)
    }

    /// authorize
    ///
    /// `(principal role, route) -> decision`, with no HTTP plumbing involved.
    pub fn authorize(&self, method: &Method, path: &str, role: Option<Role>) -> Decision {
        self.access_for(method, path).decide(role)
    }

    pub fn session_cookie(&self, token: &str) -> Option<HeaderValue> {
        build_cookie(SESSION_COOKIE, token, None, true, self.secure_cookies)
    }

    pub fn remember_me_cookie(&self, token: &str) -> Option<HeaderValue> {
        build_cookie(
            REMEMBER_ME_COOKIE,
            token,
            Some(self.remember_me.ttl_secs()),
            true,
            self.secure_cookies,
        )
    }

    pub fn csrf_cookie(&self, token: &CsrfToken) -> Option<HeaderValue> {
        build_cookie(CSRF_COOKIE, token.as_str(), None, false, self.secure_cookies)
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[derive(Debug, Default, Deserialize)]
struct CsrfParam {
    #[serde(rename = "_csrf")]
    csrf: Option<String>,
}

/// Finds the token the client submitted: header first, then the query string, then a
/// urlencoded form body. A buffered body is put back into the returned request.
async fn supplied_csrf_token(request: Request) -> Result<(Request, Option<String>), StatusCode> {
    if let Some(token) = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        let token = token.to_string();
        return Ok((request, Some(token)));
    }

    if let Ok(Query(CsrfParam { csrf: Some(token) })) =
        Query::<CsrfParam>::try_from_uri(request.uri())
    {
        return Ok((request, Some(token)));
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, FORM_BODY_LIMIT)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let probe = Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes.clone()))
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let supplied = Form::<CsrfParam>::from_request(probe, &())
        .await
        .ok()
        .and_then(|Form(param)| param.csrf);

    Ok((Request::from_parts(parts, Body::from(bytes)), supplied))
}

/// Resolves the principal from the session cookie, falling back to the remember-me cookie.
/// A remember-me login issues a fresh session cookie; an invalid remember-me cookie is
/// cleared.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    set_cookies: &mut Vec<HeaderValue>,
) -> Result<Option<AuthUser>, RepositoryError> {
    let policy = &state.policy;

    if let Some(user_id) =
        read_cookie(headers, SESSION_COOKIE).and_then(|token| policy.session.verify(&token))
    {
        if let Some(user) = state.repo.find_user(user_id).await? {
            return Ok(Some(user.into()));
        }
        tracing::debug!(user_id, "session refers to a missing user");
    }

    let Some(token) = read_cookie(headers, REMEMBER_ME_COOKIE) else {
        return Ok(None);
    };

    // The token must still carry the fingerprint of the user's current password hash.
    let user = match policy.remember_me.verify_claims(&token) {
        Some(claims) => state
            .repo
            .find_user(claims.sub)
            .await?
            .filter(|user| policy.remember_me.is_bound_to(&claims, &user.senha)),
        None => None,
    };

    match user {
        Some(user) => {
            match policy.session.issue(user.id) {
                Ok(session) => set_cookies.extend(policy.session_cookie(&session)),
                Err(e) => tracing::error!(error = %e, "failed to issue session token"),
            }
            tracing::info!(user_id = user.id, "authenticated from remember-me cookie");
            Ok(Some(user.into()))
        }
        None => {
            set_cookies.extend(expire_cookie(REMEMBER_ME_COOKIE, policy.secure_cookies));
            Ok(None)
        }
    }
}

fn with_cookies(mut response: Response, cookies: Vec<HeaderValue>) -> Response {
    for cookie in cookies {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// security_filter
///
/// Middleware applied to the whole router, including static files and the fallback.
///
/// 1. Ensures the CSRF cookie exists and checks the token on state-changing methods.
/// 2. Looks up the access rule for (method, path).
/// 3. Public rules pass straight through without authentication.
/// 4. Otherwise authenticates and decides: permit, redirect to login, or 403.
pub async fn security_filter(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let policy = state.policy.clone();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let mut set_cookies = Vec::new();

    let csrf = match read_cookie(request.headers(), CSRF_COOKIE) {
        Some(token) => CsrfToken(token),
        None => {
            let token = CsrfToken::generate();
            set_cookies.extend(policy.csrf_cookie(&token));
            token
        }
    };

    let mut request = if is_state_changing(&method) {
        let (request, supplied) = match supplied_csrf_token(request).await {
            Ok(found) => found,
            Err(status) => return with_cookies(status.into_response(), set_cookies),
        };
        let valid = supplied
            .as_deref()
            .is_some_and(|supplied| constant_time_eq(supplied, csrf.as_str()));
        if !valid {
            tracing::warn!(%method, %path, "rejected request with missing or invalid CSRF token");
            return with_cookies(StatusCode::FORBIDDEN.into_response(), set_cookies);
        }
        request
    } else {
        request
    };
    request.extensions_mut().insert(csrf);

    let access = policy.access_for(&method, &path);
    if *access == Access::Public {
        return with_cookies(next.run(request).await, set_cookies);
    }

    let principal = match authenticate(&state, request.headers(), &mut set_cookies).await {
        Ok(principal) => principal,
        Err(e) => return with_cookies(AppError::from(e).into_response(), set_cookies),
    };

    let response = match (access.decide(principal.as_ref().map(|p| p.role)), principal) {
        (Decision::Permit, Some(principal)) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        (Decision::Permit, None) => next.run(request).await,
        (Decision::RedirectToLogin, _) => Redirect::to(&policy.login_page).into_response(),
        (Decision::Forbidden, principal) => {
            tracing::warn!(
                %method,
                %path,
                user_id = principal.as_ref().map(|p| p.id),
                role = principal.as_ref().map(|p| p.role.as_str()),
                "access denied"
            );
            StatusCode::FORBIDDEN.into_response()
        }
    };

    with_cookies(response, set_cookies)
}
