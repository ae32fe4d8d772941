use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
};
use chrono::Utc;
use cookie::{Cookie, SameSite, time::Duration};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::{Role, User};

pub const SESSION_COOKIE: &str = "SESSION";
pub const REMEMBER_ME_COOKIE: &str = "remember-me";
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";

/// TokenKind
///
/// Distinguishes the two signed cookies so one can never be replayed as the other,
/// even if both signers were configured with the same secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    RememberMe,
}

/// Claims
///
/// Payload of the session and remember-me tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the `usuarios.id` of the principal.
    pub sub: i64,
    /// Issued At (iat), seconds since the epoch.
    pub iat: i64,
    /// Expiration Time (exp). Always validated.
    pub exp: i64,
    pub kind: TokenKind,
    /// Fingerprint of the stored password hash. Only remember-me tokens carry it, so
    /// changing the password revokes every outstanding remember-me cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
}

/// TokenSigner
///
/// Issues and verifies one kind of HS256-signed token with a fixed lifetime.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    secret: Vec<u8>,
    kind: TokenKind,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, kind: TokenKind, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            secret: secret.as_bytes().to_vec(),
            kind,
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, user_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    /// Issues a token as if the current time were `now`. Used to mint expired tokens in tests.
    pub fn issue_at(&self, user_id: i64, now: i64) -> Result<String, jsonwebtoken::errors::Error> {
        self.encode_claims(user_id, None, now)
    }

    /// Issues a token bound to the user's current password hash (see `is_bound_to`).
    pub fn issue_bound(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let fingerprint = self.fingerprint(&user.senha);
        self.encode_claims(user.id, Some(fingerprint), Utc::now().timestamp())
    }

    fn encode_claims(
        &self,
        user_id: i64,
        fp: Option<String>,
        now: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id,
            iat: now,
            exp: now + self.ttl_secs,
            kind: self.kind,
            fp,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Returns the subject of a valid, unexpired token of this signer's kind.
    pub fn verify(&self, token: &str) -> Option<i64> {
        self.verify_claims(token).map(|claims| claims.sub)
    }

    pub fn verify_claims(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;

        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) if data.claims.kind == self.kind => Some(data.claims),
            Ok(_) => {
                tracing::debug!(expected = ?self.kind, "token kind mismatch");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, kind = ?self.kind, "token rejected");
                None
            }
        }
    }

    /// Keyed SHA-256 of a credential, hex encoded. Forging it needs both this signer's
    /// secret and the stored hash.
    pub fn fingerprint(&self, credential: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update([0u8]);
        hasher.update(credential.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True only when the claims carry the fingerprint of `credential`. Unbound claims
    /// never match.
    pub fn is_bound_to(&self, claims: &Claims, credential: &str) -> bool {
        claims
            .fp
            .as_deref()
            .is_some_and(|fp| constant_time_eq(fp, &self.fingerprint(credential)))
    }
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// AuthUser
///
/// The resolved identity of an authenticated request. The security filter re-loads the
/// user from the repository on every request and stores this in the request extensions;
/// handlers receive it as an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub nome: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            nome: user.nome,
            email: user.email,
            role: user.perfil,
        }
    }
}

/// Rejection: 401 when the security filter did not attach a principal. That only
/// happens on routes the permission table marks as public.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// CsrfToken
///
/// The request's double-submit token, exposed to views as `_csrf` so forms can echo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CsrfToken>()
            .cloned()
            .ok_or(StatusCode::FORBIDDEN)
    }
}

/// PasswordEncoder
///
/// One-way adaptive hashing (bcrypt). Plaintext passwords only ever pass through
/// `encode` and `matches`; neither logs its input.
#[derive(Debug, Clone, Copy)]
pub struct PasswordEncoder {
    cost: u32,
}

impl Default for PasswordEncoder {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordEncoder {
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    pub fn encode(&self, raw: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(raw, self.cost)
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn matches(&self, raw: &str, hash: &str) -> bool {
        match bcrypt::verify(raw, hash) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is not a valid bcrypt hash");
                false
            }
        }
    }
}

// --- Cookie helpers ---

/// Reads a cookie value from every `Cookie` header of the request.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Builds a `Set-Cookie` value scoped to the whole site.
///
/// `http_only` is false only for the CSRF cookie, which client scripts must be able to read.
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age_secs: Option<i64>,
    http_only: bool,
    secure: bool,
) -> Option<HeaderValue> {
    let mut cookie = Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(http_only)
        .secure(secure);
    if let Some(max_age) = max_age_secs {
        cookie = cookie.max_age(Duration::seconds(max_age));
    }
    HeaderValue::from_str(&cookie.build().to_string()).ok()
}

/// A `Set-Cookie` value that removes the cookie from the browser.
pub fn expire_cookie(name: &str, secure: bool) -> Option<HeaderValue> {
    build_cookie(name, "", Some(0), true, secure)
}
