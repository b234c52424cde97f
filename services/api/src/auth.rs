//! Bearer token handling.
//!
//! Two deliberately separate paths:
//!
//! - [`UntrustedClaims::peek`] reads the token payload without checking its
//!   signature. Its output only namespaces storage keys and must never gate
//!   access to anything.
//! - [`TokenVerifier::verify`] checks the HS256 signature, expiry and
//!   audience. Routes that control access go through [`AuthenticatedUser`].

use crate::api::AppState;
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::upload::sanitize_path_component;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, warn};

/// JWT segments are base64url; tolerate producers that keep the padding.
const TOKEN_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Token verification errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token verification is not configured")]
    VerificationUnavailable,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Claims read from a token payload without verification
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct UntrustedClaims {
    pub sub: Option<String>,
}

impl UntrustedClaims {
    /// Decode the payload segment of `token`. No signature check is made.
    pub fn peek(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;

        let decoded = match TOKEN_SEGMENT.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Failed to decode token payload");
                return None;
            }
        };

        match serde_json::from_slice(&decoded) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(error = %e, "Token payload is not a JSON object");
                None
            }
        }
    }
}

/// Claims of a token whose signature has been checked
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// HS256 verifier for Supabase Auth access tokens
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Build a verifier when a secret is configured
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        config
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Self::new(secret, &config.audience))
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        decode::<VerifiedClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Optional caller identity for non-authorizing uses.
///
/// `owner` comes from [`UntrustedClaims`] and only namespaces storage keys.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub token: Option<String>,
    pub owner: Option<String>,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let token = bearer_token(headers).map(str::to_string);
        let owner = token
            .as_deref()
            .and_then(UntrustedClaims::peek)
            .and_then(|claims| claims.sub)
            .filter(|sub| !sub.is_empty());

        Self { token, owner }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Caller whose bearer token passed verification
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub token: String,
    pub claims: VerifiedClaims,
}

impl AuthenticatedUser {
    /// Keys under `{sub}/` belong to this user, with `sub` sanitized the
    /// same way it is when the key is built
    pub fn owns(&self, key: &str) -> bool {
        let owner = sanitize_path_component(&self.claims.sub);
        key.strip_prefix(owner.as_str())
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let verifier = state
            .verifier
            .as_ref()
            .ok_or(AuthError::VerificationUnavailable)?;

        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = verifier.verify(token)?;

        debug!(sub = %claims.sub, "Bearer token verified");

        Ok(Self {
            token: token.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const TEST_SECRET: &str = "super-secret-jwt-token-for-tests";

    /// Unsigned token carrying `payload`
    fn unsigned_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.not-a-signature")
    }

    /// Token signed with [`TEST_SECRET`]
    fn signed_token(sub: &str, exp_offset_secs: i64) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = json!({
            "sub": sub,
            "aud": "authenticated",
            "exp": now + exp_offset_secs,
            "role": "authenticated",
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers_with("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_peek_reads_sub_without_verification() {
        let token = unsigned_token(json!({ "sub": "user-123" }));
        let claims = UntrustedClaims::peek(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-123"));
    }

    #[test]
    fn test_peek_accepts_padded_payload() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"u1"}"#);
        let token = format!("h.{padded}.s");
        assert_eq!(
            UntrustedClaims::peek(&token).and_then(|c| c.sub).as_deref(),
            Some("u1")
        );
    }

    #[test]
    fn test_peek_rejects_garbage() {
        assert!(UntrustedClaims::peek("not-a-jwt").is_none());
        assert!(UntrustedClaims::peek("a.!!!.c").is_none());
        let not_json = URL_SAFE_NO_PAD.encode("plain text");
        assert!(UntrustedClaims::peek(&format!("a.{not_json}.c")).is_none());
    }

    #[test]
    fn test_caller_from_headers() {
        let token = unsigned_token(json!({ "sub": "user-123" }));
        let caller = Caller::from_headers(&headers_with(&format!("Bearer {token}")));
        assert_eq!(caller.owner.as_deref(), Some("user-123"));
        assert_eq!(caller.token.as_deref(), Some(token.as_str()));

        let anonymous = Caller::from_headers(&HeaderMap::new());
        assert!(anonymous.token.is_none());
        assert!(anonymous.owner.is_none());
    }

    #[test]
    fn test_verifier_accepts_valid_token() {
        let verifier = TokenVerifier::new(TEST_SECRET, "authenticated");
        let claims = verifier.verify(&signed_token("user-123", 3600)).unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.role.as_deref(), Some("authenticated"));
    }

    #[test]
    fn test_verifier_rejects_unsigned_and_expired_tokens() {
        let verifier = TokenVerifier::new(TEST_SECRET, "authenticated");

        let forged = unsigned_token(json!({ "sub": "user-123", "aud": "authenticated", "exp": u32::MAX }));
        assert!(matches!(verifier.verify(&forged), Err(AuthError::InvalidToken(_))));

        let expired = signed_token("user-123", -3600);
        assert!(verifier.verify(&expired).is_err());
    }

    #[test]
    fn test_verifier_rejects_wrong_secret() {
        let verifier = TokenVerifier::new("a-different-secret", "authenticated");
        assert!(verifier.verify(&signed_token("user-123", 3600)).is_err());
    }

    #[test]
    fn test_ownership_requires_prefix_boundary() {
        let user = AuthenticatedUser {
            token: String::new(),
            claims: VerifiedClaims {
                sub: "user-1".to_string(),
                exp: 0,
                email: None,
                role: None,
            },
        };

        assert!(user.owns("user-1/abc.jpeg"));
        assert!(!user.owns("user-12/abc.jpeg"));
        assert!(!user.owns("abc.jpeg"));
    }

    #[test]
    fn test_ownership_matches_sanitized_subject() {
        let user = AuthenticatedUser {
            token: String::new(),
            claims: VerifiedClaims {
                sub: "auth0|user.1".to_string(),
                exp: 0,
                email: None,
                role: None,
            },
        };

        let key = crate::upload::object_key(Some("auth0|user.1"), &uuid::Uuid::nil(), "jpeg");
        assert_eq!(key, "auth0_user_1/00000000-0000-0000-0000-000000000000.jpeg");
        assert!(user.owns(&key));
        assert!(!user.owns("auth0|user.1/abc.jpeg"));
    }
}
