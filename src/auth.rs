//! `hr_auth` session verification.
//!
//! Tokens are HS256 JWTs minted by the login service; this crate only
//! verifies them.

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::HrClaims;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;

/// Name of the session cookie.
pub const AUTH_COOKIE: &str = "hr_auth";

const STATUS_ACTIVE: &str = "active";
const STATUS_PENDING: &str = "pending";

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        // Default validation requires and checks `exp`.
        let validation = Validation::new(Algorithm::HS256);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verifies the signature and expiry and returns the claims.
    pub fn parse(&self, token: &str) -> Result<HrClaims, AppError> {
        let data = decode::<HrClaims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!("Rejected session token: {}", e);
            AppError::Unauthorized("invalid_token".to_string())
        })?;

        let mut claims = data.claims;
        if claims.hr_user_id == 0 || claims.company_id == 0 {
            return Err(AppError::Unauthorized("invalid_token".to_string()));
        }
        if claims.status.trim().is_empty() {
            claims.status = STATUS_ACTIVE.to_string();
        }
        Ok(claims)
    }
}

/// Maps a non-active account status to its public error.
pub fn check_status(claims: &HrClaims) -> Result<(), AppError> {
    match claims.status.as_str() {
        STATUS_ACTIVE => Ok(()),
        STATUS_PENDING => Err(AppError::Forbidden("pending_approval".to_string())),
        _ => Err(AppError::Forbidden("blocked".to_string())),
    }
}

/// Value of cookie `name` from a `Cookie` header.
fn cookie_value<'a>(header_value: &'a str, name: &str) -> Option<&'a str> {
    header_value
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

/// An HR user with a valid session and an active account.
#[derive(Debug, Clone)]
pub struct AuthenticatedHr(pub HrClaims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedHr {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| cookie_value(value, AUTH_COOKIE))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("unauthorized".to_string()))?;

        let claims = state.jwt.parse(token)?;
        check_status(&claims)?;
        Ok(AuthenticatedHr(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_valid_token_defaults_status() {
        let verifier = JwtVerifier::new(SECRET);
        let claims = verifier
            .parse(&token(json!({"hr_user_id": 7, "company_id": 3, "exp": exp()})))
            .unwrap();
        assert_eq!(claims.hr_user_id, 7);
        assert_eq!(claims.company_id, 3);
        assert_eq!(claims.status, "active");
    }

    #[test]
    fn test_rejects_wrong_secret_expired_and_zero_ids() {
        let verifier = JwtVerifier::new("other-secret");
        let err = verifier
            .parse(&token(json!({"hr_user_id": 7, "company_id": 3, "exp": exp()})))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref code) if code == "invalid_token"));

        let verifier = JwtVerifier::new(SECRET);
        let expired = token(json!({"hr_user_id": 7, "company_id": 3, "exp": 1_000_000}));
        assert!(verifier.parse(&expired).is_err());

        let zero = token(json!({"hr_user_id": 0, "company_id": 3, "exp": exp()}));
        assert!(verifier.parse(&zero).is_err());

        let no_exp = token(json!({"hr_user_id": 7, "company_id": 3}));
        assert!(verifier.parse(&no_exp).is_err());
    }

    #[test]
    fn test_status_mapping() {
        let mut claims = HrClaims {
            hr_user_id: 1,
            company_id: 1,
            status: "active".to_string(),
            role: "admin".to_string(),
        };
        assert!(check_status(&claims).is_ok());

        claims.status = "pending".to_string();
        assert!(matches!(check_status(&claims), Err(AppError::Forbidden(ref c)) if c == "pending_approval"));

        claims.status = "suspended".to_string();
        assert!(matches!(check_status(&claims), Err(AppError::Forbidden(ref c)) if c == "blocked"));
    }

    #[test]
    fn test_cookie_value() {
        assert_eq!(cookie_value("a=1; hr_auth=tok; b=2", "hr_auth"), Some("tok"));
        assert_eq!(cookie_value("hr_auth_old=x", "hr_auth"), None);
        assert_eq!(cookie_value("", "hr_auth"), None);
    }
}
