use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// HS256 access-token verifier for the sync endpoints
pub struct JwtVerifier {
    key: DecodingKey,
    clock_skew: std::time::Duration,
}

impl JwtVerifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();

        let decoded = decode::<Claims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }

        Ok(AuthenticatedUser {
            user_id: decoded.claims.sub,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: i64,
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    const SECRET: &str = "a-sufficiently-long-signing-secret-value";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier {
            key: DecodingKey::from_secret(SECRET.as_bytes()),
            clock_skew: std::time::Duration::from_secs(60),
        }
    }

    fn token_for(sub: &str, exp: i64) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_user() {
        let exp = chrono::Utc::now().timestamp() + 300;
        let user = verifier()
            .verify_access_token(&token_for("user-a", exp))
            .unwrap();
        assert_eq!(user.user_id, "user-a");
    }

    #[test]
    fn expired_token_is_rejected() {
        let exp = chrono::Utc::now().timestamp() - 300;
        assert!(verifier()
            .verify_access_token(&token_for("user-a", exp))
            .is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let exp = chrono::Utc::now().timestamp() + 300;
        let forged = encode(
            &Header::default(),
            &TestClaims {
                sub: "user-a".to_string(),
                exp,
            },
            &EncodingKey::from_secret(b"some-other-equally-long-signing-secret"),
        )
        .unwrap();
        assert!(verifier().verify_access_token(&forged).is_err());
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }
}
