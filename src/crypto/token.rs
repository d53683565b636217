use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::Role,
};

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user the token was issued to.
    pub sub: Uuid,
    /// The role at issue time. The stored role is authoritative.
    pub role: Role,
    /// Expiry as a UNIX timestamp.
    pub exp: usize,
}

/// Verifies an HS256 access token and returns its claims.
///
/// # Arguments
///
/// * `token` - The encoded token, without the `Bearer ` prefix.
/// * `secret` - The shared HMAC secret.
///
/// # Returns
///
/// The decoded `Claims`, or `AppError::Authentication` if the signature,
/// expiry or shape is invalid.
pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            AppError::Authentication("Invalid or expired token".to_string())
        })
}

#[cfg(test)]
pub const TEST_SECRET: &str = "test-secret-0123456789";

/// Signs a token the way the identity service does. Tokens are never issued in production code.
#[cfg(test)]
pub fn issue_access_token(user_id: Uuid, role: Role, secret: &str, ttl: chrono::Duration) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = Claims {
        sub: user_id,
        role,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = TEST_SECRET;

    #[test]
    fn accepts_a_valid_token() {
        let id = Uuid::new_v4();
        let token = issue_access_token(id, Role::Trainer, SECRET, Duration::minutes(5));
        let claims = verify_access_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Trainer);
    }

    #[test]
    fn rejects_a_wrong_secret() {
        let token = issue_access_token(Uuid::new_v4(), Role::Client, SECRET, Duration::minutes(5));
        let err = verify_access_token(&token, "another-secret-abcdef").unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[test]
    fn rejects_an_expired_token() {
        let token = issue_access_token(Uuid::new_v4(), Role::Admin, SECRET, Duration::hours(-1));
        assert!(verify_access_token(&token, SECRET).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(verify_access_token("not-a-token", SECRET).is_err());
    }
}
