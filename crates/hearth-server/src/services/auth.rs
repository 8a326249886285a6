//! Token validation
//!
//! Tokens are issued by the household identity service; this server only
//! checks them.

use anyhow::Result;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

pub struct AuthService {
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    /// Verify an HS256 token and return its subject (the username).
    pub fn validate_token(&self, token: &str) -> Result<String> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        if token_data.claims.sub.is_empty() {
            anyhow::bail!("token has an empty subject");
        }
        Ok(token_data.claims.sub)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // username
    pub exp: i64,    // expiration time
    #[serde(default)]
    pub iat: i64, // issued at
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, sub: &str, ttl: chrono::Duration) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
