use crate::AuthError;
use domain::Role;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
/// JWT 内部 claims。
struct Claims {
    sub: String,
    role: String,
    iat: u64,
    exp: u64,
    jti: String,
}

/// 校验通过的令牌内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub username: String,
    pub role: Role,
    /// 过期时间（秒级时间戳）
    pub exp: u64,
}

/// JWT 生成与校验（HS256，过期判定无宽限）。
pub(crate) struct TokenManager {
    secret: Vec<u8>,
    ttl_seconds: u64,
}

impl TokenManager {
    pub(crate) fn new(secret: Vec<u8>, ttl_seconds: u64) -> Self {
        Self {
            secret,
            ttl_seconds,
        }
    }

    pub(crate) fn issue(&self, username: &str, role: Role) -> Result<String, AuthError> {
        let iat = now_epoch_seconds();
        let claims = Claims {
            sub: username.to_string(),
            role: role.as_str().to_string(),
            iat,
            exp: iat + self.ttl_seconds,
            jti: Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| AuthError::Internal(err.to_string()))
    }

    pub(crate) fn decode(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        let decoded = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(map_jwt_error)?;

        let role = decoded
            .claims
            .role
            .parse::<Role>()
            .map_err(|_| AuthError::TokenInvalid)?;
        Ok(TokenClaims {
            username: decoded.claims.sub,
            role,
            exp: decoded.claims.exp,
        })
    }
}

/// 当前时间戳（秒）。
fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 将 jwt 库错误映射为业务错误。
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    }
}
