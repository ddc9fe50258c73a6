//! 安全能力：用户注册表、口令派生、令牌签发与校验、基于角色的权限检查、敏感数据加解密。
//!
//! 对外的 `authenticate` / `verify_token` / `check_permission` 不区分失败原因，
//! 统一返回 `None` / `false`；具体原因只写入日志与计数器。

mod cipher;
mod jwt;
mod password;

use cipher::DataCipher;
use domain::{Permission, Role};
use jwt::TokenManager;
use password::PasswordHash;
use rand_core::{OsRng, RngCore};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};

pub use jwt::TokenClaims;

/// 认证相关错误。
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// 默认令牌有效期（8 小时）
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 8 * 60 * 60;
/// 默认 PBKDF2 迭代次数
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

/// 安全参数。
#[derive(Clone)]
pub struct SecuritySettings {
    /// 令牌签名密钥（与加密密钥相互独立）
    pub token_secret: Vec<u8>,
    /// 加密密钥材料；None 时随机生成（重启后旧密文不可解）
    pub encryption_key: Option<Vec<u8>>,
    pub token_ttl_seconds: u64,
    pub password_iterations: u32,
}

impl SecuritySettings {
    /// 未提供的密钥随机生成。
    pub fn new(
        token_secret: Option<String>,
        encryption_key: Option<String>,
        token_ttl_seconds: u64,
        password_iterations: u32,
    ) -> Self {
        let token_secret = match token_secret {
            Some(secret) => secret.into_bytes(),
            None => {
                warn!("no token secret configured, tokens will not survive a restart");
                random_secret()
            }
        };
        if encryption_key.is_none() {
            warn!("no encryption key configured, encrypted data will not survive a restart");
        }
        Self {
            token_secret,
            encryption_key: encryption_key.map(String::into_bytes),
            token_ttl_seconds,
            password_iterations,
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            token_secret: random_secret(),
            encryption_key: None,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
        }
    }
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

struct UserRecord {
    password: PasswordHash,
    role: Role,
}

/// 安全管理器（进程内唯一）。
pub struct SecurityManager {
    users: RwLock<HashMap<String, UserRecord>>,
    tokens: TokenManager,
    cipher: DataCipher,
    password_iterations: u32,
    /// 未知用户认证时参与比较，保持耗时一致
    decoy: PasswordHash,
}

impl SecurityManager {
    pub fn new(settings: SecuritySettings) -> Result<Self, AuthError> {
        if settings.token_ttl_seconds == 0 {
            return Err(AuthError::InvalidSettings("token ttl must be positive".to_string()));
        }
        if settings.password_iterations == 0 {
            return Err(AuthError::InvalidSettings(
                "password iterations must be positive".to_string(),
            ));
        }
        if settings.token_secret.is_empty() {
            return Err(AuthError::InvalidSettings("token secret is empty".to_string()));
        }

        let cipher = match settings.encryption_key.as_deref() {
            Some(key) if !key.is_empty() => DataCipher::new(key),
            _ => DataCipher::generate_random(),
        };
        Ok(Self {
            users: RwLock::new(HashMap::new()),
            tokens: TokenManager::new(settings.token_secret, settings.token_ttl_seconds),
            cipher,
            password_iterations: settings.password_iterations,
            decoy: PasswordHash::generate("", settings.password_iterations),
        })
    }

    /// 创建用户；同名用户整体覆盖。
    pub fn create_user(&self, username: &str, password: &str, role: &str) -> Result<(), AuthError> {
        let role = role
            .parse::<Role>()
            .map_err(|_| AuthError::InvalidRole(role.to_string()))?;
        if username.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        // 派生在锁外完成，写锁只覆盖插入
        let record = UserRecord {
            password: PasswordHash::generate(password, self.password_iterations),
            role,
        };
        let mut users = self
            .users
            .write()
            .map_err(|_| AuthError::Internal("user registry poisoned".to_string()))?;
        let replaced = users.insert(username.to_string(), record).is_some();
        info!(username = %username, role = %role.as_str(), replaced, "user created");
        Ok(())
    }

    /// 认证成功返回令牌；用户不存在与口令错误不可区分。
    pub fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        let result = self.try_authenticate(username, password);
        gateway_telemetry::record_auth(result.is_ok());
        match result {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(username = %username, error = %err, "authentication failed");
                None
            }
        }
    }

    fn try_authenticate(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let found = {
            let users = self
                .users
                .read()
                .map_err(|_| AuthError::Internal("user registry poisoned".to_string()))?;
            users
                .get(username)
                .map(|user| (user.password.clone(), user.role))
        };

        match found {
            Some((hash, role)) if hash.verify(password, self.password_iterations) => {
                self.generate_token(username, role)
            }
            Some(_) => Err(AuthError::InvalidCredentials),
            None => {
                let _ = self.decoy.verify(password, self.password_iterations);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// 签发令牌（username、role、过期时间）。
    pub fn generate_token(&self, username: &str, role: Role) -> Result<String, AuthError> {
        self.tokens.issue(username, role)
    }

    /// 校验签名与过期时间；任何失败返回 None。
    pub fn verify_token(&self, token: &str) -> Option<TokenClaims> {
        match self.tokens.decode(token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                debug!(error = %err, "token rejected");
                None
            }
        }
    }

    /// 令牌有效且其角色拥有该权限。
    pub fn check_permission(&self, token: &str, permission: Permission) -> bool {
        self.verify_token(token)
            .is_some_and(|claims| claims.role.allows(permission))
    }

    /// 按权限编码检查；未知编码视为无权限。
    pub fn check_permission_str(&self, token: &str, permission: &str) -> bool {
        match permission.parse::<Permission>() {
            Ok(permission) => self.check_permission(token, permission),
            Err(_) => false,
        }
    }

    pub fn encrypt_data(&self, data: &str) -> Result<String, AuthError> {
        self.cipher.encrypt(data)
    }

    pub fn decrypt_data(&self, encrypted: &str) -> Result<String, AuthError> {
        self.cipher.decrypt(encrypted)
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.users
            .read()
            .map(|users| users.contains_key(username))
            .unwrap_or(false)
    }

    pub fn user_role(&self, username: &str) -> Option<Role> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(username).map(|user| user.role))
    }
}
