//! 网关运行配置加载。

use std::env;
use std::path::PathBuf;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `transport` 或 `synthetic`
    pub backend: String,
    /// 令牌签名密钥；未设置时启动随机生成
    pub token_secret: Option<String>,
    /// 加密密钥材料；未设置时启动随机生成
    pub encryption_key: Option<String>,
    pub token_ttl_seconds: u64,
    pub password_iterations: u32,
    pub mapping_file: PathBuf,
    /// 启动时自动连接的协议配置 `{协议名: connect 配置}`
    pub connections_file: Option<PathBuf>,
    pub transfer_interval_ms: u64,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl GatewayConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = read_backend("GATEWAY_BACKEND")?;
        let token_secret = read_optional("GATEWAY_TOKEN_SECRET");
        let encryption_key = read_optional("GATEWAY_ENCRYPTION_KEY");
        let token_ttl_seconds = read_positive_u64("GATEWAY_TOKEN_TTL_SECONDS", 28_800)?;
        let password_iterations = read_positive_u32("GATEWAY_PASSWORD_ITERATIONS", 100_000)?;
        let mapping_file = PathBuf::from(
            read_optional("GATEWAY_MAPPING_FILE").unwrap_or_else(|| "mappings.json".to_string()),
        );
        let connections_file = read_optional("GATEWAY_CONNECTIONS_FILE").map(PathBuf::from);
        let transfer_interval_ms = read_positive_u64("GATEWAY_TRANSFER_INTERVAL_MS", 1000)?;
        let admin_username = read_optional("GATEWAY_ADMIN_USERNAME");
        let admin_password = read_optional("GATEWAY_ADMIN_PASSWORD");
        if admin_username.is_some() && admin_password.is_none() {
            return Err(ConfigError::Missing("GATEWAY_ADMIN_PASSWORD".to_string()));
        }

        Ok(Self {
            backend,
            token_secret,
            encryption_key,
            token_ttl_seconds,
            password_iterations,
            mapping_file,
            connections_file,
            transfer_interval_ms,
            admin_username,
            admin_password,
        })
    }
}

fn read_backend(key: &str) -> Result<String, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value.to_ascii_lowercase(),
        None => return Ok("transport".to_string()),
    };
    match value.as_str() {
        "transport" | "real" | "synthetic" | "simulation" => Ok(value),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_positive_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_positive_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
