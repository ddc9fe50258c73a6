//! 网关驱动程序：装配安全管理、处理器注册表与映射存储，周期性转发直到 Ctrl-C。

use gateway_auth::{SecurityManager, SecuritySettings};
use gateway_config::GatewayConfig;
use gateway_mapping::{MappingStore, TransformationEngine};
use gateway_pipeline::{Gateway, GatewayError, run_transfer_loop};
use gateway_protocol::{BackendMode, HandlerRegistry};
use gateway_telemetry::init_tracing;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = GatewayConfig::from_env()?;
    init_tracing();

    let run_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("gateway", run_id = %run_id);
    run(config).instrument(span).await
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mode: BackendMode = config.backend.parse()?;
    info!(backend = ?mode, mapping_file = %config.mapping_file.display(), "gateway starting");

    let security = Arc::new(SecurityManager::new(SecuritySettings::new(
        config.token_secret.clone(),
        config.encryption_key.clone(),
        config.token_ttl_seconds,
        config.password_iterations,
    ))?);
    let admin = match (&config.admin_username, &config.admin_password) {
        (Some(username), Some(password)) => {
            security.create_user(username, password, "admin")?;
            Some((username.clone(), password.clone()))
        }
        _ => None,
    };

    let mappings = Arc::new(MappingStore::new());
    if config.mapping_file.exists() {
        match mappings.load_from_file(&config.mapping_file) {
            Ok(count) => info!(count, "mapping file loaded"),
            Err(err) => warn!(error = %err, "mapping file ignored"),
        }
    }
    let gateway = Arc::new(Gateway::new(
        Arc::new(HandlerRegistry::initialize(mode)),
        mappings,
        Arc::new(TransformationEngine::new()),
        security.clone(),
    ));

    match admin {
        Some((username, password)) => {
            let token = security
                .authenticate(&username, &password)
                .ok_or("admin authentication failed")?;
            if let Some(path) = &config.connections_file {
                connect_from_file(&gateway, &token, path).await?;
            }
            drive(
                &gateway,
                &security,
                (username.as_str(), password.as_str()),
                token,
                Duration::from_millis(config.transfer_interval_ms),
            )
            .await?;
        }
        None => {
            warn!("no admin account configured, transfer loop disabled");
            tokio::signal::ctrl_c().await?;
        }
    }

    gateway.shutdown().await;
    if let Err(err) = gateway.mappings().save_to_file(&config.mapping_file) {
        error!(error = %err, "failed to save mapping file");
    }
    info!("gateway stopped");
    Ok(())
}

/// 运行转发循环直到 Ctrl-C；令牌过期后重新认证并继续
async fn drive(
    gateway: &Arc<Gateway>,
    security: &SecurityManager,
    (username, password): (&str, &str),
    mut token: String,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    loop {
        let mut task = tokio::spawn(run_transfer_loop(
            gateway.clone(),
            token.clone(),
            interval,
            shutdown_rx.clone(),
        ));
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
                if let Err(err) = task.await {
                    warn!(error = %err, "transfer loop task failed");
                }
                return Ok(());
            }
            finished = &mut task => match finished {
                Ok(Err(GatewayError::AccessDenied)) => {
                    info!("transfer token rejected, re-authenticating");
                    token = security
                        .authenticate(username, password)
                        .ok_or("admin re-authentication failed")?;
                }
                Ok(result) => return result.map_err(Into::into),
                Err(err) => return Err(err.into()),
            },
        }
    }
}

/// 连接配置文件中列出的处理器；单个失败只记录日志
async fn connect_from_file(
    gateway: &Gateway,
    token: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    for (protocol, connect_config) in read_connections(path)? {
        match gateway.connect(token, &protocol, connect_config).await {
            Ok(()) => info!(protocol = %protocol, "handler connected"),
            Err(err) => warn!(protocol = %protocol, error = %err, "handler connect failed"),
        }
    }
    Ok(())
}

/// 读取 `{协议名: connect 配置}`
fn read_connections(path: &Path) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(format!("{} must contain a JSON object", path.display()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_file_must_be_an_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let valid = dir.path().join("connections.json");
        std::fs::write(
            &valid,
            r#"{"Modbus": {"host": "10.0.0.5", "port": 502}, "MQTT": {"broker": "localhost"}}"#,
        )
        .expect("write");
        let connections = read_connections(&valid).expect("read");
        assert_eq!(connections.len(), 2);
        assert_eq!(connections["Modbus"]["host"], "10.0.0.5");

        let invalid = dir.path().join("list.json");
        std::fs::write(&invalid, "[1, 2]").expect("write");
        assert!(read_connections(&invalid).is_err());
    }
}
