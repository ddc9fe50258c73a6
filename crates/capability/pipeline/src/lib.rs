//! 网关门面：所有对外操作先经过权限检查，再委派给处理器注册表、映射存储与安全管理器。
//!
//! 权限要求：
//! - `configure`：连接/断开、映射增删改、映射文件保存/加载
//! - `manage_users`：创建用户
//! - `read`：读点位、查询状态、列出映射
//! - `write`：写点位
//! - 转发需同时具备 `read` 与 `write`

mod transfer;

use domain::{DataPoint, Mapping, Permission, PointValueData};
use gateway_auth::{AuthError, SecurityManager};
use gateway_mapping::{MappingError, MappingStore, TransformationEngine};
use gateway_protocol::{HandlerRegistry, HandlerStatus, PointReading, ProtocolError, ProtocolHandler};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub use transfer::{TransferOutcome, TransferReport, TransferStatus, run_transfer_loop};

/// 网关门面错误。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不说明拒绝原因（令牌无效、过期或角色不足）
    #[error("access denied")]
    AccessDenied,
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// 权限门控的网关门面。
#[derive(Clone)]
pub struct Gateway {
    handlers: Arc<HandlerRegistry>,
    mappings: Arc<MappingStore>,
    transforms: Arc<TransformationEngine>,
    security: Arc<SecurityManager>,
}

impl Gateway {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        mappings: Arc<MappingStore>,
        transforms: Arc<TransformationEngine>,
        security: Arc<SecurityManager>,
    ) -> Self {
        Self {
            handlers,
            mappings,
            transforms,
            security,
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    fn authorize(&self, token: &str, permission: Permission) -> Result<(), GatewayError> {
        if self.security.check_permission(token, permission) {
            return Ok(());
        }
        gateway_telemetry::record_access_denied();
        warn!(permission = %permission.as_str(), "access denied");
        Err(GatewayError::AccessDenied)
    }

    fn handler(&self, protocol: &str) -> Result<Arc<dyn ProtocolHandler>, GatewayError> {
        self.handlers
            .get(protocol)
            .map_err(|_| GatewayError::UnknownProtocol(protocol.to_string()))
    }

    pub async fn connect(&self, token: &str, protocol: &str, config: Value) -> Result<(), GatewayError> {
        self.authorize(token, Permission::Configure)?;
        self.handler(protocol)?.connect(config).await?;
        Ok(())
    }

    pub async fn disconnect(&self, token: &str, protocol: &str) -> Result<(), GatewayError> {
        self.authorize(token, Permission::Configure)?;
        self.handler(protocol)?.disconnect().await?;
        Ok(())
    }

    pub async fn read_points(
        &self,
        token: &str,
        protocol: &str,
        points: &[Value],
    ) -> Result<Vec<PointReading>, GatewayError> {
        self.authorize(token, Permission::Read)?;
        Ok(self.handler(protocol)?.read_points(points).await?)
    }

    pub async fn write_points(
        &self,
        token: &str,
        protocol: &str,
        points: &[Value],
        values: &[PointValueData],
    ) -> Result<Vec<bool>, GatewayError> {
        self.authorize(token, Permission::Write)?;
        Ok(self.handler(protocol)?.write_points(points, values).await?)
    }

    pub async fn status(&self, token: &str, protocol: &str) -> Result<HandlerStatus, GatewayError> {
        self.authorize(token, Permission::Read)?;
        Ok(self.handler(protocol)?.status().await)
    }

    pub fn list_mappings(&self, token: &str) -> Result<Vec<Mapping>, GatewayError> {
        self.authorize(token, Permission::Read)?;
        Ok(self.mappings.snapshot())
    }

    pub fn add_mapping(
        &self,
        token: &str,
        source: DataPoint,
        destination: DataPoint,
    ) -> Result<usize, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.add_mapping(source, destination))
    }

    pub fn remove_mapping(&self, token: &str, index: usize) -> Result<bool, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.remove_mapping(index))
    }

    pub fn set_transformation(
        &self,
        token: &str,
        index: usize,
        transformation: Option<String>,
    ) -> Result<bool, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.set_transformation(index, transformation))
    }

    pub fn enable_mapping(&self, token: &str, index: usize) -> Result<bool, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.enable(index))
    }

    pub fn disable_mapping(&self, token: &str, index: usize) -> Result<bool, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.disable(index))
    }

    pub fn save_mappings(&self, token: &str, path: impl AsRef<Path>) -> Result<(), GatewayError> {
        self.authorize(token, Permission::Configure)?;
        self.mappings.save_to_file(path)?;
        Ok(())
    }

    pub fn load_mappings(&self, token: &str, path: impl AsRef<Path>) -> Result<usize, GatewayError> {
        self.authorize(token, Permission::Configure)?;
        Ok(self.mappings.load_from_file(path)?)
    }

    pub fn create_user(
        &self,
        token: &str,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<(), GatewayError> {
        self.authorize(token, Permission::ManageUsers)?;
        self.security.create_user(username, password, role)?;
        Ok(())
    }

    /// 关闭清扫：断开全部处理器
    pub async fn shutdown(&self) {
        self.handlers.close_all().await;
    }
}
