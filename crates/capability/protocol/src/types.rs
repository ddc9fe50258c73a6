//! 协议相关类型定义

use domain::{ConnectionState, PointValueData};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// 支持的协议（封闭集合，按注册表顺序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    Modbus,
    OpcUa,
    Dnp3,
    Iec104,
    Iec61850,
    OpcDa,
    Mqtt,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 7] = [
        Self::Modbus,
        Self::OpcUa,
        Self::Dnp3,
        Self::Iec104,
        Self::Iec61850,
        Self::OpcDa,
        Self::Mqtt,
    ];

    /// 展示名称（映射文件中的 protocol 字段取值）
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Modbus => "Modbus",
            Self::OpcUa => "OPC UA",
            Self::Dnp3 => "DNP3",
            Self::Iec104 => "IEC 60870-5-104",
            Self::Iec61850 => "IEC 61850",
            Self::OpcDa => "OPC DA",
            Self::Mqtt => "MQTT",
        }
    }

    const fn alias(&self) -> &'static str {
        match self {
            Self::Modbus => "modbus",
            Self::OpcUa => "opcua",
            Self::Dnp3 => "dnp3",
            Self::Iec104 => "iec104",
            Self::Iec61850 => "iec61850",
            Self::OpcDa => "opcda",
            Self::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProtocolKind {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.display_name().eq_ignore_ascii_case(value) || kind.alias().eq_ignore_ascii_case(value)
            })
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("unknown protocol: {}", value)))
    }
}

/// 后端选择：真实传输或合成数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    #[default]
    Transport,
    Synthetic,
}

impl FromStr for BackendMode {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "transport" | "real" => Ok(Self::Transport),
            "synthetic" | "simulation" => Ok(Self::Synthetic),
            other => Err(ProtocolError::Config(format!("unknown backend mode: {}", other))),
        }
    }
}

/// 处理器实际使用的后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Transport,
    Simulation,
}

/// 读数质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    /// 尚无数据（如 MQTT 主题还未收到消息）
    Uncertain,
    Bad,
}

/// 单个点位的读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReading {
    /// 读数值；失败时为 None
    pub value: Option<PointValueData>,
    pub quality: Quality,
    /// 时间戳（毫秒）
    pub timestamp_ms: i64,
    /// 带内失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PointReading {
    pub fn good(value: PointValueData) -> Self {
        Self {
            value: Some(value),
            quality: Quality::Good,
            timestamp_ms: now_epoch_ms(),
            error: None,
        }
    }

    pub fn uncertain(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            quality: Quality::Uncertain,
            timestamp_ms: now_epoch_ms(),
            error: Some(reason.into()),
        }
    }

    pub fn bad(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            quality: Quality::Bad,
            timestamp_ms: now_epoch_ms(),
            error: Some(reason.into()),
        }
    }

    pub fn is_good(&self) -> bool {
        self.quality == Quality::Good && self.value.is_some()
    }
}

/// 处理器状态快照（getStatus）
#[derive(Debug, Clone, Serialize)]
pub struct HandlerStatus {
    pub protocol: ProtocolKind,
    pub state: ConnectionState,
    pub connected: bool,
    pub backend: BackendKind,
    /// 当前连接端点（未连接时为 None）
    pub endpoint: Option<String>,
    pub connected_since_ms: Option<i64>,
    pub last_update_ms: Option<i64>,
    pub last_error: Option<String>,
    /// 协议相关诊断字段（点位数量、模式等）
    pub details: Map<String, Value>,
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
