//! IEC 61850 (MMS) 处理器
//!
//! 真实后端建立到 `host:port` 的 TCP 链路；MMS 服务尚未接入，点位读写以带内失败返回。
//! 报告订阅与数据集是处理器本地缓存，断开即清空。

use crate::error::ProtocolError;
use crate::handler::{Handler, ProtocolHandler, ProtocolSpec, Transport};
use crate::link::connect_tcp;
use crate::synthetic::Signal;
use crate::types::{BackendKind, ProtocolKind, now_epoch_ms};
use async_trait::async_trait;
use domain::{ConnectionState, PointValueData};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Iec61850Authentication {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Iec61850Tls {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub certificate_path: String,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub ca_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec61850Mms {
    #[serde(default)]
    pub local_ap_title: String,
    #[serde(default)]
    pub remote_ap_title: String,
    #[serde(default = "default_ae_qualifier")]
    pub local_ae_qualifier: u32,
    #[serde(default = "default_ae_qualifier")]
    pub remote_ae_qualifier: u32,
}

impl Default for Iec61850Mms {
    fn default() -> Self {
        Self {
            local_ap_title: String::new(),
            remote_ap_title: String::new(),
            local_ae_qualifier: default_ae_qualifier(),
            remote_ae_qualifier: default_ae_qualifier(),
        }
    }
}

fn default_ae_qualifier() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec61850Config {
    pub host: String,
    #[serde(default = "default_mms_port")]
    pub port: u16,
    #[serde(default)]
    pub authentication: Iec61850Authentication,
    #[serde(default)]
    pub tls: Iec61850Tls,
    #[serde(default)]
    pub mms: Iec61850Mms,
    #[serde(default)]
    pub report_control_blocks: Vec<String>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    /// 建立 TCP 链路的超时，与轮询周期无关
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_mms_port() -> u16 {
    102
}

fn default_polling_interval() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    10_000
}

/// 数据属性点位，对象引用为 `LD/LN.DO.DA`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iec61850Point {
    pub logical_device: String,
    pub logical_node: String,
    pub data_object: String,
    pub data_attribute: String,
}

impl Iec61850Point {
    pub fn object_reference(&self) -> String {
        format!(
            "{}/{}.{}.{}",
            self.logical_device, self.logical_node, self.data_object, self.data_attribute
        )
    }

    /// 解析 `LD/LN.DO.DA`；数据属性可以含多级（如 `mag.f`）
    pub fn parse(reference: &str) -> Option<Self> {
        let (logical_device, rest) = reference.split_once('/')?;
        let mut parts = rest.splitn(3, '.');
        let logical_node = parts.next()?;
        let data_object = parts.next()?;
        let data_attribute = parts.next()?;
        [logical_device, logical_node, data_object, data_attribute]
            .iter()
            .all(|part| !part.is_empty())
            .then(|| Self {
                logical_device: logical_device.to_string(),
                logical_node: logical_node.to_string(),
                data_object: data_object.to_string(),
                data_attribute: data_attribute.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSubscription {
    pub enabled: bool,
    pub last_report_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub members: Vec<String>,
    pub created_at_ms: i64,
}

/// 处理器本地缓存
#[derive(Debug, Default)]
pub struct Iec61850Session {
    reports: BTreeMap<String, ReportSubscription>,
    datasets: BTreeMap<String, Dataset>,
}

/// 由已知对象引用汇总出的服务器模型
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerModel {
    pub logical_devices: Vec<String>,
    pub logical_nodes: Vec<String>,
    pub data_objects: Vec<String>,
    pub data_attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub connected_since_ms: Option<i64>,
    pub active_reports: usize,
    pub active_datasets: usize,
    pub last_communication_ms: Option<i64>,
}

pub struct Iec61850;

impl ProtocolSpec for Iec61850 {
    type Config = Iec61850Config;
    type Point = Iec61850Point;
    type Session = Iec61850Session;

    const KIND: ProtocolKind = ProtocolKind::Iec61850;

    fn template() -> Value {
        json!({
            "host": "",
            "port": default_mms_port(),
            "authentication": {
                "username": "",
                "password": ""
            },
            "tls": {
                "enabled": false,
                "certificate_path": "",
                "private_key_path": "",
                "ca_path": ""
            },
            "mms": {
                "local_ap_title": "",
                "remote_ap_title": "",
                "local_ae_qualifier": default_ae_qualifier(),
                "remote_ae_qualifier": default_ae_qualifier()
            },
            "report_control_blocks": [],
            "polling_interval_ms": default_polling_interval(),
            "connect_timeout_ms": default_connect_timeout()
        })
    }

    fn validate(config: &Iec61850Config) -> Result<(), ProtocolError> {
        if config.host.trim().is_empty() {
            return Err(ProtocolError::Config("host is empty".to_string()));
        }
        if config.tls.enabled {
            return Err(ProtocolError::Config("TLS transport is not available".to_string()));
        }
        if config.polling_interval_ms == 0 {
            return Err(ProtocolError::Config("polling_interval_ms must be positive".to_string()));
        }
        if config.connect_timeout_ms == 0 {
            return Err(ProtocolError::Config("connect_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    fn endpoint(config: &Iec61850Config) -> String {
        format!("{}:{}", config.host, config.port)
    }

    fn point_key(point: &Iec61850Point) -> String {
        point.object_reference()
    }

    fn signal(point: &Iec61850Point) -> Signal {
        match point.data_attribute.as_str() {
            "stVal" => Signal::Binary,
            "actVal" | "cnt" => Signal::Counter { max: 1_000_000 },
            _ => Signal::default(),
        }
    }

    fn status_details(config: &Iec61850Config, session: &Iec61850Session) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("polling_interval_ms".to_string(), Value::from(config.polling_interval_ms));
        details.insert("active_reports".to_string(), Value::from(session.reports.len()));
        details.insert("active_datasets".to_string(), Value::from(session.datasets.len()));
        details
    }
}

/// IEC 61850 传输后端
#[derive(Default)]
pub struct Iec61850Transport {
    stream: Option<TcpStream>,
}

impl Iec61850Transport {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_link(&self) -> Result<(), ProtocolError> {
        match self.stream {
            Some(_) => Ok(()),
            None => Err(ProtocolError::Connection("link closed".to_string())),
        }
    }
}

#[async_trait]
impl Transport<Iec61850> for Iec61850Transport {
    fn kind(&self) -> BackendKind {
        BackendKind::Transport
    }

    async fn open(&mut self, config: &Iec61850Config) -> Result<(), ProtocolError> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        self.stream = Some(connect_tcp(&config.host, config.port, connect_timeout).await?);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn read(&mut self, point: &Iec61850Point) -> Result<Option<PointValueData>, ProtocolError> {
        self.ensure_link()?;
        Err(ProtocolError::Unsupported(format!("MMS read of {}", point.object_reference())))
    }

    async fn write(&mut self, point: &Iec61850Point, _value: &PointValueData) -> Result<(), ProtocolError> {
        self.ensure_link()?;
        Err(ProtocolError::Unsupported(format!("MMS write of {}", point.object_reference())))
    }
}

impl Handler<Iec61850> {
    /// 订阅报告控制块，返回当前订阅总数
    pub async fn subscribe_reports(&self, report_control_blocks: &[String]) -> Result<usize, ProtocolError> {
        if let Some(rcb) = report_control_blocks.iter().find(|rcb| rcb.trim().is_empty()) {
            return Err(ProtocolError::InvalidArgument(format!("invalid report control block: {:?}", rcb)));
        }
        self.with_session(|session, _| {
            for rcb in report_control_blocks {
                info!(rcb = %rcb, "subscribed to report control block");
                session.reports.insert(
                    rcb.clone(),
                    ReportSubscription {
                        enabled: true,
                        last_report_ms: None,
                    },
                );
            }
            session.reports.len()
        })
        .await
    }

    /// 创建（或替换）数据集；成员必须是合法的对象引用
    pub async fn create_dataset(&self, name: &str, members: Vec<String>) -> Result<(), ProtocolError> {
        if name.trim().is_empty() {
            return Err(ProtocolError::InvalidArgument("dataset name is empty".to_string()));
        }
        if let Some(member) = members.iter().find(|member| Iec61850Point::parse(member).is_none()) {
            return Err(ProtocolError::InvalidArgument(format!("invalid object reference: {}", member)));
        }
        self.with_session(|session, _| {
            info!(dataset = %name, members = members.len(), "created dataset");
            session.datasets.insert(
                name.to_string(),
                Dataset {
                    members,
                    created_at_ms: now_epoch_ms(),
                },
            );
        })
        .await
    }

    /// 已创建的数据集
    pub async fn datasets(&self) -> Result<BTreeMap<String, Dataset>, ProtocolError> {
        self.with_session(|session, _| session.datasets.clone()).await
    }

    /// 服务器模型（由数据集成员与已配置报告控制块中的对象引用汇总）
    pub async fn server_model(&self) -> Result<ServerModel, ProtocolError> {
        self.with_session(|session, config| {
            let references = session
                .datasets
                .values()
                .flat_map(|dataset| dataset.members.iter())
                .chain(config.report_control_blocks.iter())
                .filter_map(|reference| Iec61850Point::parse(reference));

            let mut devices = BTreeSet::new();
            let mut nodes = BTreeSet::new();
            let mut objects = BTreeSet::new();
            let mut attributes = BTreeSet::new();
            for point in references {
                nodes.insert(format!("{}/{}", point.logical_device, point.logical_node));
                objects.insert(format!(
                    "{}/{}.{}",
                    point.logical_device, point.logical_node, point.data_object
                ));
                attributes.insert(point.object_reference());
                devices.insert(point.logical_device);
            }

            ServerModel {
                logical_devices: devices.into_iter().collect(),
                logical_nodes: nodes.into_iter().collect(),
                data_objects: objects.into_iter().collect(),
                data_attributes: attributes.into_iter().collect(),
            }
        })
        .await
    }

    /// 连接统计；任何状态下都可调用
    pub async fn connection_stats(&self) -> ConnectionStats {
        let status = self.status().await;
        let (active_reports, active_datasets) = self
            .with_session(|session, _| (session.reports.len(), session.datasets.len()))
            .await
            .unwrap_or((0, 0));
        ConnectionStats {
            state: status.state,
            connected_since_ms: status.connected_since_ms,
            active_reports,
            active_datasets,
            last_communication_ms: status.last_update_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_reference() {
        let point: Iec61850Point = serde_json::from_value(json!({
            "logical_device": "IED1LD0",
            "logical_node": "MMXU1",
            "data_object": "TotW",
            "data_attribute": "mag.f"
        }))
        .unwrap();
        assert_eq!(point.object_reference(), "IED1LD0/MMXU1.TotW.mag.f");
        assert_eq!(Iec61850Point::parse("IED1LD0/MMXU1.TotW.mag.f"), Some(point));
    }

    #[test]
    fn test_parse_rejects_partial_reference() {
        assert!(Iec61850Point::parse("IED1LD0/MMXU1.TotW").is_none());
        assert!(Iec61850Point::parse("MMXU1.TotW.mag").is_none());
        assert!(Iec61850Point::parse("/MMXU1.TotW.mag").is_none());
    }

    #[test]
    fn test_tls_rejected() {
        let mut config: Iec61850Config = serde_json::from_value(json!({"host": "10.0.0.2"})).unwrap();
        assert_eq!(config.port, 102);
        assert_eq!(config.mms.local_ae_qualifier, 3);
        assert!(Iec61850::validate(&config).is_ok());

        config.tls.enabled = true;
        assert!(Iec61850::validate(&config).is_err());
    }
}
