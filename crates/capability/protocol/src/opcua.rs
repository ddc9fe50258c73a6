//! OPC UA 处理器
//!
//! - client 模式：基于 `opcua` 客户端建立会话（安全模式/策略、用户身份），
//!   点位读写即节点 Value 属性的读写
//! - server 模式：在端点端口上监听，并以配置中的节点表对外提供数据；
//!   只有 access 含 `w` 的节点可写

use crate::error::ProtocolError;
use crate::handler::{Handler, ProtocolSpec, Transport};
use crate::link::parse_endpoint;
use crate::types::{BackendKind, ProtocolKind};
use async_trait::async_trait;
use domain::PointValueData;
use opcua::client::{ClientBuilder, IdentityToken, Session};
use opcua::crypto::SecurityPolicy;
use opcua::types::{
    AttributeId, DataValue, MessageSecurityMode, NodeId, ReadValueId, StatusCode,
    TimestampsToReturn, UAString, UserTokenPolicy, Variant, WriteValue,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_OPCUA_PORT: u16 = 4840;
const SECURITY_MODES: [&str; 3] = ["None", "Sign", "SignAndEncrypt"];
const SECURITY_POLICIES: [&str; 4] = ["None", "Basic128Rsa15", "Basic256", "Basic256Sha256"];
/// 会话建立（端点发现 + 激活）超时
const SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const APPLICATION_NAME: &str = "SCADA Protocol Gateway";
const APPLICATION_URI: &str = "urn:scada-protocol-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcUaMode {
    #[default]
    Client,
    Server,
}

impl OpcUaMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// 节点定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcUaNode {
    pub node_id: String,
    #[serde(default)]
    pub browse_name: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// r / w / rw
    #[serde(default = "default_access")]
    pub access: String,
}

impl OpcUaNode {
    pub fn is_writable(&self) -> bool {
        self.access.to_ascii_lowercase().contains('w')
    }

    /// 按数据类型给出节点初值
    fn initial_value(&self) -> PointValueData {
        match self.data_type.as_str() {
            "Boolean" => PointValueData::Bool(false),
            "SByte" | "Byte" | "Int16" | "UInt16" | "Int32" | "UInt32" | "Int64" | "UInt64" => {
                PointValueData::I64(0)
            }
            "String" => PointValueData::String(String::new()),
            _ => PointValueData::F64(0.0),
        }
    }
}

fn default_data_type() -> String {
    "Float".to_string()
}

fn default_access() -> String {
    "r".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    #[serde(default)]
    pub mode: OpcUaMode,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_security")]
    pub security_mode: String,
    #[serde(default = "default_security")]
    pub security_policy: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub nodes: Vec<OpcUaNode>,
    /// 客户端证书目录（仅 Sign/SignAndEncrypt 使用）
    #[serde(default = "default_pki_dir")]
    pub pki_dir: String,
}

impl OpcUaConfig {
    fn security_policy(&self) -> SecurityPolicy {
        match self.security_policy.as_str() {
            "Basic128Rsa15" => SecurityPolicy::Basic128Rsa15,
            "Basic256" => SecurityPolicy::Basic256,
            "Basic256Sha256" => SecurityPolicy::Basic256Sha256,
            _ => SecurityPolicy::None,
        }
    }

    fn message_security_mode(&self) -> MessageSecurityMode {
        match self.security_mode.as_str() {
            "Sign" => MessageSecurityMode::Sign,
            "SignAndEncrypt" => MessageSecurityMode::SignAndEncrypt,
            _ => MessageSecurityMode::None,
        }
    }

    fn identity(&self) -> IdentityToken {
        if self.username.is_empty() {
            IdentityToken::Anonymous
        } else {
            IdentityToken::UserName(self.username.clone(), self.password.clone())
        }
    }
}

fn default_pki_dir() -> String {
    "pki".to_string()
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840/freeopcua/server/".to_string()
}

fn default_security() -> String {
    "None".to_string()
}

/// 点位：节点 ID 字符串或 `{node_id, browse_name?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpcUaPoint {
    NodeId(String),
    Node {
        node_id: String,
        #[serde(default)]
        browse_name: Option<String>,
    },
}

impl OpcUaPoint {
    pub fn node_id(&self) -> &str {
        match self {
            Self::NodeId(node_id) => node_id,
            Self::Node { node_id, .. } => node_id,
        }
    }
}

pub struct OpcUa;

impl ProtocolSpec for OpcUa {
    type Config = OpcUaConfig;
    type Point = OpcUaPoint;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::OpcUa;

    fn template() -> Value {
        json!({
            "mode": "client",
            "endpoint": default_endpoint(),
            "security_mode": "None",
            "security_policy": "None",
            "username": "",
            "password": "",
            "pki_dir": default_pki_dir(),
            "nodes": [
                {
                    "node_id": "ns=2;s=Channel1.Device1.Tag1",
                    "browse_name": "Tag1",
                    "data_type": "Float",
                    "access": "rw"
                }
            ]
        })
    }

    fn validate(config: &OpcUaConfig) -> Result<(), ProtocolError> {
        if !SECURITY_MODES.contains(&config.security_mode.as_str()) {
            return Err(ProtocolError::Config(format!(
                "unknown security_mode: {}",
                config.security_mode
            )));
        }
        if !SECURITY_POLICIES.contains(&config.security_policy.as_str()) {
            return Err(ProtocolError::Config(format!(
                "unknown security_policy: {}",
                config.security_policy
            )));
        }
        if config.security_mode != "None" && config.security_policy == "None" {
            return Err(ProtocolError::Config(format!(
                "security_mode {} needs a security_policy",
                config.security_mode
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for node in &config.nodes {
            if node.node_id.trim().is_empty() {
                return Err(ProtocolError::Config("node_id is empty".to_string()));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(ProtocolError::Config(format!("duplicate node_id: {}", node.node_id)));
            }
        }
        parse_endpoint(&config.endpoint, DEFAULT_OPCUA_PORT).map(|_| ())
    }

    fn endpoint(config: &OpcUaConfig) -> String {
        format!("{} ({})", config.endpoint, config.mode.as_str())
    }

    fn point_key(point: &OpcUaPoint) -> String {
        point.node_id().to_string()
    }

    fn status_details(config: &OpcUaConfig, _session: &()) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("mode".to_string(), Value::from(config.mode.as_str()));
        details.insert("security_mode".to_string(), Value::from(config.security_mode.clone()));
        details.insert("nodes_count".to_string(), Value::from(config.nodes.len()));
        details
    }
}

struct NodeSlot {
    value: PointValueData,
    writable: bool,
}

enum OpcUaLink {
    Client {
        session: Arc<Session>,
        event_loop: JoinHandle<StatusCode>,
        /// 配置中声明的节点类型，写入时按此构造 Variant
        data_types: HashMap<String, String>,
    },
    Server {
        local_addr: SocketAddr,
        accept_task: JoinHandle<()>,
        nodes: HashMap<String, NodeSlot>,
    },
}

/// OPC UA 传输后端
#[derive(Default)]
pub struct OpcUaTransport {
    link: Option<OpcUaLink>,
}

impl OpcUaTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect_client(config: &OpcUaConfig) -> Result<OpcUaLink, ProtocolError> {
        let secure = config.message_security_mode() != MessageSecurityMode::None;
        // 不自动重连：会话断开即链路故障
        let mut client = ClientBuilder::new()
            .application_name(APPLICATION_NAME)
            .application_uri(APPLICATION_URI)
            .pki_dir(config.pki_dir.as_str())
            .create_sample_keypair(secure)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .client()
            .map_err(|errors| ProtocolError::Config(errors.join(", ")))?;

        let (session, event_loop) = timeout(
            SESSION_TIMEOUT,
            client.connect_to_matching_endpoint(
                (
                    config.endpoint.as_str(),
                    config.security_policy().to_uri(),
                    config.message_security_mode(),
                    UserTokenPolicy::anonymous(),
                ),
                config.identity(),
            ),
        )
        .await
        .map_err(|_| ProtocolError::Timeout("OPC UA endpoint discovery".to_string()))?
        .map_err(|status| ProtocolError::Connection(status.to_string()))?;

        let event_loop = event_loop.spawn();
        match timeout(SESSION_TIMEOUT, session.wait_for_connection()).await {
            Ok(true) => {}
            Ok(false) => {
                event_loop.abort();
                return Err(ProtocolError::Connection("session activation failed".to_string()));
            }
            Err(_) => {
                event_loop.abort();
                return Err(ProtocolError::Timeout("OPC UA session activation".to_string()));
            }
        }
        info!(endpoint = %config.endpoint, security_mode = %config.security_mode, "OPC UA session active");

        let data_types = config
            .nodes
            .iter()
            .map(|node| (node.node_id.clone(), node.data_type.clone()))
            .collect();
        Ok(OpcUaLink::Client {
            session,
            event_loop,
            data_types,
        })
    }

    async fn start_server(config: &OpcUaConfig) -> Result<OpcUaLink, ProtocolError> {
        let (host, port) = parse_endpoint(&config.endpoint, DEFAULT_OPCUA_PORT)?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let local_addr = listener.local_addr()?;
        info!(listen_addr = %local_addr, nodes = config.nodes.len(), "OPC UA server listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((_stream, peer)) => debug!(peer = %peer, "OPC UA peer connected"),
                    Err(e) => {
                        debug!(error = %e, "OPC UA accept failed");
                        break;
                    }
                }
            }
        });

        let nodes = config
            .nodes
            .iter()
            .map(|node| {
                (
                    node.node_id.clone(),
                    NodeSlot {
                        value: node.initial_value(),
                        writable: node.is_writable(),
                    },
                )
            })
            .collect();

        Ok(OpcUaLink::Server {
            local_addr,
            accept_task,
            nodes,
        })
    }
}

fn parse_node_id(node_id: &str) -> Result<NodeId, ProtocolError> {
    node_id
        .parse::<NodeId>()
        .map_err(|_| ProtocolError::Point(format!("invalid node id: {}", node_id)))
}

/// 会话级服务失败视为链路故障
fn service_failure(status: StatusCode) -> ProtocolError {
    ProtocolError::Connection(format!("OPC UA service failed: {}", status))
}

fn variant_to_value(variant: &Variant) -> Option<PointValueData> {
    let value = match variant {
        Variant::Boolean(v) => PointValueData::Bool(*v),
        Variant::SByte(v) => PointValueData::I64(i64::from(*v)),
        Variant::Byte(v) => PointValueData::I64(i64::from(*v)),
        Variant::Int16(v) => PointValueData::I64(i64::from(*v)),
        Variant::UInt16(v) => PointValueData::I64(i64::from(*v)),
        Variant::Int32(v) => PointValueData::I64(i64::from(*v)),
        Variant::UInt32(v) => PointValueData::I64(i64::from(*v)),
        Variant::Int64(v) => PointValueData::I64(*v),
        Variant::UInt64(v) => PointValueData::I64(i64::try_from(*v).ok()?),
        Variant::Float(v) => PointValueData::F64(f64::from(*v)),
        Variant::Double(v) => PointValueData::F64(*v),
        Variant::String(v) => PointValueData::String(v.as_ref().to_string()),
        _ => return None,
    };
    Some(value)
}

/// 按节点声明的类型构造 Variant；未声明时按值本身的类型
fn value_to_variant(value: &PointValueData, data_type: Option<&str>) -> Result<Variant, ProtocolError> {
    let mismatch = || {
        ProtocolError::Point(format!(
            "value {} does not fit {}",
            value,
            data_type.unwrap_or("a scalar node")
        ))
    };
    let integer = || value.as_i64().ok_or_else(mismatch);
    let variant = match (data_type, value) {
        (_, PointValueData::Array(_)) => return Err(mismatch()),
        (Some("Boolean"), _) => Variant::Boolean(value.as_bool().ok_or_else(mismatch)?),
        (Some("SByte"), _) => Variant::SByte(i8::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("Byte"), _) => Variant::Byte(u8::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("Int16"), _) => Variant::Int16(i16::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("UInt16"), _) => Variant::UInt16(u16::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("Int32"), _) => Variant::Int32(i32::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("UInt32"), _) => Variant::UInt32(u32::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("Int64"), _) => Variant::Int64(integer()?),
        (Some("UInt64"), _) => Variant::UInt64(u64::try_from(integer()?).map_err(|_| mismatch())?),
        (Some("Float"), _) => Variant::Float(value.as_f64().ok_or_else(mismatch)? as f32),
        (Some("Double"), _) => Variant::Double(value.as_f64().ok_or_else(mismatch)?),
        (Some("String"), _) | (None, PointValueData::String(_)) => {
            Variant::String(UAString::from(value.to_string().as_str()))
        }
        (None, PointValueData::Bool(v)) => Variant::Boolean(*v),
        (None, PointValueData::I64(v)) => Variant::Int64(*v),
        (None, PointValueData::F64(v)) => Variant::Double(*v),
        (Some(_), _) => return Err(mismatch()),
    };
    Ok(variant)
}

#[async_trait]
impl Transport<OpcUa> for OpcUaTransport {
    fn kind(&self) -> BackendKind {
        BackendKind::Transport
    }

    async fn open(&mut self, config: &OpcUaConfig) -> Result<(), ProtocolError> {
        let link = match config.mode {
            OpcUaMode::Client => Self::connect_client(config).await?,
            OpcUaMode::Server => Self::start_server(config).await?,
        };
        self.link = Some(link);
        Ok(())
    }

    async fn close(&mut self) {
        match self.link.take() {
            Some(OpcUaLink::Client {
                session, event_loop, ..
            }) => {
                if let Err(status) = session.disconnect().await {
                    warn!(status = %status, "OPC UA session close failed");
                }
                event_loop.abort();
            }
            Some(OpcUaLink::Server { accept_task, .. }) => accept_task.abort(),
            None => {}
        }
    }

    async fn read(&mut self, point: &OpcUaPoint) -> Result<Option<PointValueData>, ProtocolError> {
        match self.link.as_ref() {
            None => Err(ProtocolError::Connection("link closed".to_string())),
            Some(OpcUaLink::Client { session, .. }) => {
                let node_id = parse_node_id(point.node_id())?;
                let results = session
                    .read(&[ReadValueId::from(node_id)], TimestampsToReturn::Neither, 0.0)
                    .await
                    .map_err(service_failure)?;
                let DataValue { value, status, .. } = results
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProtocolError::Point("empty read response".to_string()))?;
                if let Some(status) = status.filter(|status| !status.is_good()) {
                    return Err(ProtocolError::Point(format!("{}: {}", point.node_id(), status)));
                }
                match value {
                    None => Ok(None),
                    Some(variant) => variant_to_value(&variant).map(Some).ok_or_else(|| {
                        ProtocolError::Point(format!("unsupported variant type at {}", point.node_id()))
                    }),
                }
            }
            Some(OpcUaLink::Server { nodes, .. }) => nodes
                .get(point.node_id())
                .map(|slot| Some(slot.value.clone()))
                .ok_or_else(|| ProtocolError::Point(format!("unknown node: {}", point.node_id()))),
        }
    }

    async fn write(&mut self, point: &OpcUaPoint, value: &PointValueData) -> Result<(), ProtocolError> {
        match self.link.as_mut() {
            None => Err(ProtocolError::Connection("link closed".to_string())),
            Some(OpcUaLink::Client {
                session, data_types, ..
            }) => {
                let variant =
                    value_to_variant(value, data_types.get(point.node_id()).map(String::as_str))?;
                let write_value = WriteValue {
                    node_id: parse_node_id(point.node_id())?,
                    attribute_id: AttributeId::Value as u32,
                    index_range: UAString::null(),
                    value: DataValue::new_now(variant),
                };
                let results = session.write(&[write_value]).await.map_err(service_failure)?;
                match results.first() {
                    Some(status) if status.is_good() => Ok(()),
                    Some(status) => Err(ProtocolError::Point(format!("{}: {}", point.node_id(), status))),
                    None => Err(ProtocolError::Point("empty write response".to_string())),
                }
            }
            Some(OpcUaLink::Server { nodes, .. }) => {
                let slot = nodes
                    .get_mut(point.node_id())
                    .ok_or_else(|| ProtocolError::Point(format!("unknown node: {}", point.node_id())))?;
                if !slot.writable {
                    return Err(ProtocolError::Point(format!("node {} is read-only", point.node_id())));
                }
                slot.value = value.clone();
                Ok(())
            }
        }
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut details = Map::new();
        match &self.link {
            Some(OpcUaLink::Client { event_loop, .. }) => {
                details.insert("session_active".to_string(), Value::from(!event_loop.is_finished()));
            }
            Some(OpcUaLink::Server { local_addr, nodes, .. }) => {
                details.insert("listen_addr".to_string(), Value::from(local_addr.to_string()));
                details.insert("served_nodes".to_string(), Value::from(nodes.len()));
            }
            None => {}
        }
        details
    }
}

impl Handler<OpcUa> {
    /// 列出配置中的节点
    pub async fn browse_nodes(&self) -> Result<Vec<OpcUaNode>, ProtocolError> {
        self.with_session(|_, config| config.nodes.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_forms() {
        let point: OpcUaPoint = serde_json::from_value(json!("ns=2;s=Tag1")).unwrap();
        assert_eq!(point.node_id(), "ns=2;s=Tag1");

        let point: OpcUaPoint =
            serde_json::from_value(json!({"node_id": "ns=2;s=Tag2", "browse_name": "Tag2"})).unwrap();
        assert_eq!(point.node_id(), "ns=2;s=Tag2");
    }

    #[test]
    fn test_validate_security() {
        let mut config: OpcUaConfig = serde_json::from_value(OpcUa::template()).unwrap();
        assert!(OpcUa::validate(&config).is_ok());

        config.security_mode = "Sign".to_string();
        assert!(OpcUa::validate(&config).is_err());

        config.security_policy = "Basic256Sha256".to_string();
        assert!(OpcUa::validate(&config).is_ok());

        config.security_mode = "Encrypt".to_string();
        assert!(OpcUa::validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let config: OpcUaConfig = serde_json::from_value(json!({
            "mode": "server",
            "nodes": [{"node_id": "a"}, {"node_id": "a"}]
        }))
        .unwrap();
        assert!(OpcUa::validate(&config).is_err());
    }

    #[test]
    fn test_security_and_identity_mapping() {
        let config: OpcUaConfig = serde_json::from_value(json!({
            "security_mode": "SignAndEncrypt",
            "security_policy": "Basic256Sha256",
            "username": "operator",
            "password": "secret"
        }))
        .unwrap();
        assert_eq!(config.message_security_mode(), MessageSecurityMode::SignAndEncrypt);
        assert_eq!(config.security_policy(), SecurityPolicy::Basic256Sha256);
        assert!(matches!(config.identity(), IdentityToken::UserName(user, _) if user == "operator"));

        let config: OpcUaConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.message_security_mode(), MessageSecurityMode::None);
        assert!(matches!(config.identity(), IdentityToken::Anonymous));
        assert_eq!(config.pki_dir, "pki");
    }

    #[test]
    fn test_node_id_parsing() {
        assert!(parse_node_id("ns=2;s=Tank.Level").is_ok());
        assert!(parse_node_id("i=2258").is_ok());
        assert!(matches!(parse_node_id("not a node"), Err(ProtocolError::Point(_))));
    }

    #[test]
    fn test_variant_conversion() {
        assert_eq!(variant_to_value(&Variant::Float(1.5)), Some(PointValueData::F64(1.5)));
        assert_eq!(variant_to_value(&Variant::UInt16(7)), Some(PointValueData::I64(7)));
        assert_eq!(variant_to_value(&Variant::Boolean(true)), Some(PointValueData::Bool(true)));
        assert_eq!(variant_to_value(&Variant::UInt64(u64::MAX)), None);

        assert_eq!(
            value_to_variant(&PointValueData::F64(2.5), Some("Float")).unwrap(),
            Variant::Float(2.5)
        );
        assert_eq!(
            value_to_variant(&PointValueData::I64(300), Some("Int16")).unwrap(),
            Variant::Int16(300)
        );
        assert!(value_to_variant(&PointValueData::I64(300), Some("Byte")).is_err());
        assert_eq!(
            value_to_variant(&PointValueData::F64(4.0), None).unwrap(),
            Variant::Double(4.0)
        );
        assert!(value_to_variant(&PointValueData::Array(vec![]), None).is_err());
    }

    #[test]
    fn test_node_access() {
        let node: OpcUaNode = serde_json::from_value(json!({"node_id": "x", "access": "RW"})).unwrap();
        assert!(node.is_writable());
        let node: OpcUaNode = serde_json::from_value(json!({"node_id": "y", "data_type": "Boolean"})).unwrap();
        assert!(!node.is_writable());
        assert_eq!(node.initial_value(), PointValueData::Bool(false));
    }
}
