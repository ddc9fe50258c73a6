//! MQTT 处理器
//!
//! 真实后端基于 `rumqttc`：connect 等待 CONNACK；后台任务驱动事件循环并缓存各主题的最新负载。
//! 读取时首次访问某主题会先订阅，尚未收到消息则返回“暂无数据”；写入即发布。
//! 事件循环出错即结束，链路不会自行恢复。

use crate::error::ProtocolError;
use crate::handler::{ProtocolSpec, Transport};
use crate::types::{BackendKind, ProtocolKind};
use async_trait::async_trait;
use domain::PointValueData;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    /// 为空时连接时生成
    #[serde(default)]
    pub client_id: String,
    /// 心跳间隔（秒）
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttPoint {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

impl MqttPoint {
    fn qos(&self) -> Result<QoS, ProtocolError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ProtocolError::Point(format!("invalid qos: {}", other))),
        }
    }
}

pub struct Mqtt;

impl ProtocolSpec for Mqtt {
    type Config = MqttConfig;
    type Point = MqttPoint;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::Mqtt;

    fn template() -> Value {
        json!({
            "broker": "localhost",
            "port": default_mqtt_port(),
            "username": "",
            "password": "",
            "use_tls": false,
            "client_id": "",
            "keep_alive": default_keep_alive()
        })
    }

    fn validate(config: &MqttConfig) -> Result<(), ProtocolError> {
        if config.broker.trim().is_empty() {
            return Err(ProtocolError::Config("broker is empty".to_string()));
        }
        if config.keep_alive < 5 {
            return Err(ProtocolError::Config("keep_alive must be at least 5 seconds".to_string()));
        }
        Ok(())
    }

    fn endpoint(config: &MqttConfig) -> String {
        let scheme = if config.use_tls { "mqtts" } else { "mqtt" };
        format!("{}://{}:{}", scheme, config.broker, config.port)
    }

    fn point_key(point: &MqttPoint) -> String {
        point.topic.clone()
    }
}

/// 负载解码：JSON 标量/数组优先，否则按文本
pub fn decode_payload(payload: &[u8]) -> PointValueData {
    if let Ok(value) = serde_json::from_slice::<PointValueData>(payload) {
        return value;
    }
    PointValueData::String(String::from_utf8_lossy(payload).trim().to_string())
}

/// 负载编码：文本原样发送，其余按 JSON
pub fn encode_payload(value: &PointValueData) -> Result<Vec<u8>, ProtocolError> {
    match value {
        PointValueData::String(text) => Ok(text.as_bytes().to_vec()),
        other => serde_json::to_vec(other).map_err(|e| ProtocolError::Point(e.to_string())),
    }
}

struct MqttLink {
    client: AsyncClient,
    client_id: String,
    event_task: JoinHandle<()>,
    online: Arc<AtomicBool>,
    subscriptions: HashSet<String>,
}

/// MQTT 传输后端
#[derive(Default)]
pub struct MqttTransport {
    link: Option<MqttLink>,
    messages: Arc<RwLock<HashMap<String, PointValueData>>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn link_mut(&mut self) -> Result<&mut MqttLink, ProtocolError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("link closed".to_string()))?;
        if !link.online.load(Ordering::Acquire) {
            return Err(ProtocolError::Connection("broker link lost".to_string()));
        }
        Ok(link)
    }
}

/// 等待 CONNACK
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ProtocolError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ProtocolError::Connection(format!("broker refused: {:?}", code))),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(ProtocolError::Connection(e.to_string())),
        }
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    messages: Arc<RwLock<HashMap<String, PointValueData>>>,
    online: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let value = decode_payload(&publish.payload);
                    debug!(topic = %publish.topic, value = %value, "mqtt message");
                    messages.write().await.insert(publish.topic.clone(), value);
                }
                Ok(_) => {}
                Err(e) => {
                    // 不自动重连：下一次读写把处理器置为 Error
                    online.store(false, Ordering::Release);
                    warn!(error = %e, "mqtt link lost");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Transport<Mqtt> for MqttTransport {
    fn kind(&self) -> BackendKind {
        BackendKind::Transport
    }

    async fn open(&mut self, config: &MqttConfig) -> Result<(), ProtocolError> {
        let client_id = if config.client_id.trim().is_empty() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("gateway-{}", &id[..12])
        } else {
            config.client_id.clone()
        };

        let mut options = MqttOptions::new(client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if config.use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        timeout(CONNACK_TIMEOUT, await_connack(&mut eventloop))
            .await
            .map_err(|_| ProtocolError::Timeout("waiting for CONNACK".to_string()))??;

        let online = Arc::new(AtomicBool::new(true));
        let event_task = spawn_event_loop(eventloop, self.messages.clone(), online.clone());
        self.link = Some(MqttLink {
            client,
            client_id,
            event_task,
            online,
            subscriptions: HashSet::new(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.client.disconnect().await;
            link.event_task.abort();
        }
        self.messages.write().await.clear();
    }

    async fn read(&mut self, point: &MqttPoint) -> Result<Option<PointValueData>, ProtocolError> {
        let qos = point.qos()?;
        let link = self.link_mut()?;
        if !link.subscriptions.contains(&point.topic) {
            link.client
                .subscribe(point.topic.clone(), qos)
                .await
                .map_err(|e| ProtocolError::Connection(e.to_string()))?;
            link.subscriptions.insert(point.topic.clone());
            debug!(topic = %point.topic, "subscribed");
        }
        Ok(self.messages.read().await.get(&point.topic).cloned())
    }

    async fn write(&mut self, point: &MqttPoint, value: &PointValueData) -> Result<(), ProtocolError> {
        let qos = point.qos()?;
        let payload = encode_payload(value)?;
        let link = self.link_mut()?;
        link.client
            .publish(point.topic.clone(), qos, false, payload)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut details = Map::new();
        if let Some(link) = &self.link {
            details.insert("client_id".to_string(), Value::from(link.client_id.clone()));
            details.insert("online".to_string(), Value::from(link.online.load(Ordering::Acquire)));
            details.insert("subscriptions".to_string(), Value::from(link.subscriptions.len()));
        }
        details
    }
}
