//! OPC DA 处理器（仅合成后端）
//!
//! 点位即标签名；合成信号按标签名中的关键字选取量程。

use crate::error::ProtocolError;
use crate::handler::{Handler, ProtocolSpec};
use crate::synthetic::Signal;
use crate::types::ProtocolKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// 模拟服务器的标签命名空间
pub const SAMPLE_TAGS: [&str; 10] = [
    "System.Temperature",
    "System.Pressure",
    "System.Flow",
    "Process.Status",
    "Process.Mode",
    "Process.Setpoint",
    "Device1.Status",
    "Device1.Temperature",
    "Device2.Status",
    "Device2.Temperature",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcDaGroup {
    pub name: String,
    #[serde(default = "default_update_rate")]
    pub update_rate: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub items: Vec<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcDaConfig {
    #[serde(default)]
    pub server_name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_update_rate")]
    pub update_rate: u64,
    #[serde(default)]
    pub deadband: f64,
    #[serde(default)]
    pub groups: Vec<OpcDaGroup>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_update_rate() -> u64 {
    1000
}

pub struct OpcDa;

impl ProtocolSpec for OpcDa {
    type Config = OpcDaConfig;
    type Point = String;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::OpcDa;

    fn template() -> Value {
        json!({
            "server_name": "",
            "host": default_host(),
            "update_rate": default_update_rate(),
            "deadband": 0.0,
            "groups": [
                {
                    "name": "Group1",
                    "update_rate": default_update_rate(),
                    "active": true,
                    "items": []
                }
            ]
        })
    }

    fn validate(config: &OpcDaConfig) -> Result<(), ProtocolError> {
        if !(0.0..=100.0).contains(&config.deadband) {
            return Err(ProtocolError::Config(format!(
                "deadband {} is outside 0..=100 percent",
                config.deadband
            )));
        }
        if config.update_rate == 0 || config.groups.iter().any(|group| group.update_rate == 0) {
            return Err(ProtocolError::Config("update_rate must be positive".to_string()));
        }
        Ok(())
    }

    fn endpoint(config: &OpcDaConfig) -> String {
        if config.server_name.is_empty() {
            config.host.clone()
        } else {
            format!("{}/{}", config.host, config.server_name)
        }
    }

    fn point_key(tag: &String) -> String {
        tag.clone()
    }

    fn signal(tag: &String) -> Signal {
        if tag.contains("Status") {
            Signal::Binary
        } else if tag.contains("Temperature") {
            Signal::Analog { min: 20.0, max: 30.0 }
        } else if tag.contains("Pressure") {
            Signal::Analog { min: 1.0, max: 5.0 }
        } else if tag.contains("Flow") {
            Signal::Analog { min: 10.0, max: 50.0 }
        } else {
            Signal::Analog { min: 0.0, max: 100.0 }
        }
    }

    fn status_details(config: &OpcDaConfig, _session: &()) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("server_name".to_string(), Value::from(config.server_name.clone()));
        details.insert("groups_count".to_string(), Value::from(config.groups.len()));
        details
    }
}

/// 按前缀过滤标签；空前缀返回全部
pub fn filter_tags(path: &str) -> Vec<String> {
    SAMPLE_TAGS
        .iter()
        .filter(|tag| tag.starts_with(path))
        .map(|tag| tag.to_string())
        .collect()
}

impl Handler<OpcDa> {
    /// 浏览服务器标签
    pub async fn browse_tags(&self, path: &str) -> Result<Vec<String>, ProtocolError> {
        self.with_session(|_, _| filter_tags(path)).await
    }
}
