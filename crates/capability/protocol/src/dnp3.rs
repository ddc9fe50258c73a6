//! DNP3 处理器（仅合成后端）
//!
//! 未指定点类型时按点号区段推断：1–100 开关量、101–200 模拟量、201–300 计数器。

use crate::error::ProtocolError;
use crate::handler::ProtocolSpec;
use crate::synthetic::Signal;
use crate::types::ProtocolKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dnp3Master {
    #[serde(default = "default_master_address")]
    pub local_address: u16,
    #[serde(default = "default_outstation_address")]
    pub remote_address: u16,
    #[serde(default = "default_master_host")]
    pub host: String,
    #[serde(default = "default_dnp3_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Dnp3Master {
    fn default() -> Self {
        Self {
            local_address: default_master_address(),
            remote_address: default_outstation_address(),
            host: default_master_host(),
            port: default_dnp3_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dnp3Outstation {
    #[serde(default = "default_outstation_address")]
    pub local_address: u16,
    #[serde(default = "default_master_address")]
    pub remote_address: u16,
    #[serde(default = "default_outstation_host")]
    pub host: String,
    #[serde(default = "default_dnp3_port")]
    pub port: u16,
}

impl Default for Dnp3Outstation {
    fn default() -> Self {
        Self {
            local_address: default_outstation_address(),
            remote_address: default_master_address(),
            host: default_outstation_host(),
            port: default_dnp3_port(),
        }
    }
}

fn default_master_address() -> u16 {
    1
}

fn default_outstation_address() -> u16 {
    1024
}

fn default_master_host() -> String {
    "localhost".to_string()
}

fn default_outstation_host() -> String {
    "0.0.0.0".to_string()
}

fn default_dnp3_port() -> u16 {
    20000
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dnp3Config {
    #[serde(default)]
    pub master: Dnp3Master,
    #[serde(default)]
    pub outstation: Dnp3Outstation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dnp3PointType {
    Binary,
    Analog,
    Counter,
}

impl Dnp3PointType {
    /// 按点号区段推断类型
    pub fn from_index(id: u32) -> Self {
        match id {
            1..=100 => Self::Binary,
            201..=300 => Self::Counter,
            _ => Self::Analog,
        }
    }
}

/// 点位：点号或 `{id, type}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dnp3Point {
    Index(u32),
    Detailed {
        id: u32,
        #[serde(default, rename = "type")]
        point_type: Option<Dnp3PointType>,
    },
}

impl Dnp3Point {
    pub fn id(&self) -> u32 {
        match self {
            Self::Index(id) => *id,
            Self::Detailed { id, .. } => *id,
        }
    }

    pub fn point_type(&self) -> Dnp3PointType {
        match self {
            Self::Detailed {
                point_type: Some(point_type),
                ..
            } => *point_type,
            other => Dnp3PointType::from_index(other.id()),
        }
    }
}

pub struct Dnp3;

impl ProtocolSpec for Dnp3 {
    type Config = Dnp3Config;
    type Point = Dnp3Point;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::Dnp3;

    fn template() -> Value {
        json!({
            "master": {
                "local_address": default_master_address(),
                "remote_address": default_outstation_address(),
                "host": default_master_host(),
                "port": default_dnp3_port(),
                "timeout_ms": default_timeout_ms()
            },
            "outstation": {
                "local_address": default_outstation_address(),
                "remote_address": default_master_address(),
                "host": default_outstation_host(),
                "port": default_dnp3_port()
            }
        })
    }

    fn validate(config: &Dnp3Config) -> Result<(), ProtocolError> {
        if config.master.local_address == config.master.remote_address {
            return Err(ProtocolError::Config(
                "master local_address equals remote_address".to_string(),
            ));
        }
        Ok(())
    }

    fn endpoint(config: &Dnp3Config) -> String {
        format!(
            "{}:{} ({} -> {})",
            config.master.host, config.master.port, config.master.local_address, config.master.remote_address
        )
    }

    fn point_key(point: &Dnp3Point) -> String {
        point.id().to_string()
    }

    fn signal(point: &Dnp3Point) -> Signal {
        match point.point_type() {
            Dnp3PointType::Binary => Signal::Binary,
            Dnp3PointType::Analog => Signal::Analog { min: 0.0, max: 100.0 },
            Dnp3PointType::Counter => Signal::Counter { max: 1000 },
        }
    }

    fn status_details(config: &Dnp3Config, _session: &()) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("master_address".to_string(), Value::from(config.master.local_address));
        details.insert("outstation_address".to_string(), Value::from(config.master.remote_address));
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_type_ranges() {
        assert_eq!(Dnp3PointType::from_index(1), Dnp3PointType::Binary);
        assert_eq!(Dnp3PointType::from_index(100), Dnp3PointType::Binary);
        assert_eq!(Dnp3PointType::from_index(150), Dnp3PointType::Analog);
        assert_eq!(Dnp3PointType::from_index(201), Dnp3PointType::Counter);
        assert_eq!(Dnp3PointType::from_index(0), Dnp3PointType::Analog);
        assert_eq!(Dnp3PointType::from_index(500), Dnp3PointType::Analog);
    }

    #[test]
    fn test_explicit_type_wins() {
        let point: Dnp3Point = serde_json::from_value(json!({"id": 5, "type": "counter"})).unwrap();
        assert_eq!(point.point_type(), Dnp3PointType::Counter);

        let point: Dnp3Point = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(point.point_type(), Dnp3PointType::Binary);
        assert_eq!(Dnp3::point_key(&point), "42");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Dnp3Config = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.master.remote_address, 1024);
        assert_eq!(config.outstation.host, "0.0.0.0");
        assert!(Dnp3::validate(&config).is_ok());
    }
}
