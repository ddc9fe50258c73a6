use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 地址描述中作为点位主标识的字段（按优先级）。
const ADDRESS_KEYS: [&str; 6] = ["address", "topic", "node_id", "id", "ioa", "tag"];

/// 可寻址的数据点：协议名 + 结构化地址描述 + 名称。
///
/// 构造后不可变；名称只在构造时推导一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DataPointRecord")]
pub struct DataPoint {
    protocol: String,
    address: Value,
    name: String,
}

/// 持久化形态（兼容旧文件中的 `tag` 字段）。
#[derive(Deserialize)]
struct DataPointRecord {
    protocol: String,
    #[serde(alias = "tag")]
    address: Value,
    #[serde(default)]
    name: Option<String>,
}

impl From<DataPointRecord> for DataPoint {
    fn from(record: DataPointRecord) -> Self {
        Self::new(record.protocol, record.address, record.name)
    }
}

impl DataPoint {
    /// 构造数据点；未提供（或为空）的名称按 `{protocol}_{address}` 推导。
    pub fn new(protocol: impl Into<String>, address: Value, name: Option<String>) -> Self {
        let protocol = protocol.into();
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => format!("{}_{}", protocol, address_key(&address)),
        };
        Self {
            protocol,
            address,
            name,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> &Value {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 提取地址描述的主标识文本。
fn address_key(address: &Value) -> String {
    match address {
        Value::Object(map) => ADDRESS_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .map(scalar_text)
            .unwrap_or_else(|| address.to_string()),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 源点位到目标点位的有向映射。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub source: DataPoint,
    pub destination: DataPoint,
    pub enabled: bool,
    pub transformation: Option<String>,
}

impl Mapping {
    /// 新建映射：默认启用、无变换。
    pub fn new(source: DataPoint, destination: DataPoint) -> Self {
        Self {
            source,
            destination,
            enabled: true,
            transformation: None,
        }
    }
}
