use serde::{Deserialize, Serialize};
use std::fmt;

/// 点位值的数据类型。
///
/// 以 untagged 方式序列化，与 JSON 标量/数组一一对应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValueData {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Array(Vec<PointValueData>),
}

impl PointValueData {
    /// 数值视图（布尔按 0/1，字符串尝试解析）。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Self::I64(value) => Some(*value as f64),
            Self::F64(value) => Some(*value),
            Self::String(value) => value.trim().parse::<f64>().ok(),
            Self::Array(_) => None,
        }
    }

    /// 整数视图（浮点四舍五入）。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(*value),
            Self::F64(value) if value.is_finite() => Some(value.round() as i64),
            Self::Bool(value) => Some(i64::from(*value)),
            Self::String(value) => value.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// 布尔视图（非零即真）。
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::I64(value) => Some(*value != 0),
            Self::F64(value) => Some(*value != 0.0),
            Self::String(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" => Some(false),
                _ => None,
            },
            Self::Array(_) => None,
        }
    }
}

impl fmt::Display for PointValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::I64(value) => write!(f, "{}", value),
            Self::F64(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "{}", value),
            Self::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for PointValueData {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<i64> for PointValueData {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<bool> for PointValueData {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for PointValueData {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}
