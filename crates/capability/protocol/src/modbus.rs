//! Modbus TCP 处理器
//!
//! 真实后端基于 `tokio-modbus`，按点位的寄存器类型读写保持寄存器、输入寄存器、线圈与离散输入。
//!
//! ## 配置与点位
//!
//! ```json
//! // connect 配置
//! { "host": "192.168.1.100", "port": 502, "unit": 1, "timeout": 3 }
//!
//! // 点位描述（data_type 可选，缺省时按原始寄存器返回）
//! { "type": "holding", "address": 100, "count": 2, "data_type": "float32" }
//! ```

use crate::error::ProtocolError;
use crate::handler::{ProtocolSpec, Transport};
use crate::synthetic::Signal;
use crate::types::{BackendKind, ProtocolKind};
use async_trait::async_trait;
use domain::PointValueData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_modbus::prelude::*;

/// Modbus 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站单元号
    #[serde(default = "default_unit")]
    pub unit: u8,
    /// 连接与单次请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit() -> u8 {
    1
}

fn default_timeout() -> u64 {
    3
}

/// 寄存器区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    #[default]
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coil",
            Self::Discrete => "discrete",
        }
    }

    fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::Discrete)
    }
}

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    /// 16位有符号整数
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl ModbusDataType {
    fn register_count(&self) -> usize {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

/// Modbus 点位描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusPoint {
    #[serde(rename = "type", default)]
    pub register_type: RegisterType,
    /// 起始地址
    pub address: u16,
    /// 数量
    #[serde(default = "default_count")]
    pub count: u16,
    /// 寄存器解码方式（仅对 holding/input 有效）
    #[serde(default)]
    pub data_type: Option<ModbusDataType>,
}

fn default_count() -> u16 {
    1
}

impl ModbusPoint {
    /// 实际请求的数量：声明了 data_type 时至少覆盖该类型所需寄存器
    pub fn read_count(&self) -> u16 {
        let needed = match (self.register_type, self.data_type) {
            (RegisterType::Holding | RegisterType::Input, Some(data_type)) => {
                data_type.register_count() as u16
            }
            _ => 1,
        };
        self.count.max(needed)
    }
}

/// Modbus 协议描述
pub struct Modbus;

impl ProtocolSpec for Modbus {
    type Config = ModbusConfig;
    type Point = ModbusPoint;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::Modbus;

    fn template() -> Value {
        json!({
            "host": "",
            "port": default_modbus_port(),
            "unit": default_unit(),
            "timeout": default_timeout(),
        })
    }

    fn validate(config: &ModbusConfig) -> Result<(), ProtocolError> {
        if config.host.trim().is_empty() {
            return Err(ProtocolError::Config("host is empty".to_string()));
        }
        Ok(())
    }

    fn endpoint(config: &ModbusConfig) -> String {
        format!("{}:{}/{}", config.host, config.port, config.unit)
    }

    fn point_key(point: &ModbusPoint) -> String {
        format!("{}:{}", point.register_type.as_str(), point.address)
    }

    fn signal(point: &ModbusPoint) -> Signal {
        match (point.register_type.is_bit(), point.data_type) {
            (true, _) => Signal::Binary,
            (false, Some(ModbusDataType::Float32 | ModbusDataType::Float64)) => Signal::Analog {
                min: 0.0,
                max: 100.0,
            },
            (false, _) => Signal::Counter { max: 65_536 },
        }
    }
}

/// Modbus TCP 传输后端
pub struct ModbusTransport {
    context: Option<tokio_modbus::client::Context>,
    request_timeout: Duration,
    unit: u8,
}

impl ModbusTransport {
    pub fn new() -> Self {
        Self {
            context: None,
            request_timeout: Duration::from_secs(default_timeout()),
            unit: default_unit(),
        }
    }
}

impl Default for ModbusTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport<Modbus> for ModbusTransport {
    fn kind(&self) -> BackendKind {
        BackendKind::Transport
    }

    async fn open(&mut self, config: &ModbusConfig) -> Result<(), ProtocolError> {
        let request_timeout = Duration::from_secs(config.timeout.max(1));
        let target = format!("{}:{}", config.host, config.port);
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| ProtocolError::Connection(format!("resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| ProtocolError::Connection(format!("no address for {}", target)))?;

        let context = timeout(request_timeout, tcp::connect_slave(addr, Slave(config.unit)))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| ProtocolError::Connection(format!("{}: {}", addr, e)))?;

        self.context = Some(context);
        self.request_timeout = request_timeout;
        self.unit = config.unit;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            let _ = context.disconnect().await;
        }
    }

    async fn read(&mut self, point: &ModbusPoint) -> Result<Option<PointValueData>, ProtocolError> {
        let limit = self.request_timeout;
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("link closed".to_string()))?;
        let (address, count) = (point.address, point.read_count());

        let value = match point.register_type {
            RegisterType::Holding => {
                let registers =
                    settle(timeout(limit, context.read_holding_registers(address, count)).await)?;
                decode_registers(&registers, point.data_type)?
            }
            RegisterType::Input => {
                let registers =
                    settle(timeout(limit, context.read_input_registers(address, count)).await)?;
                decode_registers(&registers, point.data_type)?
            }
            RegisterType::Coil => {
                let bits = settle(timeout(limit, context.read_coils(address, count)).await)?;
                decode_bits(bits)
            }
            RegisterType::Discrete => {
                let bits =
                    settle(timeout(limit, context.read_discrete_inputs(address, count)).await)?;
                decode_bits(bits)
            }
        };
        Ok(Some(value))
    }

    async fn write(&mut self, point: &ModbusPoint, value: &PointValueData) -> Result<(), ProtocolError> {
        let limit = self.request_timeout;
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("link closed".to_string()))?;

        match point.register_type {
            RegisterType::Holding => {
                let words = encode_registers(value, point.data_type)?;
                if words.len() == 1 {
                    settle(timeout(limit, context.write_single_register(point.address, words[0])).await)
                } else {
                    settle(timeout(limit, context.write_multiple_registers(point.address, &words)).await)
                }
            }
            RegisterType::Coil => match value {
                PointValueData::Array(items) => {
                    let coils = items
                        .iter()
                        .map(|item| item.as_bool().ok_or_else(|| not_a_coil(item)))
                        .collect::<Result<Vec<_>, _>>()?;
                    settle(timeout(limit, context.write_multiple_coils(point.address, &coils)).await)
                }
                other => {
                    let coil = other.as_bool().ok_or_else(|| not_a_coil(other))?;
                    settle(timeout(limit, context.write_single_coil(point.address, coil)).await)
                }
            },
            RegisterType::Input | RegisterType::Discrete => Err(ProtocolError::Point(format!(
                "{} registers are read-only",
                point.register_type.as_str()
            ))),
        }
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("unit".to_string(), Value::from(self.unit));
        details.insert(
            "request_timeout_ms".to_string(),
            Value::from(self.request_timeout.as_millis() as u64),
        );
        details
    }
}

/// 展开 超时 / 传输错误 / 异常码 三层结果
fn settle<T>(response: Result<tokio_modbus::Result<T>, Elapsed>) -> Result<T, ProtocolError> {
    match response {
        Err(_) => Err(ProtocolError::Timeout("modbus request".to_string())),
        Ok(Err(e)) => Err(ProtocolError::Connection(e.to_string())),
        Ok(Ok(Err(code))) => Err(ProtocolError::Modbus(format!("exception: {:?}", code))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn not_a_coil(value: &PointValueData) -> ProtocolError {
    ProtocolError::Point(format!("value {} is not a coil state", value))
}

fn decode_bits(bits: Vec<bool>) -> PointValueData {
    match bits.as_slice() {
        [single] => PointValueData::Bool(*single),
        _ => PointValueData::Array(bits.into_iter().map(PointValueData::Bool).collect()),
    }
}

/// 解析寄存器数据
fn decode_registers(
    registers: &[u16],
    data_type: Option<ModbusDataType>,
) -> Result<PointValueData, ProtocolError> {
    if registers.is_empty() {
        return Err(ProtocolError::Point("empty registers".to_string()));
    }

    let data_type = match data_type {
        Some(data_type) => data_type,
        None if registers.len() == 1 => return Ok(PointValueData::I64(i64::from(registers[0]))),
        None => {
            return Ok(PointValueData::Array(
                registers
                    .iter()
                    .map(|register| PointValueData::I64(i64::from(*register)))
                    .collect(),
            ));
        }
    };

    if registers.len() < data_type.register_count() {
        return Err(ProtocolError::Point(format!(
            "need {} registers for {:?}",
            data_type.register_count(),
            data_type
        )));
    }

    let value = match data_type {
        ModbusDataType::Int16 => PointValueData::I64(i64::from(registers[0] as i16)),
        ModbusDataType::Uint16 => PointValueData::I64(i64::from(registers[0])),
        ModbusDataType::Int32 => {
            let high = registers[0] as u32;
            let low = registers[1] as u32;
            PointValueData::I64(i64::from(((high << 16) | low) as i32))
        }
        ModbusDataType::Uint32 => {
            let high = registers[0] as u32;
            let low = registers[1] as u32;
            PointValueData::I64(i64::from((high << 16) | low))
        }
        ModbusDataType::Float32 => {
            let high = registers[0] as u32;
            let low = registers[1] as u32;
            PointValueData::F64(f64::from(f32::from_bits((high << 16) | low)))
        }
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, register| (acc << 16) | u64::from(*register));
            PointValueData::F64(f64::from_bits(bits))
        }
    };

    Ok(value)
}

/// 把点位值编码为寄存器（高字在前）
fn encode_registers(
    value: &PointValueData,
    data_type: Option<ModbusDataType>,
) -> Result<Vec<u16>, ProtocolError> {
    let out_of_range = || ProtocolError::Point(format!("value {} does not fit the register", value));

    let Some(data_type) = data_type else {
        return match value {
            PointValueData::Array(items) => items.iter().map(to_word).collect(),
            other => Ok(vec![to_word(other)?]),
        };
    };

    match data_type {
        ModbusDataType::Int16 => {
            let raw = value.as_i64().ok_or_else(out_of_range)?;
            let raw = i16::try_from(raw).map_err(|_| out_of_range())?;
            Ok(vec![raw as u16])
        }
        ModbusDataType::Uint16 => {
            let raw = value.as_i64().ok_or_else(out_of_range)?;
            Ok(vec![u16::try_from(raw).map_err(|_| out_of_range())?])
        }
        ModbusDataType::Int32 => {
            let raw = value.as_i64().ok_or_else(out_of_range)?;
            let raw = i32::try_from(raw).map_err(|_| out_of_range())? as u32;
            Ok(vec![(raw >> 16) as u16, raw as u16])
        }
        ModbusDataType::Uint32 => {
            let raw = value.as_i64().ok_or_else(out_of_range)?;
            let raw = u32::try_from(raw).map_err(|_| out_of_range())?;
            Ok(vec![(raw >> 16) as u16, raw as u16])
        }
        ModbusDataType::Float32 => {
            let bits = (value.as_f64().ok_or_else(out_of_range)? as f32).to_bits();
            Ok(vec![(bits >> 16) as u16, bits as u16])
        }
        ModbusDataType::Float64 => {
            let bits = value.as_f64().ok_or_else(out_of_range)?.to_bits();
            Ok(vec![
                (bits >> 48) as u16,
                (bits >> 32) as u16,
                (bits >> 16) as u16,
                bits as u16,
            ])
        }
    }
}

/// 单个寄存器：接受 -32768..=65535（负数按 int16 补码）
fn to_word(value: &PointValueData) -> Result<u16, ProtocolError> {
    let raw = value
        .as_i64()
        .ok_or_else(|| ProtocolError::Point(format!("value {} is not numeric", value)))?;
    match raw {
        -32_768..=-1 => Ok(raw as i16 as u16),
        0..=65_535 => Ok(raw as u16),
        _ => Err(ProtocolError::Point(format!("value {} does not fit a register", raw))),
    }
}
