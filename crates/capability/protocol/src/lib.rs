//! # 协议处理器能力模块
//!
//! 七种工业协议共用同一套连接状态机与读写语义：
//! - **Modbus TCP**：保持/输入寄存器、线圈、离散输入（`tokio-modbus`）
//! - **OPC UA**：client 会话读写节点（`opcua`）/ server 节点表
//! - **DNP3**：合成数据
//! - **IEC 60870-5-104**：TCP + STARTDT/STOPDT 握手
//! - **IEC 61850**：TCP 链路、报告订阅与数据集缓存
//! - **OPC DA**：合成数据、标签浏览
//! - **MQTT**：主题订阅缓存与发布（`rumqttc`）
//!
//! ## 架构设计
//!
//! ```text
//! HandlerRegistry::initialize(BackendMode)
//!       │
//!       ├── Handler<Modbus>    ── ModbusTransport   | SyntheticTransport
//!       ├── Handler<OpcUa>     ── OpcUaTransport    | SyntheticTransport
//!       ├── Handler<Dnp3>      ──                     SyntheticTransport
//!       ├── Handler<Iec104>    ── Iec104Transport   | SyntheticTransport
//!       ├── Handler<Iec61850>  ── Iec61850Transport | SyntheticTransport
//!       ├── Handler<OpcDa>     ──                     SyntheticTransport
//!       └── Handler<Mqtt>      ── MqttTransport     | SyntheticTransport
//!       │
//!       ▼
//! dyn ProtocolHandler (connect / disconnect / read_points / write_points / status)
//! ```
//!
//! ## 错误语义
//!
//! - 未连接时读写：`ProtocolError::NotConnected`
//! - 单点失败：带内返回（`PointReading::bad` / `false`）
//! - 链路故障：处理器进入 `Error` 并返回 `ProtocolError::Connection`

mod dnp3;
mod error;
mod handler;
mod iec104;
mod iec61850;
mod link;
mod modbus;
mod mqtt;
mod opcda;
mod opcua;
mod registry;
mod synthetic;
mod types;

pub use dnp3::{Dnp3, Dnp3Config, Dnp3Point, Dnp3PointType};
pub use error::ProtocolError;
pub use handler::{Handler, ProtocolHandler, ProtocolSpec, Transport};
pub use iec104::{
    Iec104, Iec104Config, Iec104Point, Iec104Transport, STARTDT_ACT, STARTDT_CON, STOPDT_ACT,
    STOPDT_CON, TESTFR_ACT, TESTFR_CON,
};
pub use iec61850::{
    ConnectionStats, Dataset, Iec61850, Iec61850Config, Iec61850Point, Iec61850Transport,
    ReportSubscription, ServerModel,
};
pub use modbus::{Modbus, ModbusConfig, ModbusDataType, ModbusPoint, ModbusTransport, RegisterType};
pub use mqtt::{Mqtt, MqttConfig, MqttPoint, MqttTransport};
pub use opcda::{OpcDa, OpcDaConfig, OpcDaGroup, SAMPLE_TAGS};
pub use opcua::{OpcUa, OpcUaConfig, OpcUaMode, OpcUaNode, OpcUaPoint, OpcUaTransport};
pub use registry::HandlerRegistry;
pub use synthetic::{Signal, SyntheticTransport};
pub use types::*;
