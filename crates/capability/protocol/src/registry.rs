//! 处理器注册表
//!
//! 每种协议恰好一个处理器，生命周期与注册表一致。

use crate::dnp3::Dnp3;
use crate::error::ProtocolError;
use crate::handler::{Handler, ProtocolHandler, ProtocolSpec, Transport};
use crate::iec104::{Iec104, Iec104Transport};
use crate::iec61850::{Iec61850, Iec61850Transport};
use crate::modbus::{Modbus, ModbusTransport};
use crate::mqtt::{Mqtt, MqttTransport};
use crate::opcda::OpcDa;
use crate::opcua::{OpcUa, OpcUaTransport};
use crate::synthetic::SyntheticTransport;
use crate::types::{BackendMode, ProtocolKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct HandlerRegistry {
    handlers: [Arc<dyn ProtocolHandler>; 7],
    opc_ua: Arc<Handler<OpcUa>>,
    opc_da: Arc<Handler<OpcDa>>,
    iec61850: Arc<Handler<Iec61850>>,
    mode: BackendMode,
}

/// 按后端模式选择传输实现；DNP3、OPC DA 只有合成后端
fn transport<P: ProtocolSpec>(
    mode: BackendMode,
    real: impl FnOnce() -> Box<dyn Transport<P>>,
) -> Box<dyn Transport<P>> {
    match mode {
        BackendMode::Transport => real(),
        BackendMode::Synthetic => Box::new(SyntheticTransport::<P>::new()),
    }
}

impl HandlerRegistry {
    pub fn initialize(mode: BackendMode) -> Self {
        let opc_ua = Arc::new(Handler::new(transport::<OpcUa>(mode, || {
            Box::new(OpcUaTransport::new())
        })));
        let opc_da = Arc::new(Handler::<OpcDa>::new(Box::new(SyntheticTransport::new())));
        let iec61850 = Arc::new(Handler::new(transport::<Iec61850>(mode, || {
            Box::new(Iec61850Transport::new())
        })));

        // 顺序与 ProtocolKind::ALL 一致
        let handlers: [Arc<dyn ProtocolHandler>; 7] = [
            Arc::new(Handler::new(transport::<Modbus>(mode, || {
                Box::new(ModbusTransport::new())
            }))),
            opc_ua.clone(),
            Arc::new(Handler::<Dnp3>::new(Box::new(SyntheticTransport::new()))),
            Arc::new(Handler::new(transport::<Iec104>(mode, || {
                Box::new(Iec104Transport::new())
            }))),
            iec61850.clone(),
            opc_da.clone(),
            Arc::new(Handler::new(transport::<Mqtt>(mode, || {
                Box::new(MqttTransport::new())
            }))),
        ];

        info!(mode = ?mode, handlers = handlers.len(), "protocol handlers initialized");
        Self {
            handlers,
            opc_ua,
            opc_da,
            iec61850,
            mode,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// 按名称查找（展示名或别名，大小写不敏感）
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProtocolHandler>, ProtocolError> {
        let kind: ProtocolKind = name.parse()?;
        Ok(self.handler(kind))
    }

    pub fn handler(&self, kind: ProtocolKind) -> Arc<dyn ProtocolHandler> {
        self.handlers[kind as usize].clone()
    }

    /// 展示名列表（注册表顺序）
    pub fn names(&self) -> Vec<&'static str> {
        ProtocolKind::ALL.iter().map(ProtocolKind::display_name).collect()
    }

    /// 展示名 → 处理器
    pub fn to_map(&self) -> BTreeMap<&'static str, Arc<dyn ProtocolHandler>> {
        ProtocolKind::ALL
            .iter()
            .map(|kind| (kind.display_name(), self.handler(*kind)))
            .collect()
    }

    pub fn opc_ua(&self) -> Arc<Handler<OpcUa>> {
        self.opc_ua.clone()
    }

    pub fn opc_da(&self) -> Arc<Handler<OpcDa>> {
        self.opc_da.clone()
    }

    pub fn iec61850(&self) -> Arc<Handler<Iec61850>> {
        self.iec61850.clone()
    }

    /// 关闭全部处理器；单个失败只记录日志，不中断其余处理器
    pub async fn close_all(&self) {
        for handler in &self.handlers {
            if let Err(e) = handler.disconnect().await {
                warn!(protocol = %handler.kind(), error = %e, "disconnect failed during shutdown");
            }
        }
        info!("all protocol handlers closed");
    }
}
