//! IEC 60870-5-104 处理器
//!
//! 真实后端完成 TCP 连接与 STARTDT 握手，断开前发送 STOPDT。
//! ASDU 编解码尚未接入，点位读写以带内失败返回。
//!
//! U 帧格式（APCI，6 字节）：
//!
//! ```text
//! 0x68 | 长度(0x04) | 控制域1 | 0x00 | 0x00 | 0x00
//! ```

use crate::error::ProtocolError;
use crate::handler::{ProtocolSpec, Transport};
use crate::link::connect_tcp;
use crate::types::{BackendKind, ProtocolKind};
use async_trait::async_trait;
use domain::PointValueData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
pub const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];
pub const STOPDT_ACT: [u8; 6] = [0x68, 0x04, 0x13, 0x00, 0x00, 0x00];
pub const STOPDT_CON: [u8; 6] = [0x68, 0x04, 0x23, 0x00, 0x00, 0x00];
pub const TESTFR_ACT: [u8; 6] = [0x68, 0x04, 0x43, 0x00, 0x00, 0x00];
pub const TESTFR_CON: [u8; 6] = [0x68, 0x04, 0x83, 0x00, 0x00, 0x00];

/// t1：发送后等待确认的超时
const T1: Duration = Duration::from_secs(15);
const STOPDT_GRACE: Duration = Duration::from_millis(500);
/// 信息对象地址为 3 字节
const MAX_IOA: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec104Config {
    pub ip: String,
    #[serde(default = "default_iec104_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub common_address: u16,
    #[serde(default = "default_address")]
    pub asdu_address: u16,
    #[serde(default)]
    pub originator_address: u8,
}

fn default_iec104_port() -> u16 {
    2404
}

fn default_address() -> u16 {
    1
}

/// 点位：信息对象地址或 `{ioa}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Iec104Point {
    Ioa(u32),
    Object { ioa: u32 },
}

impl Iec104Point {
    pub fn ioa(&self) -> u32 {
        match self {
            Self::Ioa(ioa) | Self::Object { ioa } => *ioa,
        }
    }
}

pub struct Iec104;

impl ProtocolSpec for Iec104 {
    type Config = Iec104Config;
    type Point = Iec104Point;
    type Session = ();

    const KIND: ProtocolKind = ProtocolKind::Iec104;

    fn template() -> Value {
        json!({
            "ip": "",
            "port": default_iec104_port(),
            "common_address": default_address(),
            "asdu_address": default_address(),
            "originator_address": 0
        })
    }

    fn validate(config: &Iec104Config) -> Result<(), ProtocolError> {
        if config.ip.trim().is_empty() {
            return Err(ProtocolError::Config("ip is empty".to_string()));
        }
        if config.common_address == 0 {
            return Err(ProtocolError::Config("common_address 0 is not assignable".to_string()));
        }
        Ok(())
    }

    fn endpoint(config: &Iec104Config) -> String {
        format!("{}:{}/{}", config.ip, config.port, config.common_address)
    }

    fn point_key(point: &Iec104Point) -> String {
        point.ioa().to_string()
    }

    fn status_details(config: &Iec104Config, _session: &()) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("common_address".to_string(), Value::from(config.common_address));
        details.insert("originator_address".to_string(), Value::from(config.originator_address));
        details
    }
}

/// IEC 104 传输后端
#[derive(Default)]
pub struct Iec104Transport {
    stream: Option<TcpStream>,
}

impl Iec104Transport {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 读取一个 U 帧
async fn read_u_frame(stream: &mut TcpStream) -> Result<[u8; 6], ProtocolError> {
    let mut frame = [0u8; 6];
    stream.read_exact(&mut frame).await?;
    if frame[0] != 0x68 || frame[1] != 0x04 || frame[2] & 0x03 != 0x03 {
        return Err(ProtocolError::Connection(format!(
            "unexpected APCI frame: {:02X?}",
            frame
        )));
    }
    Ok(frame)
}

/// 发送 `request` 并等待 `confirm`；期间收到的 TESTFR act 立即应答
async fn exchange(
    stream: &mut TcpStream,
    request: [u8; 6],
    confirm: [u8; 6],
) -> Result<(), ProtocolError> {
    stream.write_all(&request).await?;
    loop {
        let frame = read_u_frame(stream).await?;
        if frame == confirm {
            return Ok(());
        }
        if frame == TESTFR_ACT {
            stream.write_all(&TESTFR_CON).await?;
            continue;
        }
        debug!(frame = ?frame, "ignoring U-frame while waiting for confirmation");
    }
}

#[async_trait]
impl Transport<Iec104> for Iec104Transport {
    fn kind(&self) -> BackendKind {
        BackendKind::Transport
    }

    async fn open(&mut self, config: &Iec104Config) -> Result<(), ProtocolError> {
        let mut stream = connect_tcp(&config.ip, config.port, T1).await?;
        timeout(T1, exchange(&mut stream, STARTDT_ACT, STARTDT_CON))
            .await
            .map_err(|_| ProtocolError::Timeout("STARTDT confirmation".to_string()))??;
        debug!(ip = %config.ip, port = config.port, "STARTDT confirmed");
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        match timeout(STOPDT_GRACE, exchange(&mut stream, STOPDT_ACT, STOPDT_CON)).await {
            Ok(Ok(())) => debug!("STOPDT confirmed"),
            Ok(Err(e)) => warn!(error = %e, "STOPDT failed"),
            Err(_) => warn!("STOPDT confirmation timed out"),
        }
        let _ = stream.shutdown().await;
    }

    async fn read(&mut self, point: &Iec104Point) -> Result<Option<PointValueData>, ProtocolError> {
        self.ensure_point(point)?;
        Err(ProtocolError::Unsupported("IEC 104 ASDU read".to_string()))
    }

    async fn write(&mut self, point: &Iec104Point, _value: &PointValueData) -> Result<(), ProtocolError> {
        self.ensure_point(point)?;
        Err(ProtocolError::Unsupported("IEC 104 ASDU command".to_string()))
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("data_transfer".to_string(), Value::from(self.stream.is_some()));
        details
    }
}

impl Iec104Transport {
    fn ensure_point(&self, point: &Iec104Point) -> Result<(), ProtocolError> {
        if self.stream.is_none() {
            return Err(ProtocolError::Connection("link closed".to_string()));
        }
        if point.ioa() > MAX_IOA {
            return Err(ProtocolError::Point(format!("ioa {} exceeds 3 bytes", point.ioa())));
        }
        Ok(())
    }
}
