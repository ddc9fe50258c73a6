//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误（传输握手或认证失败、链路中断）
    #[error("connection error: {0}")]
    Connection(String),

    /// 未处于 Connected 状态时读写
    #[error("not connected")]
    NotConnected,

    /// 调用方参数违约（如点位与值数组长度不一致）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// MQTT 错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    Config(String),

    /// 点位描述或点位值错误
    #[error("point error: {0}")]
    Point(String),

    /// 当前后端不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),
}

impl ProtocolError {
    /// 是否为链路级故障（需要把处理器置为 Error 并向调用方传播）。
    ///
    /// 其余错误只影响单个点位，按带内结果返回。
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_) | Self::Timeout(_))
    }
}
