use serde::{Deserialize, Serialize};
use std::fmt;

/// 协议处理器连接状态。
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──ok──▶ Connected
///      ▲                        │                 │
///      │                        └──fail──▶ Error ◀┤ 链路中断
///      └────────────── disconnect ────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// 状态迁移是否合法。
    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Error, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Error)
                | (Self::Connected, Self::Error)
                | (Self::Connected | Self::Error, Self::Disconnected)
                | (Self::Disconnected, Self::Disconnected)
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
