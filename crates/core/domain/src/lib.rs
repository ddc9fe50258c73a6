//! 网关核心领域模型：点位值、数据点与映射、连接状态、角色权限表。

pub mod data;
pub mod mapping;
pub mod permissions;
pub mod state;

pub use data::PointValueData;
pub use mapping::{DataPoint, Mapping};
pub use permissions::{Permission, PermissionParseError, Role};
pub use state::ConnectionState;
