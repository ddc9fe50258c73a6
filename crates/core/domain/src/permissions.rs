//! 角色与权限表（进程生命周期内固定）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_VIEWER: &str = "viewer";

pub const PERMISSION_READ: &str = "read";
pub const PERMISSION_WRITE: &str = "write";
pub const PERMISSION_CONFIGURE: &str = "configure";
pub const PERMISSION_MANAGE_USERS: &str = "manage_users";

/// 全部权限码。
pub const PERMISSION_CODES: [&str; 4] = [
    PERMISSION_READ,
    PERMISSION_WRITE,
    PERMISSION_CONFIGURE,
    PERMISSION_MANAGE_USERS,
];

/// 未知角色或权限码。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionParseError {
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Configure,
    ManageUsers,
}

impl Permission {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => PERMISSION_READ,
            Self::Write => PERMISSION_WRITE,
            Self::Configure => PERMISSION_CONFIGURE,
            Self::ManageUsers => PERMISSION_MANAGE_USERS,
        }
    }
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            PERMISSION_READ => Ok(Self::Read),
            PERMISSION_WRITE => Ok(Self::Write),
            PERMISSION_CONFIGURE => Ok(Self::Configure),
            PERMISSION_MANAGE_USERS => Ok(Self::ManageUsers),
            other => Err(PermissionParseError::InvalidPermission(other.to_string())),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => ROLE_ADMIN,
            Self::Operator => ROLE_OPERATOR,
            Self::Viewer => ROLE_VIEWER,
        }
    }

    /// 角色 → 权限映射。
    pub const fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::Admin => &[
                Permission::Read,
                Permission::Write,
                Permission::Configure,
                Permission::ManageUsers,
            ],
            Self::Operator => &[Permission::Read, Permission::Write],
            Self::Viewer => &[Permission::Read],
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl FromStr for Role {
    type Err = PermissionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            ROLE_ADMIN => Ok(Self::Admin),
            ROLE_OPERATOR => Ok(Self::Operator),
            ROLE_VIEWER => Ok(Self::Viewer),
            other => Err(PermissionParseError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
