//! 点位映射能力：有序映射存储、JSON 持久化、数值变换引擎。

mod store;
mod transform;

pub use store::MappingStore;
pub use transform::{TransformFn, TransformationEngine};

/// 映射相关错误。
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown transformation: {0}")]
    UnknownTransformation(String),
    #[error("transform failed: {0}")]
    Transform(String),
}
