//! 转发周期：读源点位 → 变换 → 写目标点位。
//!
//! 每个周期基于已启用映射的快照执行；单个映射失败不影响其余映射。

use crate::{Gateway, GatewayError};
use domain::{Mapping, Permission, PointValueData};
use gateway_protocol::{PointReading, Quality};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

/// 单个映射的转发结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    /// 写入成功（值为变换后的值）
    Transferred { value: PointValueData },
    /// 源读数非 good，本周期跳过
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOutcome {
    /// 映射在存储中的索引
    pub index: usize,
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub status: TransferStatus,
}

/// 一个转发周期的汇总。
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub transfer_id: String,
    pub outcomes: Vec<TransferOutcome>,
    pub elapsed_ms: u64,
}

impl TransferReport {
    pub fn transferred(&self) -> usize {
        self.count(|status| matches!(status, TransferStatus::Transferred { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, TransferStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, TransferStatus::Failed { .. }))
    }

    /// 按映射索引查找结果
    pub fn outcome(&self, index: usize) -> Option<&TransferOutcome> {
        self.outcomes.iter().find(|outcome| outcome.index == index)
    }

    fn count(&self, predicate: impl Fn(&TransferStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

impl Gateway {
    /// 执行一次转发周期（需要 read + write 权限）
    pub async fn transfer_once(&self, token: &str) -> Result<TransferReport, GatewayError> {
        self.authorize(token, Permission::Read)?;
        self.authorize(token, Permission::Write)?;

        let transfer_id = gateway_telemetry::new_transfer_id();
        let span = tracing::info_span!("transfer", transfer_id = %transfer_id);
        async move {
            let started = Instant::now();
            let mut outcomes = Vec::new();
            for (index, mapping) in self.mappings.enabled_mappings() {
                let status = self.transfer_mapping(&mapping).await;
                match &status {
                    TransferStatus::Transferred { .. } => gateway_telemetry::record_transfer(true),
                    TransferStatus::Failed { error } => {
                        gateway_telemetry::record_transfer(false);
                        warn!(index, source = %mapping.source.name(), error = %error, "mapping transfer failed");
                    }
                    TransferStatus::Skipped { reason } => {
                        debug!(index, source = %mapping.source.name(), reason = %reason, "mapping skipped");
                    }
                }
                outcomes.push(TransferOutcome {
                    index,
                    source: mapping.source.name().to_string(),
                    destination: mapping.destination.name().to_string(),
                    status,
                });
            }

            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            gateway_telemetry::record_transfer_cycle_ms(elapsed_ms);
            let report = TransferReport {
                transfer_id,
                outcomes,
                elapsed_ms,
            };
            info!(
                transferred = report.transferred(),
                skipped = report.skipped(),
                failed = report.failed(),
                elapsed_ms,
                "transfer cycle completed"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn transfer_mapping(&self, mapping: &Mapping) -> TransferStatus {
        let failed = |error: String| TransferStatus::Failed { error };

        let source = match self.handler(mapping.source.protocol()) {
            Ok(handler) => handler,
            Err(err) => return failed(err.to_string()),
        };
        let destination = match self.handler(mapping.destination.protocol()) {
            Ok(handler) => handler,
            Err(err) => return failed(err.to_string()),
        };
        let function = match self.transforms.resolve(mapping.transformation.as_deref()) {
            Ok(function) => function,
            Err(err) => return failed(err.to_string()),
        };

        let reading = match source
            .read_points(std::slice::from_ref(mapping.source.address()))
            .await
        {
            Ok(mut readings) if !readings.is_empty() => readings.swap_remove(0),
            Ok(_) => return failed("source returned no reading".to_string()),
            Err(err) => return failed(err.to_string()),
        };
        let value = match reading {
            PointReading {
                value: Some(value),
                quality: Quality::Good,
                ..
            } => value,
            other => {
                return TransferStatus::Skipped {
                    reason: other
                        .error
                        .unwrap_or_else(|| format!("{:?} reading", other.quality).to_lowercase()),
                };
            }
        };

        let value = match function(&value) {
            Ok(value) => value,
            Err(err) => return failed(err.to_string()),
        };
        match destination
            .write_points(
                std::slice::from_ref(mapping.destination.address()),
                std::slice::from_ref(&value),
            )
            .await
        {
            Ok(results) if results.first() == Some(&true) => TransferStatus::Transferred { value },
            Ok(_) => failed("destination rejected the write".to_string()),
            Err(err) => failed(err.to_string()),
        }
    }
}

/// 周期性转发，直到收到关闭信号或令牌失去权限（例如过期）。
pub async fn run_transfer_loop(
    gateway: Arc<Gateway>,
    token: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "transfer loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match gateway.transfer_once(&token).await {
                    Ok(_) => {}
                    Err(GatewayError::AccessDenied) => {
                        warn!("transfer loop stopped: access denied");
                        return Err(GatewayError::AccessDenied);
                    }
                    Err(err) => warn!(error = %err, "transfer cycle failed"),
                }
            }
        }
    }

    info!("transfer loop stopped");
    Ok(())
}
