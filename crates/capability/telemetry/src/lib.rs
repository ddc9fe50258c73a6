//! 追踪初始化、传输周期 ID 与进程级计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connect_failures: u64,
    pub points_read: u64,
    pub read_failures: u64,
    pub points_written: u64,
    pub write_failures: u64,
    pub transfers_ok: u64,
    pub transfers_failed: u64,
    pub transfer_cycles: u64,
    pub transfer_latency_ms_total: u64,
    pub auth_success: u64,
    pub auth_failure: u64,
    pub access_denied: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    connect_failures: AtomicU64,
    points_read: AtomicU64,
    read_failures: AtomicU64,
    points_written: AtomicU64,
    write_failures: AtomicU64,
    transfers_ok: AtomicU64,
    transfers_failed: AtomicU64,
    transfer_cycles: AtomicU64,
    transfer_latency_ms_total: AtomicU64,
    auth_success: AtomicU64,
    auth_failure: AtomicU64,
    access_denied: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            connect_failures: AtomicU64::new(0),
            points_read: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            transfers_ok: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfer_cycles: AtomicU64::new(0),
            transfer_latency_ms_total: AtomicU64::new(0),
            auth_success: AtomicU64::new(0),
            auth_failure: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            points_read: self.points_read.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            transfers_ok: self.transfers_ok.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfer_cycles: self.transfer_cycles.load(Ordering::Relaxed),
            transfer_latency_ms_total: self.transfer_latency_ms_total.load(Ordering::Relaxed),
            auth_success: self.auth_success.load(Ordering::Relaxed),
            auth_failure: self.auth_failure.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成一次传输周期的标识，用于串联同一周期内的日志。
pub fn new_transfer_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录连接失败次数。
pub fn record_connect_failure() {
    metrics().connect_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录成功读取的点位数。
pub fn record_point_read() {
    metrics().points_read.fetch_add(1, Ordering::Relaxed);
}

/// 记录点位读取失败次数。
pub fn record_read_failure() {
    metrics().read_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录成功写入的点位数。
pub fn record_point_written() {
    metrics().points_written.fetch_add(1, Ordering::Relaxed);
}

/// 记录点位写入失败次数。
pub fn record_write_failure() {
    metrics().write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录单条映射的传输结果。
pub fn record_transfer(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.transfers_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录一次传输周期耗时（毫秒）。
pub fn record_transfer_cycle_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics.transfer_cycles.fetch_add(1, Ordering::Relaxed);
    metrics
        .transfer_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
}

/// 记录认证结果。
pub fn record_auth(success: bool) {
    let metrics = metrics();
    if success {
        metrics.auth_success.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.auth_failure.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录权限拒绝次数。
pub fn record_access_denied() {
    metrics().access_denied.fetch_add(1, Ordering::Relaxed);
}
