//! 协议处理器契约与通用连接状态机
//!
//! 每种协议只需提供一个 [`ProtocolSpec`]（配置/点位类型、配置模板）和一个
//! [`Transport`] 实现，状态机、互斥、带内错误语义都由 [`Handler`] 统一承担。
//!
//! ```text
//! ProtocolHandler (dyn, 注册表对外暴露)
//!       ▲
//!       │ impl
//! Handler<P: ProtocolSpec>  ── Mutex<HandlerInner> (每次调用全程持有)
//!       │
//!       ├── Box<dyn Transport<P>>  真实传输后端
//!       └── SyntheticTransport<P>  合成数据后端
//! ```

use crate::error::ProtocolError;
use crate::synthetic::Signal;
use crate::types::{BackendKind, HandlerStatus, PointReading, ProtocolKind, now_epoch_ms};
use async_trait::async_trait;
use domain::{ConnectionState, PointValueData};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, error, info, warn};

/// 统一的协议处理器能力接口
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// 协议种类
    fn kind(&self) -> ProtocolKind;

    /// 当前连接状态（不阻塞，不等待进行中的调用）
    fn state(&self) -> ConnectionState;

    /// 建立连接；配置整体替换上一次的配置
    async fn connect(&self, config: Value) -> Result<(), ProtocolError>;

    /// 断开连接并清理本地缓存；已断开时为空操作
    async fn disconnect(&self) -> Result<(), ProtocolError>;

    /// 按给定顺序读取点位，单点失败以带内结果返回
    async fn read_points(&self, points: &[Value]) -> Result<Vec<PointReading>, ProtocolError>;

    /// 写入点位，`points` 与 `values` 长度必须一致
    async fn write_points(
        &self,
        points: &[Value],
        values: &[PointValueData],
    ) -> Result<Vec<bool>, ProtocolError>;

    /// 状态与诊断信息，从不失败
    async fn status(&self) -> HandlerStatus;

    /// 可识别配置项骨架
    fn config_template(&self) -> Value;
}

/// 单个协议变体的静态描述
pub trait ProtocolSpec: Send + Sync + 'static {
    /// 连接配置（connect 时整体捕获，此后不可变）
    type Config: DeserializeOwned + Send + Sync + 'static;
    /// 点位描述
    type Point: DeserializeOwned + Send + Sync + 'static;
    /// 处理器本地缓存（断开时清空）
    type Session: Default + Send + 'static;

    const KIND: ProtocolKind;

    /// 配置模板
    fn template() -> Value;

    /// 连接前的配置校验
    fn validate(_config: &Self::Config) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// 用于日志与状态展示的端点描述
    fn endpoint(config: &Self::Config) -> String;

    /// 点位唯一键（合成后端以此为生成器种子）
    fn point_key(point: &Self::Point) -> String;

    /// 合成后端的信号形态
    fn signal(_point: &Self::Point) -> Signal {
        Signal::default()
    }

    /// 协议相关的状态字段
    fn status_details(_config: &Self::Config, _session: &Self::Session) -> Map<String, Value> {
        Map::new()
    }
}

/// 传输后端：真实链路或合成数据
#[async_trait]
pub trait Transport<P: ProtocolSpec>: Send {
    fn kind(&self) -> BackendKind;

    /// 建立链路；失败时自行释放已申请的资源
    async fn open(&mut self, config: &P::Config) -> Result<(), ProtocolError>;

    /// 释放链路并清空本地缓冲；可重复调用
    async fn close(&mut self);

    /// 读取单个点位；`Ok(None)` 表示暂无数据
    async fn read(&mut self, point: &P::Point) -> Result<Option<PointValueData>, ProtocolError>;

    async fn write(&mut self, point: &P::Point, value: &PointValueData)
        -> Result<(), ProtocolError>;

    fn diagnostics(&self) -> Map<String, Value> {
        Map::new()
    }
}

struct HandlerInner<P: ProtocolSpec> {
    state: ConnectionState,
    config: Option<Arc<P::Config>>,
    transport: Box<dyn Transport<P>>,
    session: P::Session,
    connected_since_ms: Option<i64>,
    last_update_ms: Option<i64>,
    last_error: Option<String>,
}

/// 通用协议处理器
///
/// 一把互斥锁覆盖整个 connect/disconnect/read/write 调用，
/// 读写期间不可能观察到状态迁移。
pub struct Handler<P: ProtocolSpec> {
    inner: Mutex<HandlerInner<P>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<P: ProtocolSpec> Handler<P> {
    pub fn new(transport: Box<dyn Transport<P>>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Mutex::new(HandlerInner {
                state: ConnectionState::Disconnected,
                config: None,
                transport,
                session: P::Session::default(),
                connected_since_ms: None,
                last_update_ms: None,
                last_error: None,
            }),
            state_tx,
        }
    }

    /// 订阅状态变化（供展示层刷新状态栏）
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 当前生效的连接配置
    pub async fn config(&self) -> Option<Arc<P::Config>> {
        self.inner.lock().await.config.clone()
    }

    /// 在 Connected 状态下访问本地缓存与配置（协议扩展操作使用）
    pub(crate) async fn with_session<R>(
        &self,
        f: impl FnOnce(&mut P::Session, &P::Config) -> R,
    ) -> Result<R, ProtocolError> {
        let mut inner = self.inner.lock().await;
        ensure_connected(&inner)?;
        let config = inner.config.clone().ok_or(ProtocolError::NotConnected)?;
        Ok(f(&mut inner.session, &config))
    }

    fn transition(&self, inner: &mut HandlerInner<P>, next: ConnectionState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "invalid transition {} -> {}",
            inner.state,
            next
        );
        debug!(protocol = %P::KIND, from = %inner.state, to = %next, "state transition");
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    async fn open_link(
        &self,
        inner: &mut HandlerInner<P>,
        config: Value,
    ) -> Result<Arc<P::Config>, ProtocolError> {
        let config: P::Config =
            serde_json::from_value(config).map_err(|e| ProtocolError::Config(e.to_string()))?;
        P::validate(&config)?;
        info!(protocol = %P::KIND, endpoint = %P::endpoint(&config), "connecting");
        inner.transport.open(&config).await?;
        Ok(Arc::new(config))
    }

    async fn close_link(&self, inner: &mut HandlerInner<P>) {
        if inner.state == ConnectionState::Connecting {
            // 未完成的连接先收敛到 Error
            self.transition(inner, ConnectionState::Error);
        }
        inner.transport.close().await;
        inner.session = P::Session::default();
        inner.config = None;
        inner.connected_since_ms = None;
        self.transition(inner, ConnectionState::Disconnected);
        info!(protocol = %P::KIND, "disconnected");
    }

    /// 链路故障：先置 Error 再向调用方传播
    fn fail_link(&self, inner: &mut HandlerInner<P>, err: ProtocolError) -> ProtocolError {
        let message = err.to_string();
        error!(protocol = %P::KIND, error = %message, "link failure");
        inner.last_error = Some(message.clone());
        self.transition(inner, ConnectionState::Error);
        ProtocolError::Connection(message)
    }
}

/// 进行中的 connect；调用方丢弃 future 时状态落到 Error
struct ConnectAttempt<'a, P: ProtocolSpec> {
    handler: &'a Handler<P>,
    inner: MutexGuard<'a, HandlerInner<P>>,
}

impl<P: ProtocolSpec> Drop for ConnectAttempt<'_, P> {
    fn drop(&mut self) {
        let inner = &mut *self.inner;
        if inner.state != ConnectionState::Connecting {
            return;
        }
        inner.last_error = Some("connect cancelled".to_string());
        self.handler.transition(inner, ConnectionState::Error);
        gateway_telemetry::record_connect_failure();
        warn!(protocol = %P::KIND, "connect cancelled by caller");
    }
}

fn ensure_connected<P: ProtocolSpec>(inner: &HandlerInner<P>) -> Result<(), ProtocolError> {
    if inner.state.is_connected() {
        Ok(())
    } else {
        Err(ProtocolError::NotConnected)
    }
}

#[async_trait]
impl<P: ProtocolSpec> ProtocolHandler for Handler<P> {
    fn kind(&self) -> ProtocolKind {
        P::KIND
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    async fn connect(&self, config: Value) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnectionState::Disconnected {
            self.close_link(&mut inner).await;
        }
        self.transition(&mut inner, ConnectionState::Connecting);

        let mut attempt = ConnectAttempt {
            handler: self,
            inner,
        };
        let opened = self.open_link(&mut attempt.inner, config).await;
        let inner = &mut *attempt.inner;

        match opened {
            Ok(config) => {
                inner.config = Some(config);
                inner.session = P::Session::default();
                let now = now_epoch_ms();
                inner.connected_since_ms = Some(now);
                inner.last_update_ms = Some(now);
                inner.last_error = None;
                self.transition(inner, ConnectionState::Connected);
                info!(protocol = %P::KIND, "connected");
                Ok(())
            }
            Err(err) => {
                let message = match err {
                    ProtocolError::Connection(message) => message,
                    other => other.to_string(),
                };
                inner.last_error = Some(message.clone());
                self.transition(inner, ConnectionState::Error);
                inner.transport.close().await;
                gateway_telemetry::record_connect_failure();
                error!(protocol = %P::KIND, error = %message, "connect failed");
                Err(ProtocolError::Connection(message))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.close_link(&mut inner).await;
        Ok(())
    }

    async fn read_points(&self, points: &[Value]) -> Result<Vec<PointReading>, ProtocolError> {
        let mut inner = self.inner.lock().await;
        ensure_connected(&inner)?;

        let mut readings = Vec::with_capacity(points.len());
        for raw in points {
            let point = match serde_json::from_value::<P::Point>(raw.clone()) {
                Ok(point) => point,
                Err(e) => {
                    warn!(protocol = %P::KIND, point = %raw, error = %e, "invalid point descriptor");
                    gateway_telemetry::record_read_failure();
                    readings.push(PointReading::bad(format!("invalid point: {}", e)));
                    continue;
                }
            };

            match inner.transport.read(&point).await {
                Ok(Some(value)) => {
                    debug!(protocol = %P::KIND, point = %P::point_key(&point), value = %value, "read point");
                    gateway_telemetry::record_point_read();
                    readings.push(PointReading::good(value));
                }
                Ok(None) => readings.push(PointReading::uncertain("no data received")),
                Err(err) if err.is_link_failure() => return Err(self.fail_link(&mut inner, err)),
                Err(err) => {
                    warn!(protocol = %P::KIND, point = %P::point_key(&point), error = %err, "read failed");
                    gateway_telemetry::record_read_failure();
                    readings.push(PointReading::bad(err.to_string()));
                }
            }
        }

        inner.last_update_ms = Some(now_epoch_ms());
        Ok(readings)
    }

    async fn write_points(
        &self,
        points: &[Value],
        values: &[PointValueData],
    ) -> Result<Vec<bool>, ProtocolError> {
        let mut inner = self.inner.lock().await;
        ensure_connected(&inner)?;
        if points.len() != values.len() {
            return Err(ProtocolError::InvalidArgument(format!(
                "{} points but {} values",
                points.len(),
                values.len()
            )));
        }

        let mut results = Vec::with_capacity(points.len());
        for (raw, value) in points.iter().zip(values) {
            let point = match serde_json::from_value::<P::Point>(raw.clone()) {
                Ok(point) => point,
                Err(e) => {
                    warn!(protocol = %P::KIND, point = %raw, error = %e, "invalid point descriptor");
                    gateway_telemetry::record_write_failure();
                    results.push(false);
                    continue;
                }
            };

            match inner.transport.write(&point, value).await {
                Ok(()) => {
                    debug!(protocol = %P::KIND, point = %P::point_key(&point), value = %value, "wrote point");
                    gateway_telemetry::record_point_written();
                    results.push(true);
                }
                Err(err) if err.is_link_failure() => return Err(self.fail_link(&mut inner, err)),
                Err(err) => {
                    warn!(protocol = %P::KIND, point = %P::point_key(&point), error = %err, "write failed");
                    gateway_telemetry::record_write_failure();
                    results.push(false);
                }
            }
        }

        inner.last_update_ms = Some(now_epoch_ms());
        Ok(results)
    }

    async fn status(&self) -> HandlerStatus {
        let inner = self.inner.lock().await;
        let mut details = inner.transport.diagnostics();
        if let Some(config) = inner.config.as_deref() {
            details.extend(P::status_details(config, &inner.session));
        }
        HandlerStatus {
            protocol: P::KIND,
            state: inner.state,
            connected: inner.state.is_connected(),
            backend: inner.transport.kind(),
            endpoint: inner.config.as_deref().map(P::endpoint),
            connected_since_ms: inner.connected_since_ms,
            last_update_ms: inner.last_update_ms,
            last_error: inner.last_error.clone(),
            details,
        }
    }

    fn config_template(&self) -> Value {
        P::template()
    }
}
