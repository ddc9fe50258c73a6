//! 合成数据后端
//!
//! 没有真实设备时使用：按点位键生成“确定但变化”的数值，
//! 同一键、同一读次序总是得到同样的值，便于测试复现。
//! 写入的值原样保存并在后续读取中返回；断开时缓冲清空。

use crate::error::ProtocolError;
use crate::handler::{ProtocolSpec, Transport};
use crate::types::BackendKind;
use async_trait::async_trait;
use domain::PointValueData;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;

/// 合成信号形态
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// 在区间内缓慢漂移的模拟量
    Analog { min: f64, max: f64 },
    /// 开关量
    Binary,
    /// 单调递增计数器（到 max 回绕）
    Counter { max: i64 },
    /// 从候选中固定选取一个文本
    Text(&'static [&'static str]),
}

impl Default for Signal {
    fn default() -> Self {
        Self::Analog {
            min: 0.0,
            max: 100.0,
        }
    }
}

#[derive(Debug, Default)]
struct SimPoint {
    reads: u64,
    written: Option<PointValueData>,
}

pub struct SyntheticTransport<P> {
    points: HashMap<String, SimPoint>,
    _protocol: PhantomData<fn() -> P>,
}

impl<P> SyntheticTransport<P> {
    pub fn new() -> Self {
        Self {
            points: HashMap::new(),
            _protocol: PhantomData,
        }
    }
}

impl<P> Default for SyntheticTransport<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: ProtocolSpec> Transport<P> for SyntheticTransport<P> {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulation
    }

    async fn open(&mut self, _config: &P::Config) -> Result<(), ProtocolError> {
        self.points.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.points.clear();
    }

    async fn read(&mut self, point: &P::Point) -> Result<Option<PointValueData>, ProtocolError> {
        let key = P::point_key(point);
        let seed = fnv1a(&key);
        let entry = self.points.entry(key).or_default();
        if let Some(value) = &entry.written {
            return Ok(Some(value.clone()));
        }
        let value = synthesize(&P::signal(point), seed, entry.reads);
        entry.reads += 1;
        Ok(Some(value))
    }

    async fn write(&mut self, point: &P::Point, value: &PointValueData) -> Result<(), ProtocolError> {
        let entry = self.points.entry(P::point_key(point)).or_default();
        entry.written = Some(value.clone());
        Ok(())
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("mode".to_string(), Value::from("SIMULATION"));
        details.insert("points_count".to_string(), Value::from(self.points.len()));
        details
    }
}

/// 第 `n` 次读取时的合成值
pub(crate) fn synthesize(signal: &Signal, seed: u64, n: u64) -> PointValueData {
    match signal {
        Signal::Analog { min, max } => {
            let span = (max - min).abs();
            let base = min + (seed % 10_000) as f64 / 10_000.0 * span;
            let drift = span * 0.005 * (n as f64 * 0.7 + (seed % 7) as f64).sin();
            PointValueData::F64((base + drift).clamp(min.min(*max), min.max(*max)))
        }
        Signal::Binary => PointValueData::Bool(seed.wrapping_add(n / 5) % 2 == 1),
        Signal::Counter { max } => {
            let max = (*max).max(1) as u64;
            PointValueData::I64(((seed % max).wrapping_add(n) % max) as i64)
        }
        Signal::Text(options) => match options.len() {
            0 => PointValueData::String(String::new()),
            len => PointValueData::String(options[(seed % len as u64) as usize].to_string()),
        },
    }
}

/// FNV-1a 64 位哈希（跨进程稳定）
fn fnv1a(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_is_deterministic_and_bounded() {
        let signal = Signal::Analog {
            min: 20.0,
            max: 30.0,
        };
        let seed = fnv1a("Device1.Temperature");
        let first: Vec<_> = (0..20).map(|n| synthesize(&signal, seed, n)).collect();
        let second: Vec<_> = (0..20).map(|n| synthesize(&signal, seed, n)).collect();
        assert_eq!(first, second);

        for value in &first {
            let value = value.as_f64().unwrap();
            assert!((20.0..=30.0).contains(&value));
        }
        assert!(first.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn test_counter_increments_and_wraps() {
        let signal = Signal::Counter { max: 1000 };
        let a = synthesize(&signal, 999, 0).as_i64().unwrap();
        let b = synthesize(&signal, 999, 1).as_i64().unwrap();
        assert_eq!(a, 999);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_fnv_is_stable() {
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a("a"), fnv1a("b"));
    }
}
