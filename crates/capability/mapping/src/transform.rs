//! 数值变换引擎
//!
//! 变换以名称登记为纯函数，执行时按名称解析，名称从不作为代码求值。
//!
//! 名称格式：
//! - 内置：`identity`、`negate`、`abs`、`round`、`invert`、`to_bool`、`to_int`、
//!   `to_float`、`to_string`、`celsius_to_fahrenheit`、`fahrenheit_to_celsius`
//! - 参数化：`scale:<k>`、`offset:<b>`、`clamp:<lo>:<hi>`
//!
//! 数值变换对数组逐元素生效。

use crate::MappingError;
use domain::PointValueData;
use std::collections::HashMap;
use std::sync::Arc;

/// 已解析的变换函数。
pub type TransformFn =
    Arc<dyn Fn(&PointValueData) -> Result<PointValueData, MappingError> + Send + Sync>;

pub struct TransformationEngine {
    functions: HashMap<String, TransformFn>,
}

impl Default for TransformationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformationEngine {
    /// 带全部内置变换的引擎
    pub fn new() -> Self {
        let mut engine = Self {
            functions: HashMap::new(),
        };
        engine.register("identity", |value| Ok(value.clone()));
        engine.register("negate", negate);
        engine.register("abs", abs);
        engine.register("round", |value| map_numeric(value, f64::round));
        engine.register("invert", |value| {
            value
                .as_bool()
                .map(|flag| PointValueData::Bool(!flag))
                .ok_or_else(|| not_convertible(value, "bool"))
        });
        engine.register("to_bool", |value| {
            value
                .as_bool()
                .map(PointValueData::Bool)
                .ok_or_else(|| not_convertible(value, "bool"))
        });
        engine.register("to_int", |value| {
            value
                .as_i64()
                .map(PointValueData::I64)
                .ok_or_else(|| not_convertible(value, "int"))
        });
        engine.register("to_float", |value| {
            value
                .as_f64()
                .map(PointValueData::F64)
                .ok_or_else(|| not_convertible(value, "float"))
        });
        engine.register("to_string", |value| match value {
            PointValueData::String(_) => Ok(value.clone()),
            other => Ok(PointValueData::String(other.to_string())),
        });
        engine.register("celsius_to_fahrenheit", |value| {
            map_numeric(value, |celsius| celsius * 9.0 / 5.0 + 32.0)
        });
        engine.register("fahrenheit_to_celsius", |value| {
            map_numeric(value, |fahrenheit| (fahrenheit - 32.0) * 5.0 / 9.0)
        });
        engine
    }

    /// 登记（或覆盖）一个命名变换
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&PointValueData) -> Result<PointValueData, MappingError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// 已登记的名称（排序）；参数化变换不在其中
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// 解析变换名；None 为恒等变换
    pub fn resolve(&self, name: Option<&str>) -> Result<TransformFn, MappingError> {
        let Some(name) = name.map(str::trim) else {
            let identity: TransformFn = Arc::new(|value: &PointValueData| Ok(value.clone()));
            return Ok(identity);
        };
        if let Some(function) = self.functions.get(name) {
            return Ok(function.clone());
        }
        parameterized(name).ok_or_else(|| MappingError::UnknownTransformation(name.to_string()))
    }

    /// 解析并执行
    pub fn apply(
        &self,
        name: Option<&str>,
        value: &PointValueData,
    ) -> Result<PointValueData, MappingError> {
        let function = self.resolve(name)?;
        function(value)
    }
}

fn parameterized(name: &str) -> Option<TransformFn> {
    let mut parts = name.split(':');
    let function = parts.next()?;
    let params = parts
        .map(|part| part.trim().parse::<f64>().ok().filter(|value| value.is_finite()))
        .collect::<Option<Vec<f64>>>()?;

    let function: TransformFn = match (function, params.as_slice()) {
        ("scale", [factor]) => {
            let factor = *factor;
            Arc::new(move |value: &PointValueData| map_numeric(value, |x| x * factor))
        }
        ("offset", [delta]) => {
            let delta = *delta;
            Arc::new(move |value: &PointValueData| map_numeric(value, |x| x + delta))
        }
        ("clamp", [low, high]) if low <= high => {
            let (low, high) = (*low, *high);
            Arc::new(move |value: &PointValueData| map_numeric(value, |x| x.clamp(low, high)))
        }
        _ => return None,
    };
    Some(function)
}

fn negate(value: &PointValueData) -> Result<PointValueData, MappingError> {
    match value {
        PointValueData::I64(number) => number
            .checked_neg()
            .map(PointValueData::I64)
            .ok_or_else(|| MappingError::Transform(format!("negate overflows: {}", number))),
        PointValueData::Array(items) => items
            .iter()
            .map(negate)
            .collect::<Result<Vec<_>, _>>()
            .map(PointValueData::Array),
        other => map_numeric(other, |x| -x),
    }
}

fn abs(value: &PointValueData) -> Result<PointValueData, MappingError> {
    match value {
        PointValueData::I64(number) => number
            .checked_abs()
            .map(PointValueData::I64)
            .ok_or_else(|| MappingError::Transform(format!("abs overflows: {}", number))),
        PointValueData::Array(items) => items
            .iter()
            .map(abs)
            .collect::<Result<Vec<_>, _>>()
            .map(PointValueData::Array),
        other => map_numeric(other, f64::abs),
    }
}

/// 数值视图上的变换，结果为浮点；数组逐元素
fn map_numeric(
    value: &PointValueData,
    function: impl Fn(f64) -> f64 + Copy,
) -> Result<PointValueData, MappingError> {
    match value {
        PointValueData::Array(items) => items
            .iter()
            .map(|item| map_numeric(item, function))
            .collect::<Result<Vec<_>, _>>()
            .map(PointValueData::Array),
        other => other
            .as_f64()
            .map(|number| PointValueData::F64(function(number)))
            .ok_or_else(|| not_convertible(other, "number")),
    }
}

fn not_convertible(value: &PointValueData, target: &str) -> MappingError {
    MappingError::Transform(format!("cannot convert {} to {}", value, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_parsing() {
        assert!(parameterized("scale:2.5").is_some());
        assert!(parameterized("offset:-3").is_some());
        assert!(parameterized("clamp:0:100").is_some());
        assert!(parameterized("clamp:100:0").is_none());
        assert!(parameterized("scale").is_none());
        assert!(parameterized("scale:abc").is_none());
        assert!(parameterized("scale:1:2").is_none());
        assert!(parameterized("scale:NaN").is_none());
        assert!(parameterized("eval:1").is_none());
    }

    #[test]
    fn integer_negate_keeps_integer() {
        assert_eq!(negate(&PointValueData::I64(5)).expect("negate"), PointValueData::I64(-5));
        assert!(negate(&PointValueData::I64(i64::MIN)).is_err());
    }
}
