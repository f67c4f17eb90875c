//! 定义了连接的可配置参数。
//! Defines configurable parameters for a broker connection.

use crate::error::{Error, Result};
use std::{collections::HashMap, time::Duration};

/// A getter contract for configuration sources.
///
/// Implementations must fail loudly with [`Error::MissingConfig`] when a
/// property is absent rather than returning a made-up default.
///
/// 配置源的获取器约定。
///
/// 当属性不存在时，实现必须返回 [`Error::MissingConfig`]，而不是返回虚构的默认值。
pub trait ConfigLookup {
    /// Returns the raw value of `property`.
    /// 返回 `property` 的原始值。
    fn get(&self, property: &str) -> Result<String>;
}

impl ConfigLookup for HashMap<String, String> {
    fn get(&self, property: &str) -> Result<String> {
        HashMap::get(self, property)
            .cloned()
            .ok_or_else(|| Error::MissingConfig(property.to_string()))
    }
}

/// A structure containing all configurable parameters for a connection.
///
/// 包含所有连接可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Identifier used in logs.
    /// 用于日志的标识符。
    pub name: String,
    /// How long a connect attempt may stay pending before it is declared failed.
    /// 连接尝试在被判定失败之前可以保持挂起的时长。
    pub fail_after: Duration,
    /// If set, a failed connection retries on its own after this delay
    /// (plus up to 10% jitter).
    /// 如果设置，失败的连接会在此延迟（外加最多10%的抖动）后自动重试。
    pub retry_after: Option<Duration>,
    /// Capacity of the command channel between handles and the actor.
    /// 句柄与 actor 之间命令通道的容量。
    pub command_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            fail_after: Duration::from_secs(60),
            retry_after: None,
            command_buffer: 128,
        }
    }
}

impl ConnectionConfig {
    /// Creates a config with the given name and default timings.
    /// 使用给定名称和默认时间参数创建配置。
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets `fail_after`.
    pub fn with_fail_after(mut self, fail_after: Duration) -> Self {
        self.fail_after = fail_after;
        self
    }

    /// Sets `retry_after`.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Reads a config from a lookup source.
    ///
    /// Reads `name`, `failAfter` and `retryAfter` (seconds, fractions allowed).
    /// Absent properties keep their defaults; every other lookup error and
    /// every unparsable value is returned to the caller.
    ///
    /// 从查找源读取配置。缺失的属性保留默认值；其他查找错误以及无法解析的值都会返回给调用者。
    pub fn from_lookup(lookup: &dyn ConfigLookup) -> Result<Self> {
        let mut config = Self::default();
        if let Some(name) = optional(lookup, "name")? {
            config.name = name;
        }
        if let Some(raw) = optional(lookup, "failAfter")? {
            config.fail_after = parse_seconds("failAfter", &raw)?;
        }
        if let Some(raw) = optional(lookup, "retryAfter")? {
            config.retry_after = Some(parse_seconds("retryAfter", &raw)?);
        }
        Ok(config)
    }
}

fn optional(lookup: &dyn ConfigLookup, property: &str) -> Result<Option<String>> {
    match lookup.get(property) {
        Ok(value) => Ok(Some(value)),
        Err(Error::MissingConfig(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_seconds(property: &str, raw: &str) -> Result<Duration> {
    let invalid = |message: String| Error::InvalidConfig {
        property: property.to_string(),
        message,
    };
    let secs: f64 = raw.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_properties_fall_back_to_defaults() {
        // The getter raises for every property; construction must still succeed.
        let config = ConnectionConfig::from_lookup(&lookup(&[])).unwrap();
        assert_eq!(config.name, "default");
        assert_eq!(config.fail_after, Duration::from_secs(60));
        assert!(config.retry_after.is_none());
    }

    #[test]
    fn test_fractional_fail_after() {
        let config =
            ConnectionConfig::from_lookup(&lookup(&[("name", "failure"), ("failAfter", ".05")]))
                .unwrap();
        assert_eq!(config.name, "failure");
        assert_eq!(config.fail_after, Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_value_is_propagated() {
        let err = ConnectionConfig::from_lookup(&lookup(&[("failAfter", "soon")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref property, .. } if property == "failAfter"));

        let err = ConnectionConfig::from_lookup(&lookup(&[("retryAfter", "-1")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_lookup_errors_other_than_missing_are_propagated() {
        struct Broken;
        impl ConfigLookup for Broken {
            fn get(&self, _property: &str) -> Result<String> {
                Err(Error::transport("config store offline"))
            }
        }
        assert!(ConnectionConfig::from_lookup(&Broken).is_err());
    }
}
