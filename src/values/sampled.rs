// 时间序列
//
// schedule 资源的内容：按时间戳排序的采样值集合

use super::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 采样质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Good,
    Bad,
}

/// 单个采样点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    /// 毫秒时间戳（1970-01-01 起）
    pub timestamp: i64,
    pub value: Value,
    pub quality: Quality,
}

impl SampledValue {
    pub fn new(timestamp: i64, value: Value, quality: Quality) -> Self {
        Self { timestamp, value, quality }
    }

    pub fn good(timestamp: i64, value: Value) -> Self {
        Self::new(timestamp, value, Quality::Good)
    }

    /// 时间戳对应的 UTC 时间，超出 chrono 可表示范围时为 None
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

impl fmt::Display for SampledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datetime() {
            Some(dt) => write!(f, "{} {:?} ({:?})", dt.to_rfc3339(), self.value, self.quality),
            None => write!(f, "{} {:?} ({:?})", self.timestamp, self.value, self.quality),
        }
    }
}

/// 时间序列
///
/// 同一时间戳只保留一个采样，区间参数均为闭区间，
/// 用 `i64::MIN` / `i64::MAX` 表示无界。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    samples: BTreeMap<i64, SampledValue>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = SampledValue>) -> Self {
        let mut series = Self::new();
        series.add_values(values);
        series
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, timestamp: i64) -> Option<&SampledValue> {
        self.samples.get(&timestamp)
    }

    pub fn values(&self) -> impl Iterator<Item = &SampledValue> + '_ {
        self.samples.values()
    }

    /// 取 `[start, end]` 内的采样
    pub fn values_between(&self, start: i64, end: i64) -> Vec<SampledValue> {
        if start > end {
            return Vec::new();
        }
        self.samples.range(start..=end).map(|(_, v)| v.clone()).collect()
    }

    /// 截取 `[start, end]` 为新序列
    pub fn slice(&self, start: i64, end: i64) -> TimeSeries {
        Self::from_values(self.values_between(start, end))
    }

    /// 合并采样，同时间戳覆盖
    pub fn add_values(&mut self, values: impl IntoIterator<Item = SampledValue>) {
        for v in values {
            self.samples.insert(v.timestamp, v);
        }
    }

    /// 清空 `[start, end]` 后写入给定采样（区间外的采样被忽略）
    pub fn replace_values(&mut self, start: i64, end: i64, values: impl IntoIterator<Item = SampledValue>) {
        if start > end {
            return;
        }
        let doomed: Vec<i64> = self.samples.range(start..=end).map(|(t, _)| *t).collect();
        for t in doomed {
            self.samples.remove(&t);
        }
        self.add_values(
            values
                .into_iter()
                .filter(|v| v.timestamp >= start && v.timestamp <= end),
        );
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.samples.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.samples.keys().next_back().copied()
    }
}
