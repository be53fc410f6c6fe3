use serde::{Deserialize, Serialize};
use std::fmt;

use super::sampled::TimeSeries;

/// 资源值
///
/// 所有可携带值的资源类型共用的标签联合体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Float(f32),
    Integer(i32),
    String(String),
    Time(i64),
    ByteArray(Vec<u8>),
    BooleanArray(Vec<bool>),
    FloatArray(Vec<f32>),
    IntegerArray(Vec<i32>),
    StringArray(Vec<String>),
    TimeArray(Vec<i64>),
    Schedule(TimeSeries),
}

/// 值类型判别符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Boolean,
    Float,
    Integer,
    String,
    Time,
    ByteArray,
    BooleanArray,
    FloatArray,
    IntegerArray,
    StringArray,
    TimeArray,
    Schedule,
}

impl ValueKind {
    /// 是否为简单标量类型（可作为 schedule 的父资源类型）
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ValueKind::Boolean | ValueKind::Float | ValueKind::Integer | ValueKind::String | ValueKind::Time
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ValueKind::ByteArray
                | ValueKind::BooleanArray
                | ValueKind::FloatArray
                | ValueKind::IntegerArray
                | ValueKind::StringArray
                | ValueKind::TimeArray
        )
    }

    /// 新建资源时的初始值
    pub fn default_value(&self) -> Value {
        match self {
            ValueKind::Boolean => Value::Boolean(false),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::String => Value::String(String::new()),
            ValueKind::Time => Value::Time(0),
            ValueKind::ByteArray => Value::ByteArray(Vec::new()),
            ValueKind::BooleanArray => Value::BooleanArray(Vec::new()),
            ValueKind::FloatArray => Value::FloatArray(Vec::new()),
            ValueKind::IntegerArray => Value::IntegerArray(Vec::new()),
            ValueKind::StringArray => Value::StringArray(Vec::new()),
            ValueKind::TimeArray => Value::TimeArray(Vec::new()),
            ValueKind::Schedule => Value::Schedule(TimeSeries::new()),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Float(_) => ValueKind::Float,
            Value::Integer(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::Time(_) => ValueKind::Time,
            Value::ByteArray(_) => ValueKind::ByteArray,
            Value::BooleanArray(_) => ValueKind::BooleanArray,
            Value::FloatArray(_) => ValueKind::FloatArray,
            Value::IntegerArray(_) => ValueKind::IntegerArray,
            Value::StringArray(_) => ValueKind::StringArray,
            Value::TimeArray(_) => ValueKind::TimeArray,
            Value::Schedule(_) => ValueKind::Schedule,
        }
    }
}

/// 可以存入资源的 Rust 类型
///
/// 两个事务引擎的泛型读写接口都基于这个 trait，
/// 由 `KIND` 在访问时与资源的桶类型比对。
pub trait ResourceValue: Sized + Clone {
    const KIND: ValueKind;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_resource_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ResourceValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_resource_value! {
    bool => Boolean,
    f32 => Float,
    i32 => Integer,
    String => String,
    i64 => Time,
    Vec<u8> => ByteArray,
    Vec<bool> => BooleanArray,
    Vec<f32> => FloatArray,
    Vec<i32> => IntegerArray,
    Vec<String> => StringArray,
    Vec<i64> => TimeArray,
    TimeSeries => Schedule,
}
