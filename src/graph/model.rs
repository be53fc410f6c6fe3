use crate::values::ValueKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// 路径解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("resource path is empty")]
    Empty,
    #[error("invalid segment '{segment}' in resource path '{path}'")]
    InvalidSegment { path: String, segment: String },
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("segment pattern is valid"))
}

/// 资源路径
///
/// 以点分隔的层级名称，例如 `building.room1.temperature`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in path.split('.') {
            if !segment_pattern().is_match(segment) {
                return Err(PathError::InvalidSegment {
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split('.')
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// 最后一段名称
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// 父路径，顶层资源返回 None
    pub fn parent(&self) -> Option<ResourcePath> {
        self.0.rfind('.').map(|idx| Self(self.0[..idx].to_string()))
    }

    pub fn child(&self, name: &str) -> Result<ResourcePath, PathError> {
        Self::parse(&format!("{}.{}", self.0, name))
    }

    /// 拼接一个已知合法的名称（取自另一个合法路径）
    pub(crate) fn with_name(&self, name: &str) -> ResourcePath {
        Self(format!("{}.{}", self.0, name))
    }

    /// 按段比较的祖先关系（包含自身）
    pub fn is_ancestor_of(&self, other: &ResourcePath) -> bool {
        other.0 == self.0 || (other.0.starts_with(&self.0) && other.0[self.0.len()..].starts_with('.'))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

/// 资源类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Boolean,
    Float,
    Integer,
    String,
    Time,
    /// 旧版 opaque 资源也归入字节数组
    ByteArray,
    BooleanArray,
    FloatArray,
    IntegerArray,
    StringArray,
    TimeArray,
    Schedule,
    /// 复合资源，只有子资源没有值
    Complex(String),
    /// 未识别的简单类型
    OtherSimple(String),
    /// 未识别的数组类型
    OtherArray(String),
}

impl ResourceType {
    pub fn complex(model: &str) -> Self {
        ResourceType::Complex(model.to_string())
    }

    /// 可携带值的资源对应的值类型
    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            ResourceType::Boolean => Some(ValueKind::Boolean),
            ResourceType::Float => Some(ValueKind::Float),
            ResourceType::Integer => Some(ValueKind::Integer),
            ResourceType::String => Some(ValueKind::String),
            ResourceType::Time => Some(ValueKind::Time),
            ResourceType::ByteArray => Some(ValueKind::ByteArray),
            ResourceType::BooleanArray => Some(ValueKind::BooleanArray),
            ResourceType::FloatArray => Some(ValueKind::FloatArray),
            ResourceType::IntegerArray => Some(ValueKind::IntegerArray),
            ResourceType::StringArray => Some(ValueKind::StringArray),
            ResourceType::TimeArray => Some(ValueKind::TimeArray),
            ResourceType::Schedule => Some(ValueKind::Schedule),
            ResourceType::Complex(_) | ResourceType::OtherSimple(_) | ResourceType::OtherArray(_) => None,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, ResourceType::Complex(_))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Complex(name) => write!(f, "Complex({})", name),
            ResourceType::OtherSimple(name) => write!(f, "Simple({})", name),
            ResourceType::OtherArray(name) => write!(f, "Array({})", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// 应用持有的资源句柄
///
/// 可以指向尚不存在的虚拟资源，存在性总是通过资源图重新确认
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub path: ResourcePath,
    pub resource_type: ResourceType,
}

impl ResourceRef {
    pub fn new(path: &str, resource_type: ResourceType) -> Result<Self, PathError> {
        Ok(Self {
            path: ResourcePath::parse(path)?,
            resource_type,
        })
    }

    pub fn from_path(path: ResourcePath, resource_type: ResourceType) -> Self {
        Self { path, resource_type }
    }

    pub fn child(&self, name: &str, resource_type: ResourceType) -> Result<Self, PathError> {
        Ok(Self {
            path: self.path.child(name)?,
            resource_type,
        })
    }

    /// 路径相等（同一地址）
    pub fn equals_path(&self, other: &ResourceRef) -> bool {
        self.path == other.path
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.path, self.resource_type)
    }
}

/// 访问模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Shared,
    Exclusive,
    ReadOnly,
}

/// 访问优先级，越靠前优先级越高
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessPriority {
    Highest,
    DeviceSpecific,
    DeviceGroupMax,
    DomainSpecific,
    GenericMax,
    Lowest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse_and_navigation() {
        let path = ResourcePath::parse("building.room1.temperature").unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.name(), "temperature");
        assert_eq!(path.parent().unwrap().as_str(), "building.room1");
        assert!(ResourcePath::parse("building").unwrap().parent().is_none());
    }

    #[test]
    fn test_path_rejects_bad_segments() {
        assert_eq!(ResourcePath::parse(""), Err(PathError::Empty));
        assert!(ResourcePath::parse("a..b").is_err());
        assert!(ResourcePath::parse("a.1b").is_err());
        assert!(ResourcePath::parse("a.b-c").is_err());
    }

    #[test]
    fn test_is_ancestor_of_respects_segments() {
        let a = ResourcePath::parse("room").unwrap();
        let b = ResourcePath::parse("room.temp").unwrap();
        let c = ResourcePath::parse("roomx.temp").unwrap();
        assert!(a.is_ancestor_of(&b));
        assert!(a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&c));
    }

    #[test]
    fn test_path_serde_validates() {
        let ok: ResourcePath = serde_json::from_str("\"a.b\"").unwrap();
        assert_eq!(ok.as_str(), "a.b");
        assert!(serde_json::from_str::<ResourcePath>("\"a..b\"").is_err());
    }

    #[test]
    fn test_value_kind_of_types() {
        assert_eq!(ResourceType::Time.value_kind(), Some(ValueKind::Time));
        assert_eq!(ResourceType::complex("Room").value_kind(), None);
        assert_eq!(ResourceType::OtherSimple("Colour".into()).value_kind(), None);
    }
}
