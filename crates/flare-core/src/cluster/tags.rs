use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 节点标签，键唯一。
///
/// # BTreeMap 取舍说明
/// - 标签集合会出现在握手响应、日志与配置中，使用 [`BTreeMap`] 保证序列化与迭代顺序稳定，便于对比。
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以构建者风格追加标签，重复键覆盖旧值。
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self(value)
    }
}

/// 针对标签集合的分片谓词。
///
/// # 契约说明（What）
/// - 纯函数：[`TagFilter::matches`] 只读取标签，不产生副作用。
/// - 可序列化，既能写入配置，也能作为 RPC 请求的一部分发往对端。
/// - `And(vec![])` 恒为真，`Or(vec![])` 恒为假。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TagFilter {
    /// 匹配任意节点。
    #[default]
    All,
    /// 标签 `key` 存在且等于 `value`。
    Equals { key: String, value: String },
    /// 标签 `key` 存在。
    HasKey { key: String },
    Not { filter: Box<TagFilter> },
    And { filters: Vec<TagFilter> },
    Or { filters: Vec<TagFilter> },
}

impl TagFilter {
    pub fn all() -> Self {
        TagFilter::All
    }

    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        TagFilter::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn has_key(key: impl Into<String>) -> Self {
        TagFilter::HasKey { key: key.into() }
    }

    pub fn negate(self) -> Self {
        TagFilter::Not {
            filter: Box::new(self),
        }
    }

    pub fn and(self, other: TagFilter) -> Self {
        match self {
            TagFilter::And { mut filters } => {
                filters.push(other);
                TagFilter::And { filters }
            }
            this => TagFilter::And {
                filters: vec![this, other],
            },
        }
    }

    pub fn or(self, other: TagFilter) -> Self {
        match self {
            TagFilter::Or { mut filters } => {
                filters.push(other);
                TagFilter::Or { filters }
            }
            this => TagFilter::Or {
                filters: vec![this, other],
            },
        }
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Equals { key, value } => tags.get(key) == Some(value.as_str()),
            TagFilter::HasKey { key } => tags.contains_key(key),
            TagFilter::Not { filter } => !filter.matches(tags),
            TagFilter::And { filters } => filters.iter().all(|f| f.matches(tags)),
            TagFilter::Or { filters } => filters.iter().any(|f| f.matches(tags)),
        }
    }
}
