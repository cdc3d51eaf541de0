//! 标签值建议的请求与合并模型。
//!
//! 请求会扇出到所有匹配的节点，每个节点返回局部建议，最终由 [`TagValuesSuggest::reduce`] 合并。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{aggregate::NodeFailure, cluster::TagFilter};

/// 非法时间范围。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid range: start {start} is after end {end}")]
pub struct InvalidRange {
    pub start: u64,
    pub end: u64,
}

/// 闭开区间 `[start, end)`，单位为 Unix 毫秒。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DateRange {
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct RawRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawRange> for DateRange {
    type Error = InvalidRange;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: u64, end: u64) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// 覆盖全部时间。
    pub fn unbounded() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// 标签值建议请求。
///
/// # 契约说明（What）
/// - `filter`：只统计满足谓词的序列。
/// - `range`：只统计在区间内有写入的序列。
/// - `limit`：最多返回多少个键；`None` 表示不限制。
/// - `group_limit`：每个键最多返回多少个值；`None` 表示不限制。
/// - `exclude`：不参与建议的标签键。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValuesSuggestRequest {
    #[serde(default)]
    pub filter: TagFilter,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub group_limit: Option<usize>,
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl TagValuesSuggestRequest {
    pub fn new(filter: TagFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_group_limit(mut self, group_limit: usize) -> Self {
        self.group_limit = Some(group_limit);
        self
    }

    pub fn excluding(mut self, key: impl Into<String>) -> Self {
        self.exclude.insert(key.into());
        self
    }
}

/// 单个键的候选值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub key: String,
    pub values: BTreeSet<String>,
    /// 值列表是否被 `group_limit` 截断。
    #[serde(default)]
    pub limited: bool,
}

/// 节点级失败的可序列化摘要。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestError {
    pub node: String,
    pub code: String,
    pub message: String,
}

impl From<&NodeFailure> for SuggestError {
    fn from(failure: &NodeFailure) -> Self {
        Self {
            node: failure.node.to_string(),
            code: failure.error.code().to_owned(),
            message: failure.error.message().to_owned(),
        }
    }
}

/// 标签值建议结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValuesSuggest {
    pub suggestions: Vec<Suggestion>,
    /// 键列表是否被 `limit` 截断，或任一局部结果已被截断。
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub errors: Vec<SuggestError>,
}

impl TagValuesSuggest {
    /// 合并多个局部结果。
    ///
    /// 同一键的值取并集；按值数量降序、键升序排序；随后依次应用 `group_limit` 与 `limit`。
    pub fn reduce(
        results: impl IntoIterator<Item = TagValuesSuggest>,
        limit: Option<usize>,
        group_limit: Option<usize>,
    ) -> TagValuesSuggest {
        let mut merged: BTreeMap<String, (BTreeSet<String>, bool)> = BTreeMap::new();
        let mut limited = false;
        let mut errors = Vec::new();

        for result in results {
            limited |= result.limited;
            errors.extend(result.errors);
            for suggestion in result.suggestions {
                let (values, key_limited) = merged.entry(suggestion.key).or_default();
                values.extend(suggestion.values);
                *key_limited |= suggestion.limited;
            }
        }

        let mut suggestions: Vec<Suggestion> = merged
            .into_iter()
            .map(|(key, (values, limited))| Suggestion {
                key,
                values,
                limited,
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.values
                .len()
                .cmp(&a.values.len())
                .then_with(|| a.key.cmp(&b.key))
        });

        if let Some(group_limit) = group_limit {
            for suggestion in &mut suggestions {
                if suggestion.values.len() > group_limit {
                    suggestion.values = suggestion.values.iter().take(group_limit).cloned().collect();
                    suggestion.limited = true;
                }
            }
        }

        if let Some(limit) = limit
            && suggestions.len() > limit
        {
            suggestions.truncate(limit);
            limited = true;
        }

        TagValuesSuggest {
            suggestions,
            limited,
            errors,
        }
    }
}
