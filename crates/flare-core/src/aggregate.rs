//! 扇出结果聚合策略。
//!
//! 所有策略都是作用于 [`FanOutResult`] 的纯函数，从不假设节点全部成功。
//! 策略由 `fan_out` 的调用方选择。

use std::fmt;

use thiserror::Error;

use crate::{cluster::NodeIdentity, error::CoreError};

/// 单个节点的执行结果。
#[derive(Clone, Debug)]
pub struct NodeOutcome<T> {
    pub node: NodeIdentity,
    pub result: Result<T, CoreError>,
}

/// 失败节点及其错误。
#[derive(Clone, Debug)]
pub struct NodeFailure {
    pub node: NodeIdentity,
    pub error: CoreError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// 一次扇出的逐节点结果，按快照中的端点顺序排列。
#[derive(Clone, Debug)]
pub struct FanOutResult<T> {
    outcomes: Vec<NodeOutcome<T>>,
}

impl<T> Default for FanOutResult<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> FanOutResult<T> {
    pub fn new(outcomes: Vec<NodeOutcome<T>>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[NodeOutcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<NodeOutcome<T>> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 按节点查找结果。
    pub fn get(&self, node: &NodeIdentity) -> Option<&Result<T, CoreError>> {
        self.outcomes
            .iter()
            .find(|outcome| &outcome.node == node)
            .map(|outcome| &outcome.result)
    }

    pub fn successes(&self) -> impl Iterator<Item = (&NodeIdentity, &T)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.result {
            Ok(value) => Some((&outcome.node, value)),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&NodeIdentity, &CoreError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.result {
            Ok(_) => None,
            Err(err) => Some((&outcome.node, err)),
        })
    }

    /// 拆分为成功值与失败列表，保持原有顺序。
    pub fn partition(self) -> (Vec<(NodeIdentity, T)>, Vec<NodeFailure>) {
        let mut values = Vec::new();
        let mut failures = Vec::new();
        for NodeOutcome { node, result } in self.outcomes {
            match result {
                Ok(value) => values.push((node, value)),
                Err(error) => failures.push(NodeFailure { node, error }),
            }
        }
        (values, failures)
    }
}

/// 聚合失败。
#[derive(Debug, Error)]
pub enum AggregateError {
    /// 没有任何节点满足谓词，而策略要求至少一个。
    #[error("no nodes matched the request")]
    NoNodes,
    /// 有节点失败，而策略要求全部成功或至少一个成功。
    #[error("{} of {total} nodes failed", .failures.len())]
    NodeFailures {
        total: usize,
        failures: Vec<NodeFailure>,
    },
}

/// 聚合策略契约。
pub trait Aggregator<T> {
    type Output;

    fn aggregate(self, result: FanOutResult<T>) -> Self::Output;
}

/// 要求所有节点成功，并把成功值折叠为一个结果。
///
/// 默认零节点返回初值；调用 [`AllSucceed::require_nodes`] 后零节点返回 [`AggregateError::NoNodes`]。
pub struct AllSucceed<A, F> {
    init: A,
    fold: F,
    require_nodes: bool,
}

impl<A, F> AllSucceed<A, F> {
    pub fn new(init: A, fold: F) -> Self {
        Self {
            init,
            fold,
            require_nodes: false,
        }
    }

    pub fn require_nodes(mut self) -> Self {
        self.require_nodes = true;
        self
    }
}

impl<T> AllSucceed<Vec<T>, fn(Vec<T>, T) -> Vec<T>> {
    /// 把所有成功值按节点顺序收集为列表。
    pub fn collect() -> Self {
        fn push<T>(mut acc: Vec<T>, value: T) -> Vec<T> {
            acc.push(value);
            acc
        }
        Self::new(Vec::new(), push::<T>)
    }
}

impl<T, A, F> Aggregator<T> for AllSucceed<A, F>
where
    F: FnMut(A, T) -> A,
{
    type Output = Result<A, AggregateError>;

    fn aggregate(mut self, result: FanOutResult<T>) -> Self::Output {
        if result.is_empty() && self.require_nodes {
            return Err(AggregateError::NoNodes);
        }
        let total = result.len();
        let (values, failures) = result.partition();
        if !failures.is_empty() {
            return Err(AggregateError::NodeFailures { total, failures });
        }
        Ok(values
            .into_iter()
            .fold(self.init, |acc, (_, value)| (self.fold)(acc, value)))
    }
}

/// 尽力而为聚合的结果：成功值的折叠与失败列表并存。
#[derive(Clone, Debug)]
pub struct Partial<A> {
    pub value: A,
    pub failures: Vec<NodeFailure>,
    pub total: usize,
}

impl<A> Partial<A> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failures.len()
    }
}

/// 折叠所有成功值，同时保留失败列表，永不整体失败。
pub struct BestEffort<A, F> {
    init: A,
    fold: F,
}

impl<A, F> BestEffort<A, F> {
    pub fn new(init: A, fold: F) -> Self {
        Self { init, fold }
    }
}

impl<T> BestEffort<Vec<T>, fn(Vec<T>, T) -> Vec<T>> {
    pub fn collect() -> Self {
        fn push<T>(mut acc: Vec<T>, value: T) -> Vec<T> {
            acc.push(value);
            acc
        }
        Self::new(Vec::new(), push::<T>)
    }
}

impl<T, A, F> Aggregator<T> for BestEffort<A, F>
where
    F: FnMut(A, T) -> A,
{
    type Output = Partial<A>;

    fn aggregate(mut self, result: FanOutResult<T>) -> Self::Output {
        let total = result.len();
        let (values, failures) = result.partition();
        let value = values
            .into_iter()
            .fold(self.init, |acc, (_, value)| (self.fold)(acc, value));
        Partial {
            value,
            failures,
            total,
        }
    }
}

/// 返回快照顺序中的第一个成功值。
///
/// 零节点返回 `Ok(None)`；全部失败返回 [`AggregateError::NodeFailures`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstSuccess;

impl<T> Aggregator<T> for FirstSuccess {
    type Output = Result<Option<T>, AggregateError>;

    fn aggregate(self, result: FanOutResult<T>) -> Self::Output {
        let total = result.len();
        let mut failures = Vec::new();
        for NodeOutcome { node, result } in result.into_outcomes() {
            match result {
                Ok(value) => return Ok(Some(value)),
                Err(error) => failures.push(NodeFailure { node, error }),
            }
        }
        if failures.is_empty() {
            Ok(None)
        } else {
            Err(AggregateError::NodeFailures { total, failures })
        }
    }
}

/// 由调用方提供的任意合并函数。
pub struct FnAggregator<F>(F);

impl<T, O, F> Aggregator<T> for FnAggregator<F>
where
    F: FnOnce(FanOutResult<T>) -> O,
{
    type Output = O;

    fn aggregate(self, result: FanOutResult<T>) -> O {
        (self.0)(result)
    }
}

pub fn aggregate_fn<F>(f: F) -> FnAggregator<F> {
    FnAggregator(f)
}
