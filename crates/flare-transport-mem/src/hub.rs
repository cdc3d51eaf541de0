use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use flare_core::{CoreError, ErrorKind, RpcHandler};
use tracing::debug;

const NAME_TAKEN: &str = "transport.mem.name_taken";

/// 针对某个逻辑名注入的确定性故障。
///
/// # 契约说明（What）
/// - `Refuse`：建连与发送均返回 [`ErrorKind::Connectivity`]。
/// - `Unresponsive`：发送永不完成，调用方只能依靠自身超时。
/// - `Garble`：返回无法解码的响应负载，解码时得到 [`ErrorKind::Protocol`]。
/// - `Fail`：发送直接返回给定错误。
#[derive(Clone, Debug)]
pub enum Fault {
    Refuse,
    Unresponsive,
    Garble,
    Fail(CoreError),
}

/// 查找结果：一次发送应当如何处理。
pub(crate) enum Route {
    Unbound,
    Handler(Arc<dyn RpcHandler>),
    Fault(Fault),
}

/// 进程内 RPC 上下文：把逻辑名绑定到处理器。
///
/// # 设计背景（Why）
/// - 多节点测试需要在同一进程内模拟若干节点，并且能确定性地制造拒绝、无响应、乱码等故障。
///
/// # 逻辑解析（How）
/// - 绑定表与故障表是两张独立的 `DashMap`：故障可以先于绑定注入，也可以在解绑后保留。
/// - 每次发送时重新查表，解绑或注入故障对已建立的通道立即生效。
///
/// # 契约说明（What）
/// - `MemoryHub` 可廉价克隆，所有克隆共享同一张表。
/// - 同一逻辑名同时只能绑定一个处理器。
#[derive(Clone, Default)]
pub struct MemoryHub {
    bindings: Arc<DashMap<String, Arc<dyn RpcHandler>>>,
    faults: Arc<DashMap<String, Fault>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定处理器；逻辑名已被占用时返回错误。
    pub fn bind(&self, name: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Result<(), CoreError> {
        match self.bindings.entry(name.into()) {
            Entry::Occupied(occupied) => Err(CoreError::new(
                ErrorKind::Internal,
                NAME_TAKEN,
                format!("memory name `{}` is already bound", occupied.key()),
            )),
            Entry::Vacant(vacant) => {
                debug!(name = %vacant.key(), "memory node bound");
                vacant.insert(handler);
                Ok(())
            }
        }
    }

    /// 解除绑定；返回此前是否存在绑定。
    pub fn unbind(&self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// 当前已绑定的逻辑名，按字典序排列。
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn inject_fault(&self, name: impl Into<String>, fault: Fault) {
        let name = name.into();
        debug!(name = %name, ?fault, "memory fault injected");
        self.faults.insert(name, fault);
    }

    pub fn clear_fault(&self, name: &str) -> Option<Fault> {
        self.faults.remove(name).map(|(_, fault)| fault)
    }

    pub(crate) fn fault(&self, name: &str) -> Option<Fault> {
        self.faults.get(name).map(|fault| fault.value().clone())
    }

    pub(crate) fn route(&self, name: &str) -> Route {
        if let Some(fault) = self.fault(name) {
            return Route::Fault(fault);
        }
        match self.bindings.get(name) {
            Some(handler) => Route::Handler(Arc::clone(handler.value())),
            None => Route::Unbound,
        }
    }
}

impl fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHub")
            .field("names", &self.names())
            .field("faults", &self.faults.len())
            .finish()
    }
}
