//! 托管资源：惰性构造、共享实例、显式拆除。
//!
//! 用于守护昂贵的后端连接。调用方只需 `get()`，并发调用者共享同一次构造；
//! 构造失败不会缓存，下一次 `get()` 重新尝试；`close()` 会等待进行中的构造并拆除其结果。

use std::{
    fmt,
    future::Future,
    mem,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{self, Shared},
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    BoxFuture, Result,
    error::{CoreError, ErrorKind, codes},
};

/// 资源的构造与拆除逻辑。
///
/// # 契约说明（What）
/// - `construct`：异步构造一个新实例；失败会以 [`ErrorKind::Construction`] 交付给所有共享该次构造的调用方。
/// - `destruct`：异步拆除一个实例；失败以 [`codes::RESOURCE_DESTRUCT`] 记录日志，不会传播给 `close()` 的调用方。
/// - 不透明的后端参数由实现自行持有，本层原样透传。
pub trait ResourceSetup<T>: Send + Sync + 'static {
    fn construct(&self) -> BoxFuture<'static, Result<T>>;

    fn destruct(&self, value: Arc<T>) -> BoxFuture<'static, Result<()>>;
}

/// 对外可观测的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Idle,
    Constructing,
    Ready,
    Closed,
}

type SharedConstruct<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;
type SharedTeardown = Shared<BoxFuture<'static, ()>>;

enum Slot<T> {
    Idle,
    Constructing {
        generation: u64,
        attempt: SharedConstruct<T>,
    },
    Ready(Arc<T>),
    Closed(SharedTeardown),
}

struct Inner<T> {
    setup: Arc<dyn ResourceSetup<T>>,
    slot: Mutex<Slot<T>>,
    generation: AtomicU64,
}

impl<T> Inner<T> {
    /// 构造结束后回写状态；只有仍属于同一代的构造才允许落地。
    fn settle(&self, generation: u64, result: &Result<Arc<T>>) {
        let mut slot = self.slot.lock();
        let current = matches!(
            &*slot,
            Slot::Constructing { generation: g, .. } if *g == generation
        );
        if !current {
            return;
        }
        *slot = match result {
            Ok(value) => Slot::Ready(Arc::clone(value)),
            Err(_) => Slot::Idle,
        };
    }
}

/// 惰性构造、全体共享、可显式拆除的资源句柄。
///
/// # 设计背景（Why）
/// - 后端连接创建昂贵，且同一进程内的所有调用方应复用同一实例。
/// - 关闭流程必须与进行中的构造协调，避免构造出的实例在关闭后泄漏。
///
/// # 逻辑解析（How）
/// - 单把互斥锁守护状态槽 `Idle | Constructing | Ready | Closed`，锁只在同步区间内持有，从不跨越 `await`。
/// - 进行中的构造以 [`Shared`] Future 保存，后来者直接克隆加入；构造完成时按代号回写状态槽。
/// - 拆除同样以 [`Shared`] Future 保存，并发的 `close()` 调用共享同一次拆除。
///
/// # 契约说明（What）
/// - 任意时刻至多一次构造在进行中。
/// - `close()` 开始后，新的 `get()` 返回 [`ErrorKind::Closed`]；关闭是终态。
/// - 构造本身没有超时，调用方如有需要自行约束。
///
/// # 风险提示（Trade-offs）
/// - 构造与拆除 Future 均为惰性，至少需要一个调用方驱动它们完成。
pub struct ManagedResource<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ManagedResource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ManagedResource<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedResource")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ManagedResource<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(setup: Arc<dyn ResourceSetup<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                setup,
                slot: Mutex::new(Slot::Idle),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// 以一对异步闭包描述构造与拆除。
    pub fn from_fns<C, CF, D, DF>(construct: C, destruct: D) -> Self
    where
        C: Fn() -> CF + Send + Sync + 'static,
        CF: Future<Output = Result<T>> + Send + 'static,
        D: Fn(Arc<T>) -> DF + Send + Sync + 'static,
        DF: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(Arc::new(FnSetup {
            construct,
            destruct,
        }))
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> ResourceState {
        match &*self.inner.slot.lock() {
            Slot::Idle => ResourceState::Idle,
            Slot::Constructing { .. } => ResourceState::Constructing,
            Slot::Ready(_) => ResourceState::Ready,
            Slot::Closed(_) => ResourceState::Closed,
        }
    }

    /// 获取共享实例，必要时启动构造。
    pub fn get(&self) -> BoxFuture<'static, Result<Arc<T>>> {
        let mut slot = self.inner.slot.lock();
        match &*slot {
            Slot::Ready(value) => return future::ready(Ok(Arc::clone(value))).boxed(),
            Slot::Constructing { attempt, .. } => return attempt.clone().boxed(),
            Slot::Closed(_) => {
                return future::ready(Err(CoreError::closed("managed resource is closed"))).boxed();
            }
            Slot::Idle => {}
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(generation, "constructing managed resource");

        let construct = self.inner.setup.construct();
        let owner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let attempt = async move {
            let result = construct.await.map(Arc::new).map_err(construction_failed);
            if let Err(err) = &result {
                warn!(generation, error = %err, "managed resource construction failed");
            }
            if let Some(owner) = owner.upgrade() {
                owner.settle(generation, &result);
            }
            result
        }
        .boxed()
        .shared();

        *slot = Slot::Constructing {
            generation,
            attempt: attempt.clone(),
        };
        drop(slot);
        attempt.boxed()
    }

    /// 关闭资源；等待进行中的构造并拆除成功构造出的实例。
    pub fn close(&self) -> BoxFuture<'static, ()> {
        let mut slot = self.inner.slot.lock();
        if let Slot::Closed(teardown) = &*slot {
            return teardown.clone().boxed();
        }

        let previous = mem::replace(&mut *slot, Slot::Idle);
        let setup = Arc::clone(&self.inner.setup);
        let teardown = async move {
            let value = match previous {
                Slot::Ready(value) => Some(value),
                // 构造失败无需拆除。
                Slot::Constructing { attempt, .. } => attempt.await.ok(),
                Slot::Idle | Slot::Closed(_) => None,
            };
            if let Some(value) = value {
                debug!("tearing down managed resource");
                if let Err(err) = setup.destruct(value).await {
                    let err = teardown_failed(err);
                    warn!(code = err.code(), error = %err, "managed resource teardown failed");
                }
            }
        }
        .boxed()
        .shared();

        *slot = Slot::Closed(teardown.clone());
        drop(slot);
        teardown.boxed()
    }
}

fn construction_failed(err: CoreError) -> CoreError {
    CoreError::new(
        ErrorKind::Construction,
        codes::RESOURCE_CONSTRUCT,
        format!("managed resource construction failed: {}", err.message()),
    )
    .with_cause(err)
}

fn teardown_failed(err: CoreError) -> CoreError {
    CoreError::new(
        ErrorKind::Internal,
        codes::RESOURCE_DESTRUCT,
        format!("managed resource teardown failed: {}", err.message()),
    )
    .with_cause(err)
}

struct FnSetup<C, D> {
    construct: C,
    destruct: D,
}

impl<T, C, CF, D, DF> ResourceSetup<T> for FnSetup<C, D>
where
    T: Send + Sync + 'static,
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = Result<T>> + Send + 'static,
    D: Fn(Arc<T>) -> DF + Send + Sync + 'static,
    DF: Future<Output = Result<()>> + Send + 'static,
{
    fn construct(&self) -> BoxFuture<'static, Result<T>> {
        (self.construct)().boxed()
    }

    fn destruct(&self, value: Arc<T>) -> BoxFuture<'static, Result<()>> {
        (self.destruct)(value).boxed()
    }
}
