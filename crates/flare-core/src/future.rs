use core::{future::Future, pin::Pin};

/// `BoxFuture` 是 flare 各契约统一使用的对象安全 Future 包装。
///
/// # 设计背景（Why）
/// - 传输、发现、托管资源等 Trait 需要以 `dyn` 形式在运行期替换实现，
///   关联类型 Future 会破坏对象安全，因此统一装箱。
///
/// # 契约说明（What）
/// - 约束 Future 为 `Send + 'a`，可安全跨线程调度；
/// - 与 `futures::future::BoxFuture` 等价，便于直接使用 `FutureExt::boxed`。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
