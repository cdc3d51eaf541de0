//! 进程级日志安装入口。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装过程可能出现的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `install` 被重复调用。
    #[error("flare telemetry is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 失败的底层错误。
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 零配置安装入口：注册 `fmt` 输出层与 `EnvFilter`。
///
/// # 教案式说明
/// - **意图（Why）**：宿主进程（CLI、集成测试、节点服务）只需调用一次即可得到结构化日志，
///   集群刷新、节点加入/剔除与扇出失败的事件随即可见。
/// - **逻辑（How）**：
///   1. 拒绝重复安装或外部已设置的 Subscriber；
///   2. 过滤规则优先取 `RUST_LOG`，缺省为 `info`；
///   3. 组装 `registry + EnvFilter + fmt` 并设为全局默认。
/// - **契约（What）**：多次调用返回 [`TelemetryError::AlreadyInstalled`]；
///   调用前若外部已配置 Subscriber，返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn install() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
