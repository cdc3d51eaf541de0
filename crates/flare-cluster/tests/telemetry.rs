//! 全局 Subscriber 只能安装一次；独立测试二进制，避免与其他测试争用全局状态。

use flare_cluster::telemetry::{TelemetryError, install};

#[test]
fn install_is_one_shot() {
    install().expect("first install succeeds");
    assert!(matches!(install(), Err(TelemetryError::AlreadyInstalled)));
    tracing::info!(target: "flare_cluster", "telemetry installed");
}
