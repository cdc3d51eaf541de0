use std::{io, time::Duration};

use socket2::SockRef;
use tokio::net::TcpStream;

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 意图（Why）
/// - RPC 帧通常很小，Nagle 算法会把请求延迟到下一个 ACK，因此默认开启 `TCP_NODELAY`；
/// - 将“关闭时等待多久再以 RST 释放资源”显式配置化，避免调用方直接操作 `socket2`。
///
/// # 核心逻辑（How）
/// - `nodelay` 通过 Tokio 设置；`linger` 通过 `socket2::SockRef::set_linger` 设置 `SO_LINGER`；
/// - `linger = None` 表示遵循内核默认策略。
///
/// # 契约说明（What）
/// - 客户端建连与服务端接受连接后都会调用 [`TcpSocketConfig::apply`]；
/// - **后置条件**：`apply` 返回 `Ok(())` 时所有选项均已落地。
///
/// # 注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；设置过小可能丢弃发送缓冲区中的数据。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    /// 默认配置：开启 `TCP_NODELAY`，`SO_LINGER` 使用内核默认值。
    pub const fn new() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}
