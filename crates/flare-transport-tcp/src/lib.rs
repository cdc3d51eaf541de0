#![deny(unsafe_code)]
#![doc = r#"
# flare-transport-tcp

## 模块使命（Why）
- 为集群节点之间的 RPC 提供真实网络传输，与内存传输共享同一 `flare_core::Transport` 契约，集群层无需感知差异。

## 核心契约（What）
- [`TcpTransport`]：连接 `tcp://host:port`，产出串行化交换的 [`TcpChannel`]。
- [`TcpRpcServer`]：在监听地址上以 `RpcHandler` 响应请求。
- [`codec`]：`u32` 大端长度前缀帧，单帧上限 [`codec::MAX_FRAME_LEN`]。
- [`TcpSocketConfig`]：`TCP_NODELAY` 与 `SO_LINGER`。

## 实现策略（How）
- 一条通道对应一条连接，请求/响应一问一答；被中断的交换丢弃连接，下一次发送自动重连。
- IO 错误统一映射为带稳定错误码的 `CoreError`，并归入连通性、超时、协议或内部故障分类。
"#]

mod channel;
pub mod codec;
mod error;
mod server;
mod socket;

pub use channel::{SCHEME, TcpChannel, TcpTransport};
pub use server::TcpRpcServer;
pub use socket::TcpSocketConfig;
