#![deny(unsafe_code)]
#![doc = r#"
# flare-transport-mem

## 模块使命（Why）
- **确定性多节点测试**：在单个进程内以逻辑名 `mem://<name>` 模拟若干节点，集群管理器无需任何网络即可完成发现、握手与扇出。
- **故障注入**：按逻辑名注入拒绝、无响应、乱码或指定错误，复现真实集群中的部分失败。

## 核心契约（What）
- [`MemoryHub`] 是进程内 RPC 上下文，负责绑定处理器与登记故障。
- [`MemoryTransport`] 实现 `flare_core::Transport`，只接受 `mem` scheme。
- 通道不缓存处理器：解绑与故障注入对已建立的通道立即生效。

## 实现策略（How）
- 请求直接交给绑定的 `RpcHandler`，不经过序列化；乱码故障返回一段无法解码的固定字节。
"#]

mod hub;
mod transport;

pub use hub::{Fault, MemoryHub};
pub use transport::{MemoryChannel, MemoryTransport, SCHEME};
