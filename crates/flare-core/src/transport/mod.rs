//! 传输与协议契约。
//!
//! 集群层只通过 [`Transport`] 与 [`Channel`] 访问远端节点，具体实现（内存、TCP）由独立 crate 提供，
//! 并在装配阶段通过 [`TransportRegistry`] 按 scheme 注入。

mod endpoint;
mod message;
mod registry;
mod traits;

pub use endpoint::Endpoint;
pub use message::{Request, Response};
pub use registry::TransportRegistry;
pub use traits::{Channel, RpcHandler, Transport};
