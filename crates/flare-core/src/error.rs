use std::{borrow::Cow, error::Error, fmt, sync::Arc};

/// 可跨线程共享的底层错误原因。
///
/// 使用 `Arc` 而非 `Box`：同一次失败会经由共享 Future 交付给多个调用方，错误本身必须可克隆。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 错误分类，对应集群协调层的故障分类法。
///
/// # 契约说明（What）
/// - `Connectivity`：无法到达端点（拒绝连接、连接被重置、节点未绑定）。
/// - `Protocol`：响应格式错误或版本不兼容、未知方法、未知 scheme。
/// - `Timeout`：在时限内未得到响应。
/// - `Construction`：托管资源的工厂函数失败。
/// - `Discovery`：服务发现解析失败；本轮刷新失败，但保留上一次快照。
/// - `Closed`：组件已关闭（通道、托管资源）。
/// - `Internal`：对端处理器报告的其他失败。
///
/// 限流不是错误：限流结果只通过回调交付，永远不会以 `CoreError` 的形式出现。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connectivity,
    Protocol,
    Timeout,
    Construction,
    Discovery,
    Closed,
    Internal,
}

impl ErrorKind {
    /// 稳定的线上编码，供二进制协议传递错误分类。
    pub const fn as_u8(self) -> u8 {
        match self {
            ErrorKind::Connectivity => 1,
            ErrorKind::Protocol => 2,
            ErrorKind::Timeout => 3,
            ErrorKind::Construction => 4,
            ErrorKind::Discovery => 5,
            ErrorKind::Closed => 6,
            ErrorKind::Internal => 7,
        }
    }

    /// 解码线上编码；未知值返回 `None`。
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ErrorKind::Connectivity),
            2 => Some(ErrorKind::Protocol),
            3 => Some(ErrorKind::Timeout),
            4 => Some(ErrorKind::Construction),
            5 => Some(ErrorKind::Discovery),
            6 => Some(ErrorKind::Closed),
            7 => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Construction => "construction",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Closed => "closed",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// `CoreError` 是 flare 跨层共享的稳定错误域。
///
/// # 设计背景（Why）
/// - 传输、发现、托管资源在不同层次产生的故障需要合流为统一的分类与错误码，
///   以便聚合器、日志与告警系统执行精确的自动化治理。
/// - 单个节点的失败会被记录进扇出结果、经共享 Future 分发给多个等待者，因此错误必须 `Clone`。
///
/// # 逻辑解析（How）
/// - `kind` 决定处理策略；`code` 遵循 `<域>.<语义>` 约定，见 [`codes`]；
///   `message` 面向排障人员；`cause` 通过 [`Error::source`] 暴露完整链路。
///
/// # 契约说明（What）
/// - 构造函数返回拥有所有权的值，`Send + Sync + 'static`。
/// - `code` 允许来自线上（对端回传的错误），因此使用 `Cow` 保存。
///
/// # 设计取舍与风险（Trade-offs）
/// - 原因以 `Arc` 共享，克隆开销是一次引用计数递增。
#[derive(Clone, Debug)]
pub struct CoreError {
    kind: ErrorKind,
    code: Cow<'static, str>,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    pub fn new(
        kind: ErrorKind,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// 无法到达端点。
    pub fn connectivity(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Connectivity, codes::TRANSPORT_CONNECT, message)
    }

    /// 对端响应格式错误或协议不兼容。
    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Protocol, codes::PROTOCOL_DECODE, message)
    }

    /// 操作超时。
    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Timeout, codes::TRANSPORT_TIMEOUT, message)
    }

    /// 组件已关闭。
    pub fn closed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Closed, codes::COMPONENT_CLOSED, message)
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 错误分类。
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 稳定错误码。
    pub fn code(&self) -> &str {
        &self.code
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 是否为超时。
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 内置错误码常量集合，确保可观测性系统具有稳定识别符。
///
/// 错误码遵循 `<领域>.<语义>` 命名约定，方便在跨节点日志中检索与聚合。
pub mod codes {
    /// 建连失败。
    pub const TRANSPORT_CONNECT: &str = "transport.connect";
    /// 传输层超时。
    pub const TRANSPORT_TIMEOUT: &str = "transport.timeout";
    /// 端点 scheme 没有注册任何传输实现。
    pub const TRANSPORT_UNSUPPORTED_SCHEME: &str = "transport.unsupported_scheme";
    /// 端点字符串无法解析。
    pub const TRANSPORT_INVALID_ENDPOINT: &str = "transport.invalid_endpoint";
    /// 协议解码失败。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 协议编码失败。
    pub const PROTOCOL_ENCODE: &str = "protocol.encode";
    /// 对端不认识请求的方法。
    pub const PROTOCOL_UNKNOWN_METHOD: &str = "protocol.unknown_method";
    /// 帧超过允许的最大长度。
    pub const PROTOCOL_FRAME_TOO_LARGE: &str = "protocol.frame_too_large";
    /// 握手返回的协议版本不兼容。
    pub const CLUSTER_PROTOCOL_MISMATCH: &str = "cluster.protocol_mismatch";
    /// 服务发现解析失败。
    pub const DISCOVERY_RESOLVE: &str = "discovery.resolve";
    /// 托管资源构造失败。
    pub const RESOURCE_CONSTRUCT: &str = "resource.construct";
    /// 托管资源拆除失败。
    pub const RESOURCE_DESTRUCT: &str = "resource.destruct";
    /// 组件已关闭。
    pub const COMPONENT_CLOSED: &str = "component.closed";
    /// 对端处理器内部失败。
    pub const APP_INTERNAL: &str = "app.internal";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn kind_wire_codes_round_trip() {
        for kind in [
            ErrorKind::Connectivity,
            ErrorKind::Protocol,
            ErrorKind::Timeout,
            ErrorKind::Construction,
            ErrorKind::Discovery,
            ErrorKind::Closed,
            ErrorKind::Internal,
        ] {
            assert_eq!(ErrorKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(ErrorKind::from_u8(0), None);
    }

    #[test]
    fn source_exposes_cause_and_survives_clone() {
        let err = CoreError::connectivity("connect to mem://a refused")
            .with_cause(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let cloned = err.clone();

        assert_eq!(cloned.kind(), ErrorKind::Connectivity);
        assert_eq!(cloned.code(), codes::TRANSPORT_CONNECT);
        assert!(cloned.source().is_some());
        assert_eq!(
            cloned.to_string(),
            "[transport.connect] connect to mem://a refused"
        );
    }
}
