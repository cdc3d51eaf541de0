use std::io;

use flare_core::{CoreError, ErrorKind};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "transport.tcp.configure_failed",
    message: "tcp configure",
};

const TIMEOUT_CODE: &str = "transport.tcp.timeout";

/// 将 IO 错误映射为框架级 CoreError，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(category, kind.code, format!("{}: {}", kind.message, error)).with_cause(error)
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    CoreError::new(
        ErrorKind::Timeout,
        TIMEOUT_CODE,
        format!("{} timed out", kind.message),
    )
}

fn categorize_io_error(error: &io::Error) -> ErrorKind {
    use io::ErrorKind as Io;
    match error.kind() {
        Io::TimedOut => ErrorKind::Timeout,
        Io::InvalidData => ErrorKind::Protocol,
        Io::PermissionDenied | Io::Unsupported | Io::AddrInUse => ErrorKind::Internal,
        // 拒绝、重置、EOF 等一律视为连通性故障。
        _ => ErrorKind::Connectivity,
    }
}
