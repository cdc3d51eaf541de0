use std::{fmt, net::SocketAddr, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind, codes};

/// `Endpoint` 将协议方案、访问主体与可选端口统一表达为集群节点的地址。
///
/// # 设计背景（Why）
/// - 节点对调用方而言只是“不透明的 RPC 端点 + 标签”，端点本身既是注册表的键，也决定使用哪种传输。
/// - 快照内节点按端点排序，因此端点需要全序且稳定。
///
/// # 契约说明（What）
/// - 文本形式为 `scheme://authority[:port]`，例如 `mem://a`、`tcp://10.0.0.1:1394`。
/// - `scheme` 统一转为小写；`authority` 不可为空。
/// - 排序依次比较 `scheme`、`authority`、`port`。
/// - 序列化为文本形式，便于直接出现在配置文件中。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: String,
    authority: String,
    port: Option<u16>,
}

impl Endpoint {
    /// 构造端点；`authority` 为空时返回协议错误。
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        port: Option<u16>,
    ) -> Result<Self, CoreError> {
        let scheme = scheme.into().to_ascii_lowercase();
        let authority = authority.into();
        if scheme.is_empty() || authority.is_empty() {
            return Err(invalid(format!(
                "endpoint requires scheme and authority, got `{scheme}://{authority}`"
            )));
        }
        Ok(Self {
            scheme,
            authority,
            port,
        })
    }

    /// 进程内模拟传输的端点 `mem://<name>`。
    pub fn memory(name: impl Into<String>) -> Result<Self, CoreError> {
        Self::new("mem", name, None)
    }

    /// 由套接字地址构造 `tcp://ip:port`。
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            scheme: "tcp".to_owned(),
            authority: addr.ip().to_string(),
            port: Some(addr.port()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 返回 `authority[:port]`，IPv6 地址会带上方括号，可直接交给解析器。
    pub fn host_port(&self) -> String {
        let host = if self.authority.contains(':') {
            format!("[{}]", self.authority)
        } else {
            self.authority.clone()
        };
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host_port())
    }
}

impl FromStr for Endpoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| invalid(format!("endpoint `{s}` is missing `scheme://`")))?;

        let (authority, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid(format!("endpoint `{s}` has an unterminated `[`")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(parse_port(s, port)?),
                None if tail.is_empty() => None,
                None => return Err(invalid(format!("endpoint `{s}` has trailing garbage"))),
            };
            (host, port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(parse_port(s, port)?)),
                None => (rest, None),
            }
        };

        Self::new(scheme, authority, port)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

fn parse_port(raw: &str, port: &str) -> Result<u16, CoreError> {
    port.parse::<u16>()
        .map_err(|err| invalid(format!("endpoint `{raw}` has invalid port `{port}`")).with_cause(err))
}

fn invalid(message: String) -> CoreError {
    CoreError::new(ErrorKind::Protocol, codes::TRANSPORT_INVALID_ENDPOINT, message)
}
