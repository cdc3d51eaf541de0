use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use flare_core::{
    BoxFuture, Channel, CoreError, Endpoint, ErrorKind, Request, Response, Transport,
    error::codes,
};
use futures::FutureExt;
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex as AsyncMutex};
use tracing::debug;

use crate::{
    codec::{self, Frame},
    error::{self, CONFIGURE, map_io_error, timeout_error},
    socket::TcpSocketConfig,
};

/// `tcp` 方案使用的 URI scheme。
pub const SCHEME: &str = "tcp";

/// 连接 `tcp://host:port` 端点的传输实现。
///
/// # 契约说明（What）
/// - `connect` 完成 TCP 建连并应用 [`TcpSocketConfig`]；失败分类为连通性或超时。
/// - `connect_timeout` 为 `None` 时建连不设时限，由调用方自行约束。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport {
    config: TcpSocketConfig,
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket_config(mut self, config: TcpSocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn socket_config(&self) -> &TcpSocketConfig {
        &self.config
    }
}

impl Transport for TcpTransport {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, flare_core::Result<Arc<dyn Channel>>> {
        let endpoint = endpoint.clone();
        let settings = *self;
        async move {
            let stream = open(&endpoint, &settings).await?;
            let channel: Arc<dyn Channel> = Arc::new(TcpChannel {
                inner: Arc::new(TcpChannelInner {
                    endpoint,
                    settings,
                    stream: AsyncMutex::new(Some(stream)),
                    closed: AtomicBool::new(false),
                }),
            });
            Ok(channel)
        }
        .boxed()
    }
}

async fn open(endpoint: &Endpoint, settings: &TcpTransport) -> flare_core::Result<TcpStream> {
    if endpoint.scheme() != SCHEME {
        return Err(CoreError::new(
            ErrorKind::Protocol,
            codes::TRANSPORT_UNSUPPORTED_SCHEME,
            format!("tcp transport cannot connect to `{endpoint}`"),
        ));
    }
    if endpoint.port().is_none() {
        return Err(CoreError::new(
            ErrorKind::Protocol,
            codes::TRANSPORT_INVALID_ENDPOINT,
            format!("tcp endpoint `{endpoint}` is missing a port"),
        ));
    }

    let connect = TcpStream::connect(endpoint.host_port());
    let stream = match settings.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| timeout_error(error::CONNECT))?,
        None => connect.await,
    }
    .map_err(|err| map_io_error(error::CONNECT, err))?;

    settings
        .config
        .apply(&stream)
        .map_err(|err| map_io_error(CONFIGURE, err))?;
    debug!(%endpoint, "tcp channel connected");
    Ok(stream)
}

#[derive(Debug)]
struct TcpChannelInner {
    endpoint: Endpoint,
    settings: TcpTransport,
    stream: AsyncMutex<Option<TcpStream>>,
    closed: AtomicBool,
}

/// 单条 TCP 连接上的 RPC 通道。
///
/// # 逻辑 (How)
/// - 以 `tokio::sync::Mutex` 包裹连接，一次只允许一个请求/响应交换；
/// - 交换开始前把连接从槽中取出，只有交换完整结束才放回。
///   因超时被取消、I/O 失败或帧格式错误的交换会丢弃连接，下一次发送透明地重新建连。
///
/// # 契约 (What)
/// - 对端回传的错误帧按原分类交付给调用方，连接保持可用；
/// - `close` 之后的发送返回 [`ErrorKind::Closed`]。
///
/// # 注意事项 (Trade-offs)
/// - 串行化意味着同一通道上的并发请求排队执行；需要并行时应建立多条通道。
#[derive(Clone, Debug)]
pub struct TcpChannel {
    inner: Arc<TcpChannelInner>,
}

impl TcpChannel {
    async fn exchange(inner: Arc<TcpChannelInner>, request: Request) -> flare_core::Result<Response> {
        if inner.closed.load(Ordering::Acquire) {
            return Err(closed(&inner.endpoint));
        }
        let mut slot = inner.stream.lock().await;
        if inner.closed.load(Ordering::Acquire) {
            return Err(closed(&inner.endpoint));
        }

        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => {
                debug!(endpoint = %inner.endpoint, "reconnecting tcp channel");
                open(&inner.endpoint, &inner.settings).await?
            }
        };

        codec::write_frame(&mut stream, &Frame::Request(request)).await?;
        let frame = codec::read_frame(&mut stream).await?.ok_or_else(|| {
            CoreError::connectivity(format!(
                "`{}` closed the connection before replying",
                inner.endpoint
            ))
        })?;

        match frame {
            Frame::Response(response) => {
                *slot = Some(stream);
                Ok(response)
            }
            Frame::Error(err) => {
                *slot = Some(stream);
                Err(err)
            }
            Frame::Request(_) => Err(CoreError::protocol(format!(
                "`{}` answered with a request frame",
                inner.endpoint
            ))),
        }
    }
}

impl Channel for TcpChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    fn send(&self, request: Request) -> BoxFuture<'static, flare_core::Result<Response>> {
        Self::exchange(Arc::clone(&self.inner), request).boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.closed.store(true, Ordering::Release);
            if let Some(mut stream) = inner.stream.lock().await.take()
                && let Err(err) = stream.shutdown().await
            {
                debug!(endpoint = %inner.endpoint, error = %err, "tcp shutdown failed");
            }
        }
        .boxed()
    }
}

fn closed(endpoint: &Endpoint) -> CoreError {
    CoreError::closed(format!("channel to `{endpoint}` is closed"))
}
