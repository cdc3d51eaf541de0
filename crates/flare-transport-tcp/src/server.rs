use std::{net::SocketAddr, sync::Arc};

use flare_core::{CoreError, Endpoint, RpcHandler};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    codec::{self, Frame},
    error::{self, map_io_error},
    socket::TcpSocketConfig,
};

/// 以 [`RpcHandler`] 响应 TCP 帧请求的服务端。
///
/// # 逻辑 (How)
/// - 绑定后立即在后台任务中运行接受循环；每条连接由 `JoinSet` 中的独立任务服务，
///   连接内按帧顺序逐个处理请求。
/// - 处理器返回的错误编码为错误帧，连接保持打开；帧格式错误会回送错误帧后断开连接。
///
/// # 契约 (What)
/// - **前置条件**：必须在 Tokio 运行时中调用 `bind`；
/// - `shutdown` 停止接受新连接并中止所有连接任务；直接丢弃服务端句柄效果相同但不等待。
#[derive(Debug)]
pub struct TcpRpcServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TcpRpcServer {
    /// 绑定到指定地址，端口为 0 时由内核分配。
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn RpcHandler>,
    ) -> flare_core::Result<Self> {
        Self::bind_with_config(addr, handler, TcpSocketConfig::default()).await
    }

    /// 绑定并为每条入站连接应用指定的套接字配置。
    pub async fn bind_with_config(
        addr: SocketAddr,
        handler: Arc<dyn RpcHandler>,
        config: TcpSocketConfig,
    ) -> flare_core::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        let (shutdown, signal) = watch::channel(false);
        info!(%local_addr, "tcp rpc server listening");
        let task = tokio::spawn(accept_loop(listener, handler, config, signal));
        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    /// 返回实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 返回可供集群发现使用的 `tcp://ip:port` 端点。
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::tcp(self.local_addr)
    }

    /// 停止服务并等待接受循环退出。
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "tcp rpc server task ended abnormally");
        }
        info!(local_addr = %self.local_addr, "tcp rpc server stopped");
    }
}

impl Drop for TcpRpcServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
    config: TcpSocketConfig,
    mut signal: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = signal.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = config.apply(&stream) {
                        warn!(%peer, error = %map_io_error(error::CONFIGURE, err), "failed to configure accepted socket");
                    }
                    debug!(%peer, "tcp connection accepted");
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&handler)));
                }
                Err(err) => {
                    warn!(error = %map_io_error(error::ACCEPT, err), "tcp accept failed");
                }
            },
        }
        while let Some(joined) = connections.try_join_next() {
            if let Err(err) = joined
                && err.is_panic()
            {
                warn!(error = %err, "tcp connection task panicked");
            }
        }
    }
    connections.shutdown().await;
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, handler: Arc<dyn RpcHandler>) {
    loop {
        let frame = match codec::read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                debug!(%peer, error = %err, "tcp connection read failed");
                if err.kind() == flare_core::ErrorKind::Protocol {
                    let _ = codec::write_frame(&mut stream, &Frame::Error(err)).await;
                }
                break;
            }
        };

        let reply = match frame {
            Frame::Request(request) => match handler.handle(request).await {
                Ok(response) => Frame::Response(response),
                Err(err) => Frame::Error(err),
            },
            Frame::Response(_) | Frame::Error(_) => {
                let err = CoreError::protocol("server expected a request frame");
                let _ = codec::write_frame(&mut stream, &Frame::Error(err)).await;
                break;
            }
        };

        if let Err(err) = codec::write_frame(&mut stream, &reply).await {
            debug!(%peer, error = %err, "tcp connection write failed");
            break;
        }
    }
    debug!(%peer, "tcp connection closed");
}
