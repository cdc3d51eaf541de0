use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use flare_core::{
    BoxFuture, Channel, CoreError, Endpoint, ErrorKind, Request, Response, Transport,
    error::codes,
};
use futures::{FutureExt, future};

use crate::hub::{Fault, MemoryHub, Route};

/// `mem` 方案使用的 URI scheme。
pub const SCHEME: &str = "mem";

const GARBLED_PAYLOAD: &[u8] = b"\xff\x00\xfegarbled";

/// 连接 `mem://<name>` 端点的传输实现。
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl Transport for MemoryTransport {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, flare_core::Result<Arc<dyn Channel>>> {
        let outcome = if endpoint.scheme() != SCHEME {
            Err(CoreError::new(
                ErrorKind::Protocol,
                codes::TRANSPORT_UNSUPPORTED_SCHEME,
                format!("memory transport cannot connect to `{endpoint}`"),
            ))
        } else if matches!(self.hub.fault(endpoint.authority()), Some(Fault::Refuse)) {
            Err(refused(endpoint))
        } else if !self.hub.is_bound(endpoint.authority()) {
            Err(unbound(endpoint))
        } else {
            let channel: Arc<dyn Channel> = Arc::new(MemoryChannel {
                endpoint: endpoint.clone(),
                hub: self.hub.clone(),
                closed: AtomicBool::new(false),
            });
            Ok(channel)
        };
        future::ready(outcome).boxed()
    }
}

/// 到某个逻辑名的通道；每次发送都重新查找绑定与故障。
#[derive(Debug)]
pub struct MemoryChannel {
    endpoint: Endpoint,
    hub: MemoryHub,
    closed: AtomicBool,
}

impl Channel for MemoryChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&self, request: Request) -> BoxFuture<'static, flare_core::Result<Response>> {
        if self.closed.load(Ordering::Acquire) {
            return future::ready(Err(CoreError::closed(format!(
                "channel to `{}` is closed",
                self.endpoint
            ))))
            .boxed();
        }

        match self.hub.route(self.endpoint.authority()) {
            Route::Handler(handler) => handler.handle(request),
            Route::Unbound => future::ready(Err(unbound(&self.endpoint))).boxed(),
            Route::Fault(Fault::Refuse) => future::ready(Err(refused(&self.endpoint))).boxed(),
            Route::Fault(Fault::Unresponsive) => future::pending().boxed(),
            Route::Fault(Fault::Garble) => {
                future::ready(Ok(Response::new(Bytes::from_static(GARBLED_PAYLOAD)))).boxed()
            }
            Route::Fault(Fault::Fail(err)) => future::ready(Err(err)).boxed(),
        }
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        self.closed.store(true, Ordering::Release);
        future::ready(()).boxed()
    }
}

fn refused(endpoint: &Endpoint) -> CoreError {
    CoreError::connectivity(format!("connection to `{endpoint}` refused"))
}

fn unbound(endpoint: &Endpoint) -> CoreError {
    CoreError::connectivity(format!("no node is bound at `{endpoint}`"))
}
