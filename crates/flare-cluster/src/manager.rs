use std::{
    collections::BTreeSet,
    fmt,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use arc_swap::ArcSwap;
use flare_core::{
    Aggregator, BoxFuture, Channel, ClusterNode, ClusterState, CoreError, Discovery, Endpoint,
    ErrorKind, FanOutResult, NodeIdentity, NodeMetadata, NodeOutcome, PROTOCOL_VERSION, Request,
    TagFilter, Transport, error::codes,
};
use futures::{
    FutureExt,
    future::{self, Shared},
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::METADATA_METHOD;

/// 集群管理器的时限参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterOptions {
    /// 周期刷新的间隔；为零时 [`ClusterManager::start`] 拒绝启动。
    pub refresh_interval: Duration,
    /// 每次 RPC（握手与扇出）的时限。
    pub rpc_timeout: Duration,
    /// 建连时限。
    pub connect_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// 单个端点在刷新轮次中的探测失败。
#[derive(Clone, Debug)]
pub struct ProbeFailure {
    pub endpoint: Endpoint,
    pub error: CoreError,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.error)
    }
}

/// 一轮刷新的结果摘要。
///
/// - `revision`：本轮发布的快照版本；
/// - `added` / `removed`：相对发布前快照新增与剔除的节点；
/// - `failures`：握手或重新校验失败的端点，这些端点不会出现在新快照中。
#[derive(Clone, Debug, Default)]
pub struct RefreshReport {
    pub revision: u64,
    pub added: Vec<NodeIdentity>,
    pub removed: Vec<NodeIdentity>,
    pub failures: Vec<ProbeFailure>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type RefreshRound = Shared<BoxFuture<'static, flare_core::Result<RefreshReport>>>;

enum Probe {
    Joined(Arc<ClusterNode>),
    Revalidated(Arc<ClusterNode>),
}

struct RefreshLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    options: ClusterOptions,
    state: ArcSwap<ClusterState>,
    registered: Mutex<BTreeSet<Endpoint>>,
    /// 串行化快照发布：刷新与注销都在持锁期间完成“读取当前快照 → 写入新快照”。
    publish: Mutex<()>,
    round: Mutex<Option<RefreshRound>>,
    refresher: Mutex<Option<RefreshLoop>>,
}

/// 集群节点的活动注册表与扇出入口。
///
/// # 教案式说明
/// - **意图（Why）**：调用方按分片标签挑选节点并向它们并发发起 RPC，
///   同时注册表随发现结果与节点健康状况持续演进；读路径必须永不等待刷新。
/// - **逻辑（How）**：
///   1. 刷新轮次解析“发现结果 ∪ 直接注册”，新端点建连并握手，已有节点以同一握手重新校验，
///      所有探测并发且互不影响；
///   2. 全部探测落定后，在发布锁内基于当前快照计算新快照并以 `ArcSwap::store` 一次性替换；
///   3. 被剔除节点的通道在发布之后关闭；
///   4. 并发的 `refresh` 调用共享同一轮次（`futures::future::Shared`）。
/// - **契约（What）**：
///   - `get_nodes` 只读取最新快照，按端点排序，不会阻塞；
///   - 握手失败的新端点不加入；重新校验失败的节点立即剔除，没有宽限期；
///   - 协议版本不一致返回 [`ErrorKind::Protocol`]（[`codes::CLUSTER_PROTOCOL_MISMATCH`]）；
///   - 发现失败时本轮返回错误，已发布的快照保持不变；
///   - 扇出在观察任何结果之前为每个节点发出请求，每个 RPC 受 `rpc_timeout` 约束，超时计为该节点失败。
/// - **风险（Trade-offs）**：
///   - 刷新轮次在 Tokio 任务中执行，调用方放弃等待不会中断本轮；
///   - 每轮都会发布新版本，即使节点集合未变。
#[derive(Clone)]
pub struct ClusterManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.load();
        f.debug_struct("ClusterManager")
            .field("revision", &state.revision())
            .field("nodes", &state.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl ClusterManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        options: ClusterOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                discovery,
                options,
                state: ArcSwap::from_pointee(ClusterState::empty()),
                registered: Mutex::new(BTreeSet::new()),
                publish: Mutex::new(()),
                round: Mutex::new(None),
                refresher: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.inner.options
    }

    /// 最新发布的快照。
    pub fn state(&self) -> Arc<ClusterState> {
        self.inner.state.load_full()
    }

    /// 最新快照中满足谓词的节点，按端点排序。
    pub fn get_nodes(&self, filter: &TagFilter) -> Vec<Arc<ClusterNode>> {
        self.inner.state.load().matching(filter)
    }

    /// 直接注册的端点。
    pub fn registered(&self) -> Vec<Endpoint> {
        self.inner.registered.lock().iter().cloned().collect()
    }

    /// 直接注册一个端点，由下一轮刷新负责建连与握手。
    ///
    /// 返回 `false` 表示端点此前已注册。
    pub fn register(&self, endpoint: Endpoint) -> bool {
        let inserted = self.inner.registered.lock().insert(endpoint.clone());
        if inserted {
            debug!(%endpoint, "endpoint registered");
        }
        inserted
    }

    /// 撤销直接注册并立即把节点移出快照，随后关闭其通道。
    ///
    /// 若端点仍被发现，下一轮刷新会重新加入它。返回值表示是否有任何变化。
    pub fn deregister(&self, endpoint: &Endpoint) -> BoxFuture<'static, bool> {
        let was_registered = self.inner.registered.lock().remove(endpoint);
        let removed = {
            let _publish = self.inner.publish.lock();
            let current = self.inner.state.load_full();
            let removed = current.find(endpoint).cloned();
            if removed.is_some() {
                let nodes = current
                    .nodes()
                    .iter()
                    .filter(|node| node.endpoint() != endpoint)
                    .cloned()
                    .collect();
                self.inner
                    .state
                    .store(Arc::new(ClusterState::new(current.revision() + 1, nodes)));
            }
            removed
        };
        async move {
            match removed {
                Some(node) => {
                    info!(node = %node.identity(), "node deregistered");
                    node.channel().close().await;
                    true
                }
                None => was_registered,
            }
        }
        .boxed()
    }

    /// 触发一轮刷新；已有轮次在进行时加入该轮次。
    ///
    /// **前置条件**：必须在 Tokio 运行时中轮询返回的 Future。
    pub fn refresh(&self) -> BoxFuture<'static, flare_core::Result<RefreshReport>> {
        let inner = Arc::clone(&self.inner);
        async move { Inner::current_round(&inner).await }.boxed()
    }

    /// 对满足谓词的节点逐个发送 `build` 构造的请求，并把响应解码为 `T`。
    ///
    /// 构造请求失败、发送失败、超时与解码失败都记为对应节点的失败；结果按端点排序。
    pub fn fan_out_raw<T, B>(&self, filter: &TagFilter, build: B) -> BoxFuture<'static, FanOutResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
        B: Fn(&ClusterNode) -> flare_core::Result<Request>,
    {
        let limit = self.inner.options.rpc_timeout;
        let calls: Vec<_> = self
            .get_nodes(filter)
            .iter()
            .map(|node| {
                let identity = node.identity();
                let sent = build(node.as_ref()).map(|request| node.channel().send(request));
                async move {
                    let result = match sent {
                        Ok(call) => within(limit, &identity.endpoint, "request", call)
                            .await
                            .and_then(|response| response.decode::<T>()),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = &result {
                        debug!(node = %identity, error = %err, "fan-out call failed");
                    }
                    NodeOutcome {
                        node: identity,
                        result,
                    }
                }
            })
            .collect();

        async move {
            let result = FanOutResult::new(future::join_all(calls).await);
            let failed = result.failures().count();
            if failed > 0 {
                warn!(failed, total = result.len(), "fan-out finished with node failures");
            }
            result
        }
        .boxed()
    }

    /// 扇出并以调用方选择的策略聚合结果。
    pub fn fan_out<T, B, A>(
        &self,
        filter: &TagFilter,
        build: B,
        aggregator: A,
    ) -> BoxFuture<'static, A::Output>
    where
        T: DeserializeOwned + Send + 'static,
        B: Fn(&ClusterNode) -> flare_core::Result<Request>,
        A: Aggregator<T> + Send + 'static,
        A::Output: Send,
    {
        let raw = self.fan_out_raw(filter, build);
        async move { aggregator.aggregate(raw.await) }.boxed()
    }

    /// 启动周期刷新任务，首轮立即执行。
    ///
    /// 已在运行，或 `refresh_interval` 为零时返回 `false`，不会启动任务。
    ///
    /// **前置条件**：必须在 Tokio 运行时中调用。
    pub fn start(&self) -> bool {
        let period = self.inner.options.refresh_interval;
        if period.is_zero() {
            warn!("cluster refresh loop not started: refresh interval is zero");
            return false;
        }
        let mut refresher = self.inner.refresher.lock();
        if refresher.is_some() {
            return false;
        }
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(refresh_loop(Arc::downgrade(&self.inner), period, signal));
        *refresher = Some(RefreshLoop { shutdown, task });
        info!(?period, "cluster refresh loop started");
        true
    }

    /// 停止周期刷新，等待进行中的轮次结束，然后发布空快照并关闭所有通道。
    ///
    /// 停止后仍可再次 `refresh` 或 `start`，节点会被重新建连。
    pub fn stop(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        async move {
            let refresher = inner.refresher.lock().take();
            if let Some(RefreshLoop { shutdown, task }) = refresher {
                shutdown.send_replace(true);
                if let Err(err) = task.await
                    && !err.is_cancelled()
                {
                    warn!(error = %err, "cluster refresh loop ended abnormally");
                }
            }

            let round = inner.round.lock().clone();
            if let Some(round) = round {
                let _ = round.await;
            }

            let retired = {
                let _publish = inner.publish.lock();
                let current = inner.state.load_full();
                inner
                    .state
                    .store(Arc::new(ClusterState::new(current.revision() + 1, Vec::new())));
                current
            };
            close_channels(retired.nodes().iter().cloned()).await;
            info!(closed = retired.len(), "cluster manager stopped");
        }
        .boxed()
    }
}

impl Inner {
    fn current_round(self: &Arc<Self>) -> RefreshRound {
        let mut slot = self.round.lock();
        if let Some(round) = slot.as_ref() {
            return round.clone();
        }

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _clear = RoundGuard(Arc::clone(&inner));
            inner.run_round().await
        });
        let round = async move {
            task.await.unwrap_or_else(|err| {
                Err(CoreError::new(
                    ErrorKind::Internal,
                    codes::APP_INTERNAL,
                    "cluster refresh task failed",
                )
                .with_cause(err))
            })
        }
        .boxed()
        .shared();
        *slot = Some(round.clone());
        round
    }

    async fn run_round(self: &Arc<Self>) -> flare_core::Result<RefreshReport> {
        let discovered = match self.discovery.resolve().await {
            Ok(discovered) => discovered,
            Err(err) => {
                warn!(error = %err, "discovery failed, keeping the previous cluster snapshot");
                return Err(err);
            }
        };
        let registered = self.registered.lock().clone();
        let previous = self.state.load_full();

        let probes = discovered.union(&registered).cloned().map(|endpoint| {
            let existing = previous.find(&endpoint).cloned();
            let inner = Arc::clone(self);
            async move {
                let probe = match existing {
                    Some(node) => inner.revalidate(node).await.map(Probe::Revalidated),
                    None => inner.join(&endpoint).await.map(Probe::Joined),
                };
                (endpoint, probe)
            }
        });
        let settled = future::join_all(probes).await;

        let (report, retired) = self.publish_round(&discovered, settled);
        close_channels(retired).await;

        for node in &report.added {
            info!(%node, "node joined");
        }
        for node in &report.removed {
            info!(%node, "node dropped");
        }
        for failure in &report.failures {
            warn!(endpoint = %failure.endpoint, error = %failure.error, "node probe failed");
        }
        debug!(
            revision = report.revision,
            added = report.added.len(),
            removed = report.removed.len(),
            failures = report.failures.len(),
            "cluster snapshot published"
        );
        Ok(report)
    }

    /// 根据探测结果与“此刻”的快照计算并发布新快照，返回需要关闭通道的节点。
    fn publish_round(
        &self,
        discovered: &BTreeSet<Endpoint>,
        settled: Vec<(Endpoint, flare_core::Result<Probe>)>,
    ) -> (RefreshReport, Vec<Arc<ClusterNode>>) {
        let _publish = self.publish.lock();
        let registered = self.registered.lock().clone();
        let current = self.state.load_full();

        let mut nodes = Vec::new();
        let mut failures = Vec::new();
        let mut retired = Vec::new();
        for (endpoint, probe) in settled {
            let wanted = discovered.contains(&endpoint) || registered.contains(&endpoint);
            match probe {
                Ok(Probe::Joined(node)) => {
                    if wanted && !current.contains(&endpoint) {
                        nodes.push(node);
                    } else {
                        retired.push(node);
                    }
                }
                // 探测期间被注销的节点已关闭通道，不得复活。
                Ok(Probe::Revalidated(node)) => {
                    if wanted && current.contains(&endpoint) {
                        nodes.push(node);
                    }
                }
                Err(error) => failures.push(ProbeFailure { endpoint, error }),
            }
        }

        let next = ClusterState::new(current.revision() + 1, nodes);
        let added = next
            .nodes()
            .iter()
            .filter(|node| !current.contains(node.endpoint()))
            .map(|node| node.identity())
            .collect();
        let mut removed = Vec::new();
        for node in current.nodes() {
            if !next.contains(node.endpoint()) {
                removed.push(node.identity());
                retired.push(Arc::clone(node));
            }
        }

        let report = RefreshReport {
            revision: next.revision(),
            added,
            removed,
            failures,
        };
        self.state.store(Arc::new(next));
        (report, retired)
    }

    async fn join(&self, endpoint: &Endpoint) -> flare_core::Result<Arc<ClusterNode>> {
        let channel = within(
            self.options.connect_timeout,
            endpoint,
            "connect",
            self.transport.connect(endpoint),
        )
        .await?;
        match self.handshake(&channel).await {
            Ok(metadata) => Ok(Arc::new(ClusterNode::new(
                endpoint.clone(),
                metadata,
                channel,
            ))),
            Err(err) => {
                channel.close().await;
                Err(err)
            }
        }
    }

    async fn revalidate(&self, node: Arc<ClusterNode>) -> flare_core::Result<Arc<ClusterNode>> {
        let metadata = self.handshake(node.channel()).await?;
        if &metadata == node.metadata() {
            return Ok(node);
        }
        debug!(node = %node.identity(), "node metadata changed");
        Ok(Arc::new(ClusterNode::new(
            node.endpoint().clone(),
            metadata,
            Arc::clone(node.channel()),
        )))
    }

    async fn handshake(&self, channel: &Arc<dyn Channel>) -> flare_core::Result<NodeMetadata> {
        let endpoint = channel.endpoint().clone();
        let request = Request::new(METADATA_METHOD, Vec::<u8>::new());
        let response = within(
            self.options.rpc_timeout,
            &endpoint,
            "handshake",
            channel.send(request),
        )
        .await?;
        let metadata: NodeMetadata = response.decode()?;
        if metadata.version != PROTOCOL_VERSION {
            return Err(CoreError::new(
                ErrorKind::Protocol,
                codes::CLUSTER_PROTOCOL_MISMATCH,
                format!(
                    "`{endpoint}` speaks protocol version {}, expected {PROTOCOL_VERSION}",
                    metadata.version
                ),
            ));
        }
        Ok(metadata)
    }
}

/// 轮次结束（包括任务 panic）时清空共享槽位。
struct RoundGuard(Arc<Inner>);

impl Drop for RoundGuard {
    fn drop(&mut self) {
        *self.0.round.lock() = None;
    }
}

async fn refresh_loop(inner: Weak<Inner>, period: Duration, mut signal: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = signal.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Err(err) = Inner::current_round(&inner).await {
                    debug!(error = %err, "periodic cluster refresh failed");
                }
            }
        }
    }
    debug!("cluster refresh loop exited");
}

async fn within<T, F>(
    limit: Duration,
    endpoint: &Endpoint,
    operation: &str,
    work: F,
) -> flare_core::Result<T>
where
    F: Future<Output = flare_core::Result<T>>,
{
    tokio::time::timeout(limit, work).await.map_err(|_| {
        CoreError::new(
            ErrorKind::Timeout,
            codes::TRANSPORT_TIMEOUT,
            format!("{operation} to `{endpoint}` timed out after {limit:?}"),
        )
    })?
}

async fn close_channels(nodes: impl IntoIterator<Item = Arc<ClusterNode>>) {
    future::join_all(nodes.into_iter().map(|node| node.channel().close())).await;
}
