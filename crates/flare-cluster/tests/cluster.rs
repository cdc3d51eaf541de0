//! 集群管理器端到端测试：内存传输 + 确定性故障注入。

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use flare_cluster::{ClusterConfig, ClusterManager, ClusterOptions, LocalCluster, NodeService};
use flare_core::{
    AggregateError, AllSucceed, BestEffort, BoxFuture, ClusterNode, CoreError, Discovery,
    Endpoint, ErrorKind, FanOutResult, FirstSuccess, NodeMetadata, Request, Response, RpcHandler,
    StaticDiscovery, TagFilter, Tags, aggregate_fn, error::codes,
};
use flare_transport_mem::{Fault, MemoryHub, MemoryTransport};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Echo {
    from: String,
}

fn options() -> ClusterOptions {
    ClusterOptions {
        refresh_interval: Duration::from_millis(20),
        rpc_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(100),
    }
}

fn all() -> TagFilter {
    TagFilter::all()
}

fn endpoints(nodes: &[Arc<ClusterNode>]) -> Vec<String> {
    nodes.iter().map(|node| node.endpoint().to_string()).collect()
}

fn echo(_: &ClusterNode) -> flare_core::Result<Request> {
    Ok(Request::new("echo", Vec::<u8>::new()))
}

fn with_echo(name: &'static str) -> impl FnOnce(NodeService) -> NodeService + 'static {
    move |service| {
        let handler: Arc<dyn RpcHandler> = Arc::new(
            move |_: Request| -> BoxFuture<'static, flare_core::Result<Response>> {
                async move {
                    Response::json(&Echo {
                        from: name.to_owned(),
                    })
                }
                .boxed()
            },
        );
        service.route("echo", handler)
    }
}

fn plain_service(name: &str, tags: Tags) -> Arc<NodeService> {
    Arc::new(NodeService::new(NodeMetadata::new(name, tags)))
}

fn memory(name: &str) -> Result<Endpoint> {
    Ok(Endpoint::memory(name)?)
}

/// 可在测试中途改写答案的发现实现。
struct ScriptedDiscovery {
    answer: Mutex<flare_core::Result<BTreeSet<Endpoint>>>,
    delay: Duration,
}

impl ScriptedDiscovery {
    fn new(answer: BTreeSet<Endpoint>) -> Self {
        Self {
            answer: Mutex::new(Ok(answer)),
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn set(&self, answer: flare_core::Result<BTreeSet<Endpoint>>) {
        *self.answer.lock() = answer;
    }
}

impl Discovery for ScriptedDiscovery {
    fn resolve(&self) -> BoxFuture<'static, flare_core::Result<BTreeSet<Endpoint>>> {
        let answer = self.answer.lock().clone();
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            answer
        }
        .boxed()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn every_manager_sees_every_node_after_one_refresh() -> Result<()> {
    let cluster = LocalCluster::with_nodes(["a", "b"], options())?;
    for report in cluster.refresh_all().await? {
        assert_eq!(report.revision, 1);
        assert_eq!(report.added.len(), 2);
        assert!(report.is_clean());
    }

    for node in cluster.nodes() {
        let nodes = node.manager.get_nodes(&all());
        assert_eq!(endpoints(&nodes), ["mem://a", "mem://b"]);
        assert_eq!(nodes[0].tags().get("shard"), Some("a"));
        assert_eq!(nodes[1].id().as_str(), "b");
    }

    let a = cluster.manager("a").context("manager a")?;
    assert_eq!(endpoints(&a.get_nodes(&all())), endpoints(&a.get_nodes(&all())));
    cluster.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shard_predicate_selects_matching_nodes() -> Result<()> {
    let hub = MemoryHub::new();
    for (name, shard) in [("n1", "1"), ("n2", "2")] {
        hub.bind(name, plain_service(name, Tags::new().with("shard", shard)))?;
    }
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        Arc::new(StaticDiscovery::new([memory("n1")?, memory("n2")?])),
        options(),
    );
    manager.refresh().await?;

    let shard1 = manager.get_nodes(&TagFilter::equals("shard", "1"));
    assert_eq!(shard1.len(), 1);
    assert_eq!(shard1[0].id().as_str(), "n1");
    assert_eq!(
        endpoints(&manager.get_nodes(&TagFilter::equals("shard", "1").negate())),
        ["mem://n2"]
    );
    assert!(manager.get_nodes(&TagFilter::has_key("rack")).is_empty());
    manager.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_contains_a_timed_out_node() -> Result<()> {
    let cluster = LocalCluster::builder(options())
        .node_with("a", with_echo("a"))
        .node_with("b", with_echo("b"))
        .node_with("c", with_echo("c"))
        .build()?;
    cluster.refresh_all().await?;
    cluster.hub().inject_fault("b", Fault::Unresponsive);
    let manager = cluster.manager("a").context("manager a")?;

    let started = Instant::now();
    let partial = manager
        .fan_out::<Echo, _, _>(&all(), echo, BestEffort::collect())
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));
    let senders: Vec<&str> = partial.value.iter().map(|echo| echo.from.as_str()).collect();
    assert_eq!(senders, ["a", "c"]);
    assert_eq!(partial.total, 3);
    assert_eq!(partial.succeeded(), 2);
    assert_eq!(partial.failures.len(), 1);
    assert_eq!(partial.failures[0].node.endpoint.to_string(), "mem://b");
    assert_eq!(partial.failures[0].error.kind(), ErrorKind::Timeout);

    match manager
        .fan_out::<Echo, _, _>(&all(), echo, AllSucceed::collect())
        .await
    {
        Err(AggregateError::NodeFailures { total, failures }) => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("expected node failures, got {other:?}"),
    }

    let first = manager
        .fan_out::<Echo, _, _>(&all(), echo, FirstSuccess)
        .await?;
    assert_eq!(first.map(|echo| echo.from), Some("a".to_owned()));

    let answered = manager
        .fan_out::<Echo, _, _>(
            &all(),
            echo,
            aggregate_fn(|result: FanOutResult<Echo>| result.successes().count()),
        )
        .await;
    assert_eq!(answered, 2);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn garbled_and_failing_nodes_are_per_node_failures() -> Result<()> {
    let cluster = LocalCluster::builder(options())
        .node_with("a", with_echo("a"))
        .node_with("b", with_echo("b"))
        .build()?;
    cluster.refresh_all().await?;
    cluster.hub().inject_fault("a", Fault::Garble);
    cluster.hub().inject_fault(
        "b",
        Fault::Fail(CoreError::new(ErrorKind::Internal, "backend.down", "boom")),
    );
    let manager = cluster.manager("a").context("manager a")?;

    let result = manager.fan_out_raw::<Echo, _>(&all(), echo).await;
    let kinds: Vec<ErrorKind> = result.failures().map(|(_, err)| err.kind()).collect();
    assert_eq!(kinds, [ErrorKind::Protocol, ErrorKind::Internal]);
    let codes: Vec<&str> = result.failures().map(|(_, err)| err.code()).collect();
    assert_eq!(codes[1], "backend.down");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn request_build_failures_stay_per_node() -> Result<()> {
    let cluster = LocalCluster::builder(options())
        .node_with("a", with_echo("a"))
        .node_with("b", with_echo("b"))
        .build()?;
    cluster.refresh_all().await?;
    let manager = cluster.manager("b").context("manager b")?;

    let result = manager
        .fan_out_raw::<Echo, _>(&all(), |node| {
            if node.id().as_str() == "a" {
                Err(CoreError::new(
                    ErrorKind::Protocol,
                    codes::PROTOCOL_ENCODE,
                    "cannot encode",
                ))
            } else {
                echo(node)
            }
        })
        .await;
    assert_eq!(result.len(), 2);
    assert_eq!(result.successes().count(), 1);
    let (node, err) = result.failures().next().context("one failure")?;
    assert_eq!(node.id.as_str(), "a");
    assert_eq!(err.code(), codes::PROTOCOL_ENCODE);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_revalidation_drops_the_node_until_it_recovers() -> Result<()> {
    let cluster = LocalCluster::with_nodes(["a", "b"], options())?;
    let manager = cluster.manager("a").context("manager a")?.clone();
    manager.refresh().await?;
    let stale_b = manager
        .get_nodes(&TagFilter::equals("shard", "b"))
        .pop()
        .context("b joined")?;

    cluster
        .hub()
        .inject_fault("b", Fault::Fail(CoreError::connectivity("b is down")));
    let report = manager.refresh().await?;
    let removed: Vec<String> = report
        .removed
        .iter()
        .map(|node| node.endpoint.to_string())
        .collect();
    assert_eq!(removed, ["mem://b"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), ErrorKind::Connectivity);
    assert_eq!(endpoints(&manager.get_nodes(&all())), ["mem://a"]);

    // 被剔除节点的通道在发布后关闭。
    cluster.hub().clear_fault("b");
    let err = stale_b
        .channel()
        .send(Request::new("metadata", Vec::<u8>::new()))
        .await
        .expect_err("closed channel");
    assert_eq!(err.kind(), ErrorKind::Closed);

    let report = manager.refresh().await?;
    let added: Vec<String> = report
        .added
        .iter()
        .map(|node| node.endpoint.to_string())
        .collect();
    assert_eq!(added, ["mem://b"]);
    assert_eq!(endpoints(&manager.get_nodes(&all())), ["mem://a", "mem://b"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_endpoint_is_not_added() -> Result<()> {
    let cluster = LocalCluster::with_nodes(["a", "b"], options())?;
    cluster.hub().inject_fault("b", Fault::Refuse);
    let manager = cluster.manager("a").context("manager a")?;

    let report = manager.refresh().await?;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].endpoint.to_string(), "mem://b");
    assert_eq!(endpoints(&manager.get_nodes(&all())), ["mem://a"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unresponsive_handshake_times_out() -> Result<()> {
    let cluster = LocalCluster::with_nodes(["a", "b"], options())?;
    cluster.hub().inject_fault("b", Fault::Unresponsive);
    let manager = cluster.manager("a").context("manager a")?;

    let report = manager.refresh().await?;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), ErrorKind::Timeout);
    assert_eq!(report.failures[0].error.code(), codes::TRANSPORT_TIMEOUT);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_failure_keeps_the_previous_snapshot() -> Result<()> {
    let hub = MemoryHub::new();
    for name in ["a", "b"] {
        hub.bind(name, plain_service(name, Tags::new()))?;
    }
    let discovery = Arc::new(ScriptedDiscovery::new(
        [memory("a")?, memory("b")?].into_iter().collect(),
    ));
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        discovery.clone(),
        options(),
    );
    manager.refresh().await?;
    let before = manager.state();

    discovery.set(Err(CoreError::new(
        ErrorKind::Discovery,
        codes::DISCOVERY_RESOLVE,
        "resolver unavailable",
    )));
    let err = manager.refresh().await.expect_err("discovery failure");
    assert_eq!(err.kind(), ErrorKind::Discovery);
    assert!(Arc::ptr_eq(&before, &manager.state()));

    discovery.set(Ok(BTreeSet::new()));
    let report = manager.refresh().await?;
    assert_eq!(report.removed.len(), 2);
    assert!(manager.state().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn protocol_version_mismatch_is_rejected() -> Result<()> {
    let hub = MemoryHub::new();
    let stale: Arc<dyn RpcHandler> = Arc::new(
        |_: Request| -> BoxFuture<'static, flare_core::Result<Response>> {
            let mut metadata = NodeMetadata::new("old", Tags::new());
            metadata.version = flare_core::PROTOCOL_VERSION + 1;
            async move { Response::json(&metadata) }.boxed()
        },
    );
    hub.bind("old", stale)?;
    hub.bind("new", plain_service("new", Tags::new()))?;
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        Arc::new(StaticDiscovery::new([memory("old")?, memory("new")?])),
        options(),
    );

    let report = manager.refresh().await?;
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.endpoint.to_string(), "mem://old");
    assert_eq!(failure.error.kind(), ErrorKind::Protocol);
    assert_eq!(failure.error.code(), codes::CLUSTER_PROTOCOL_MISMATCH);
    assert_eq!(endpoints(&manager.get_nodes(&all())), ["mem://new"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_only_observe_whole_snapshots() -> Result<()> {
    let hub = MemoryHub::new();
    for name in ["a", "b", "c", "d"] {
        hub.bind(name, plain_service(name, Tags::new()))?;
    }
    let left: BTreeSet<Endpoint> = [memory("a")?, memory("b")?].into_iter().collect();
    let right: BTreeSet<Endpoint> = [memory("c")?, memory("d")?].into_iter().collect();
    let discovery = Arc::new(ScriptedDiscovery::new(left.clone()));
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        discovery.clone(),
        options(),
    );

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let manager = manager.clone();
        let done = Arc::clone(&done);
        let (left, right) = (left.clone(), right.clone());
        tokio::spawn(async move {
            let mut observed = 0usize;
            let mut last_revision = 0;
            while !done.load(Ordering::Acquire) {
                let state = manager.state();
                assert!(state.revision() >= last_revision);
                last_revision = state.revision();
                let seen: BTreeSet<Endpoint> = state
                    .nodes()
                    .iter()
                    .map(|node| node.endpoint().clone())
                    .collect();
                assert!(
                    seen.is_empty() || seen == left || seen == right,
                    "torn snapshot: {seen:?}"
                );
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    for round in 0..20 {
        let next = if round % 2 == 0 { &left } else { &right };
        discovery.set(Ok(next.clone()));
        let report = manager.refresh().await?;
        assert_eq!(report.revision, round + 1);
    }
    done.store(true, Ordering::Release);
    assert!(reader.await? > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_refreshes_join_one_round() -> Result<()> {
    let hub = MemoryHub::new();
    hub.bind("a", plain_service("a", Tags::new()))?;
    let discovery = ScriptedDiscovery::new([memory("a")?].into_iter().collect())
        .slow(Duration::from_millis(50));
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        Arc::new(discovery),
        options(),
    );

    let (first, second) = tokio::join!(manager.refresh(), manager.refresh());
    assert_eq!(first?.revision, second?.revision);
    assert_eq!(manager.state().revision(), 1);

    // 轮次结束后再次刷新会开启新一轮。
    assert_eq!(manager.refresh().await?.revision, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_registration_joins_and_leaves() -> Result<()> {
    let hub = MemoryHub::new();
    hub.bind("solo", plain_service("solo", Tags::new().with("shard", "9")))?;
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(hub)),
        Arc::new(StaticDiscovery::default()),
        options(),
    );
    let solo = memory("solo")?;

    assert!(manager.register(solo.clone()));
    assert!(!manager.register(solo.clone()));
    assert!(manager.get_nodes(&all()).is_empty());

    let report = manager.refresh().await?;
    assert_eq!(report.added.len(), 1);
    assert_eq!(endpoints(&manager.get_nodes(&all())), ["mem://solo"]);

    let revision = manager.state().revision();
    assert!(manager.deregister(&solo).await);
    assert!(manager.get_nodes(&all()).is_empty());
    assert!(manager.registered().is_empty());
    assert_eq!(manager.state().revision(), revision + 1);

    let report = manager.refresh().await?;
    assert!(report.added.is_empty());
    assert!(manager.get_nodes(&all()).is_empty());
    assert!(!manager.deregister(&solo).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn periodic_refresh_and_stop() -> Result<()> {
    let cluster = LocalCluster::with_nodes(["a", "b"], options())?;
    let manager = cluster.manager("a").context("manager a")?.clone();

    assert!(manager.start());
    assert!(!manager.start());
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get_nodes(&all()).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    let node = manager.get_nodes(&all()).pop().context("a node")?;

    manager.stop().await;
    assert!(manager.get_nodes(&all()).is_empty());
    let err = node
        .channel()
        .send(Request::new("metadata", Vec::<u8>::new()))
        .await
        .expect_err("closed by stop");
    assert_eq!(err.kind(), ErrorKind::Closed);

    // 停止后可以重新启动。
    assert!(manager.start());
    manager.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_fan_out_follows_the_policy() -> Result<()> {
    let manager = ClusterManager::new(
        Arc::new(MemoryTransport::new(MemoryHub::new())),
        Arc::new(StaticDiscovery::default()),
        options(),
    );
    manager.refresh().await?;

    let empty = manager
        .fan_out::<Echo, _, _>(&all(), echo, AllSucceed::collect())
        .await?;
    assert!(empty.is_empty());

    let required = manager
        .fan_out::<Echo, _, _>(&all(), echo, AllSucceed::collect().require_nodes())
        .await;
    assert!(matches!(required, Err(AggregateError::NoNodes)));

    let none = manager
        .fan_out::<Echo, _, _>(&all(), echo, FirstSuccess)
        .await?;
    assert!(none.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn manager_built_from_config() -> Result<()> {
    let config = ClusterConfig::from_toml_str(
        r#"
rpc_timeout_ms = 200

[tags]
shard = "7"

[discovery]
type = "static"
nodes = ["mem://a", "mem://b"]
"#,
    )?;
    let hub = MemoryHub::new();
    for name in ["a", "b"] {
        hub.bind(name, Arc::new(config.node_service(name)))?;
    }
    let manager = ClusterManager::new(
        config.build_transport(hub),
        config.build_discovery(),
        config.cluster_options(),
    );
    assert_eq!(manager.options().rpc_timeout, Duration::from_millis(200));
    manager.refresh().await?;
    let nodes = manager.get_nodes(&TagFilter::equals("shard", "7"));
    assert_eq!(endpoints(&nodes), ["mem://a", "mem://b"]);
    Ok(())
}
