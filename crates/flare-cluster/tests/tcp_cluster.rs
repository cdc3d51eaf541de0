//! 真实套接字上的集群：节点服务监听 `127.0.0.1:0`，管理器由配置装配，经 TCP 握手与扇出。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use flare_cluster::{ClusterConfig, ClusterManager, DiscoveryConfig, NodeService};
use flare_core::{
    AllSucceed, BoxFuture, ClusterNode, Request, Response, RpcHandler, TagFilter, Tags,
};
use flare_transport_mem::MemoryHub;
use flare_transport_tcp::TcpRpcServer;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
    from: String,
}

/// 每个节点有自己的配置，`tags` 经配置进入握手元数据。
fn node_service(name: &'static str, shard: &str) -> NodeService {
    let config = ClusterConfig {
        tags: Tags::new().with("shard", shard),
        ..ClusterConfig::default()
    };
    let echo: Arc<dyn RpcHandler> = Arc::new(
        move |_: Request| -> BoxFuture<'static, flare_core::Result<Response>> {
            async move {
                Response::json(&Echo {
                    from: name.to_owned(),
                })
            }
            .boxed()
        },
    );
    config.node_service(name).route("echo", echo)
}

fn echo(_: &ClusterNode) -> flare_core::Result<Request> {
    Ok(Request::new("echo", Vec::<u8>::new()))
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_over_tcp() -> Result<()> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut servers = Vec::new();
    for (name, shard) in [("t1", "1"), ("t2", "2")] {
        servers.push(TcpRpcServer::bind(addr, Arc::new(node_service(name, shard))).await?);
    }

    let config = ClusterConfig {
        rpc_timeout_ms: 2_000,
        discovery: DiscoveryConfig::Static {
            nodes: servers.iter().map(TcpRpcServer::endpoint).collect(),
        },
        ..ClusterConfig::default()
    };
    config.validate()?;
    let manager = ClusterManager::new(
        config.build_transport(MemoryHub::new()),
        config.build_discovery(),
        config.cluster_options(),
    );
    assert_eq!(manager.options().rpc_timeout, Duration::from_secs(2));

    let report = manager.refresh().await?;
    assert_eq!(report.added.len(), 2);
    assert!(report.is_clean());

    let shard2 = manager.get_nodes(&TagFilter::equals("shard", "2"));
    assert_eq!(shard2.len(), 1);
    assert_eq!(shard2[0].id().as_str(), "t2");

    let mut senders: Vec<String> = manager
        .fan_out::<Echo, _, _>(&TagFilter::all(), echo, AllSucceed::collect())
        .await?
        .into_iter()
        .map(|echo| echo.from)
        .collect();
    senders.sort();
    assert_eq!(senders, ["t1", "t2"]);

    // 关停一个节点后，下一轮刷新将其剔除。
    let gone = servers.pop().map(|server| {
        let endpoint = server.endpoint();
        (endpoint, server)
    });
    if let Some((endpoint, server)) = gone {
        server.shutdown().await;
        let report = manager.refresh().await?;
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].endpoint, endpoint);
        assert!(!manager.state().contains(&endpoint));
        assert_eq!(manager.state().len(), 1);
    }

    manager.stop().await;
    for server in servers {
        server.shutdown().await;
    }
    Ok(())
}
