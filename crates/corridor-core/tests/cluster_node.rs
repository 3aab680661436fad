//! Single-node cluster-mode integration: bootstrap, slot allocation,
//! and a send through the replicated path.

use std::sync::Arc;
use std::time::Duration;

use corridor_commons::config::ClusterConfig;
use corridor_commons::models::ChannelKey;
use corridor_core::types::SendRequest;
use corridor_core::{CoreOptions, CorridorServer};
use corridor_store::MemoryBackend;

fn cluster_options(data_dir: std::path::PathBuf) -> CoreOptions {
    let mut opts = CoreOptions::standalone(data_dir);
    opts.api_url = "http://127.0.0.1:5001".to_string();
    opts.cluster = Some(ClusterConfig {
        on: true,
        peer_id: 1,
        addr: "127.0.0.1:21810".to_string(),
        grpc_addr: "127.0.0.1:21811".to_string(),
        slot_count: 4,
        replica_count: 1,
        peers: Vec::new(),
    });
    opts
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_peer_cluster_bootstraps_and_routes_sends() {
    let dir = tempfile::tempdir().unwrap();
    let server = CorridorServer::new(
        cluster_options(dir.path().to_path_buf()),
        Arc::new(MemoryBackend::new()),
    )
    .unwrap();
    server.start().await.unwrap();

    let ctx = server.context().clone();
    let cluster = ctx.cluster.as_ref().expect("cluster mode").clone();
    let manager = cluster.manager().clone();

    // Bootstrap: the sole peer elects itself, seeds the configuration,
    // allocates every slot to itself and starts the replicas.
    assert!(
        wait_until(Duration::from_secs(15), || manager.initialized()).await,
        "cluster configuration never initialised"
    );
    assert!(
        wait_until(Duration::from_secs(15), || {
            (0..4).all(|slot| manager.get_slot(slot).is_some())
        })
        .await,
        "slots never allocated"
    );
    assert!(
        wait_until(Duration::from_secs(15), || {
            (0..4).all(|slot| {
                manager
                    .get_leader_peer(slot)
                    .map(|p| p.peer_id == 1)
                    .unwrap_or(false)
            })
        })
        .await,
        "slot leaders never observed"
    );

    // The warm-start copy lands on disk.
    let config_path = dir.path().join("cluster").join("1").join("cluster.json");
    assert!(config_path.exists(), "cluster.json missing");

    // A send flows through propose → commit → apply → storage.
    let channel = ChannelKey::new("g1", 2);
    ctx.store
        .add_subscribers(&channel, &["u1".to_string()])
        .unwrap();
    let result = ctx
        .reactor
        .send(SendRequest {
            client_msg_no: String::new(),
            from_uid: "u1".to_string(),
            channel_id: "g1".to_string(),
            channel_type: 2,
            payload: b"hello".to_vec(),
            expire_at: 0,
        })
        .await
        .expect("send through the replicated path");
    assert_eq!(result.message_seq, 1);
    assert_eq!(ctx.store.get_last_msg_seq(&channel).unwrap(), 1);

    server.stop().await;
}
