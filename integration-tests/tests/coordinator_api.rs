use std::io::Write;
use std::time::Duration;

use crate::common::{
    find_free_port, CoordinatorProcess, DistributionRecord, ListNodesResponse,
    NetworkStats, RunningNodesResponse,
};

#[tokio::test]
async fn test_health() {
    let coordinator = CoordinatorProcess::start().await;

    let resp = reqwest::get(&format!("{}/health", coordinator.url()))
        .await
        .expect("Failed to call health")
        .json::<serde_json::Value>()
        .await
        .expect("Failed to parse response");

    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn test_start_register_upload_stop() {
    let coordinator = CoordinatorProcess::start().await;
    let client = reqwest::Client::new();
    let base = coordinator.url();
    let node_port = find_free_port();

    let resp = client
        .post(format!("{}/api/network/nodes/start", base))
        .json(&serde_json::json!({ "node_id": "node1", "port": node_port, "storage_gb": 1, "ram_gb": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "{}", resp.text().await.unwrap_or_default());

    let running = client
        .get(format!("{}/api/network/nodes/running", base))
        .send()
        .await
        .unwrap()
        .json::<RunningNodesResponse>()
        .await
        .unwrap();
    assert_eq!(running.count, 1);
    assert_eq!(running.running_nodes, vec!["node1".to_string()]);

    // Starting the same id again is a conflict
    let resp = client
        .post(format!("{}/api/network/nodes/start", base))
        .json(&serde_json::json!({ "node_id": "node1", "port": find_free_port() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("{}/api/network/nodes/register", base))
        .json(&serde_json::json!({ "node_id": "node1", "host": "127.0.0.1", "port": node_port }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let nodes = client
        .get(format!("{}/api/network/nodes", base))
        .send()
        .await
        .unwrap()
        .json::<ListNodesResponse>()
        .await
        .unwrap();
    assert_eq!(nodes.nodes.len(), 1);
    assert_eq!(nodes.nodes[0].node_id, "node1");
    assert_eq!(nodes.nodes[0].port, node_port);

    let payload = vec![42u8; 3 * 1024 * 1024];
    let record = client
        .post(format!("{}/api/network/files/video.mp4?chunk_size_mb=1", base))
        .body(payload.clone())
        .send()
        .await
        .unwrap()
        .json::<DistributionRecord>()
        .await
        .unwrap();
    assert_eq!(record.file_name, "video.mp4");
    assert_eq!(record.total_chunks, 3);
    assert_eq!(record.total_size_bytes, payload.len() as u64);
    assert_eq!(record.node_to_chunk_ids["node1"].len(), 3);

    let stats = client
        .get(format!("{}/api/network/status", base))
        .send()
        .await
        .unwrap()
        .json::<NetworkStats>()
        .await
        .unwrap();
    assert_eq!(stats.total_nodes, 1);
    assert_eq!(stats.total_storage_bytes, 1 << 30);
    assert_eq!(stats.used_storage_bytes, payload.len() as u64);
    assert_eq!(stats.total_chunks, 3);

    let resp = client
        .post(format!("{}/api/network/nodes/stop/node1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/network/nodes/stop/node1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{}/api/network/nodes/node1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_upload_without_nodes() {
    let coordinator = CoordinatorProcess::start().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/network/files/a.txt", coordinator.url()))
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn test_boot_nodes_from_config() {
    let node_port = find_free_port();
    let mut config = tempfile::NamedTempFile::new().unwrap();
    write!(
        config,
        r#"
default_chunk_size_mb = 1

[[nodes]]
node_id = "boot1"
port = {}
start = true
storage_gb = 1
"#,
        node_port
    )
    .unwrap();

    let mut coordinator = CoordinatorProcess::start_with_config(config.path()).await;
    let base = coordinator.url();

    let nodes = reqwest::get(&format!("{}/api/network/nodes", base))
        .await
        .unwrap()
        .json::<ListNodesResponse>()
        .await
        .unwrap();
    assert_eq!(nodes.nodes.len(), 1);
    assert_eq!(nodes.nodes[0].node_id, "boot1");

    let running = reqwest::get(&format!("{}/api/network/nodes/running", base))
        .await
        .unwrap()
        .json::<RunningNodesResponse>()
        .await
        .unwrap();
    assert_eq!(running.running_nodes, vec!["boot1".to_string()]);

    // Default chunk size from the config applies
    let record = reqwest::Client::new()
        .post(format!("{}/api/network/files/data.bin", base))
        .body(vec![1u8; 2 * 1024 * 1024])
        .send()
        .await
        .unwrap()
        .json::<DistributionRecord>()
        .await
        .unwrap();
    assert_eq!(record.total_chunks, 2);

    // SIGTERM stops the coordinator and the nodes it started
    let status = coordinator.terminate(Duration::from_secs(20));
    assert!(status.is_some(), "coordinator did not exit");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while tokio::net::TcpStream::connect(("127.0.0.1", node_port)).await.is_ok() {
        assert!(std::time::Instant::now() < deadline, "boot node still serving");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
