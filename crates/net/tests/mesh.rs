//! End-to-end mesh-formation and replication scenarios
//! (`spec.md` §8 scenarios 2, 4, 6).
//!
//! Every node in these tests shares one self-signed certificate, used both
//! as the mutual-TLS trust root and as each node's own identity — the
//! simplest shape that exercises `rustls::WebPkiClientVerifier` end to end
//! without standing up a real certificate hierarchy. The SAN must match the
//! fixed server name `connect_to` verifies against (`"trinity-peer"`, see
//! `crates/net/src/server.rs`).

use rcgen::generate_simple_self_signed;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trinity_core::{KvStore, NetworkNode, Ring};
use trinity_net::{tls, ClusterServer};

struct SharedCert {
    path: std::path::PathBuf,
    _dir: TempDir,
}

fn shared_cert() -> SharedCert {
    let cert = generate_simple_self_signed(vec!["trinity-peer".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.pem");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(cert.cert.pem().as_bytes()).unwrap();
    file.write_all(cert.key_pair.serialize_pem().as_bytes()).unwrap();
    SharedCert { path, _dir: dir }
}

async fn build_server(cert: &SharedCert, host_addr: &str) -> Arc<ClusterServer> {
    let ca_server = tls::load_ca_pool(&cert.path).unwrap();
    let ca_client = tls::load_ca_pool(&cert.path).unwrap();
    let (chain_s, key_s) = tls::load_cert_chain(&cert.path, &cert.path).unwrap();
    let (chain_c, key_c) = tls::load_cert_chain(&cert.path, &cert.path).unwrap();

    let server_tls = tls::server_config(ca_server, chain_s, key_s).unwrap();
    let client_tls = tls::client_config(ca_client, chain_c, key_c).unwrap();

    let local_node = NetworkNode::new(host_addr.to_string());
    let ring = Arc::new(Ring::new());
    let kv = Arc::new(KvStore::new());
    kv.start();

    ClusterServer::new(local_node, ring, kv, server_tls, client_tls, false).unwrap()
}

async fn wait_until<F: Fn() -> bool>(pred: F, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if pred() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn two_node_mesh_forms_and_replicates() {
    let cert = shared_cert();
    let addr_a: SocketAddr = "127.0.0.1:19531".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:19532".parse().unwrap();

    let a = build_server(&cert, "127.0.0.1:19531").await;
    let b = build_server(&cert, "127.0.0.1:19532").await;

    {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.listen(addr_a).await.unwrap() });
    }
    {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.listen(addr_b).await.unwrap() });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    b.connect_to("127.0.0.1:19531").await.unwrap();

    let formed = wait_until(
        || a.ring.node_count() == 2 && b.ring.node_count() == 2,
        Duration::from_secs(3),
    )
    .await;
    assert!(formed, "mesh did not converge to a 2-node ring");

    b.set("k", b"abc".to_vec(), 0, None).await;

    let start = tokio::time::Instant::now();
    let mut seen = None;
    while start.elapsed() < Duration::from_secs(2) {
        if let Some(v) = a.get("k").await {
            seen = Some(v);
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let (data, flags) = seen.expect("key set on B never became visible from A");
    assert_eq!(data, b"abc");
    assert_eq!(flags, 0);

    a.stop();
    b.stop();
}

#[tokio::test]
async fn self_loop_is_refused() {
    let cert = shared_cert();
    let addr_a: SocketAddr = "127.0.0.1:19541".parse().unwrap();
    let a = build_server(&cert, "127.0.0.1:19541").await;

    {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.listen(addr_a).await.unwrap() });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Dialling our own advertised address is refused up front.
    let result = a.connect_to("127.0.0.1:19541").await;
    assert!(result.is_err());
    assert_eq!(a.ring.node_count(), 1);

    a.stop();
}

#[tokio::test]
async fn gossip_converges_three_nodes() {
    let cert = shared_cert();
    let addr_a: SocketAddr = "127.0.0.1:19551".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:19552".parse().unwrap();
    let addr_c: SocketAddr = "127.0.0.1:19553".parse().unwrap();

    let a = build_server(&cert, "127.0.0.1:19551").await;
    let b = build_server(&cert, "127.0.0.1:19552").await;
    let c = build_server(&cert, "127.0.0.1:19553").await;

    for (srv, addr) in [(&a, addr_a), (&b, addr_b), (&c, addr_c)] {
        let srv = Arc::clone(srv);
        tokio::spawn(async move { srv.listen(addr).await.unwrap() });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    b.connect_to("127.0.0.1:19551").await.unwrap();
    c.connect_to("127.0.0.1:19551").await.unwrap();

    let converged = wait_until(
        || a.ring.node_count() == 3 && b.ring.node_count() == 3 && c.ring.node_count() == 3,
        Duration::from_secs(5),
    )
    .await;
    assert!(converged, "three-node mesh did not converge");

    a.stop();
    b.stop();
    c.stop();
}
