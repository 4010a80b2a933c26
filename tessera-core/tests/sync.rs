use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proptest::prelude::*;

use tessera_core::auth::Keypair;
use tessera_core::config::{PipelineConfig, SyncConfig};
use tessera_core::directory::Directory;
use tessera_core::encode::Encoder;
use tessera_core::error::{Error, Result};
use tessera_core::manifest::{ErasureConfig, FileManifest};
use tessera_core::payload::ActiveNodeRecord;
use tessera_core::store::{KvStore, MemStore, BUCKET_MANIFESTS, BUCKET_NODES};
use tessera_core::sync::{SignedSnapshot, SnapshotExchange, SyncEngine};
use tessera_core::timelock::{Clock, LocalBeacon, ManualClock};

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn make_manifest(seed: u64) -> FileManifest {
    let clock = Arc::new(ManualClock::new(ts("2026-01-15T00:00:00Z")));
    let beacon = Arc::new(LocalBeacon::default_chain(clock as Arc<dyn Clock>));
    let cfg = PipelineConfig {
        erasure: ErasureConfig { data_shards: 3, parity_shards: 2 },
        target_chunk_size: 1024,
        chunks_tolerance: 2,
    };
    let data: Vec<u8> = (0..5000u64).map(|i| (i.wrapping_mul(seed) >> 3) as u8).collect();
    let nodes = vec!["node-a.onion:80".to_string(), "node-b.onion:80".to_string()];
    Encoder::new(cfg, beacon)
        .unwrap()
        .encode(&data[..], &format!("file-{seed}.bin"), "2026-01-01T00:00:00Z", &nodes)
        .unwrap()
        .manifest
}

struct Node {
    directory: Directory,
    engine: Arc<SyncEngine>,
    store: Arc<MemStore>,
}

/// Routes a snapshot straight into the peer engine's responder path.
#[derive(Default)]
struct Loopback {
    peers: RwLock<HashMap<String, Arc<SyncEngine>>>,
}

#[async_trait]
impl SnapshotExchange for Loopback {
    async fn exchange(&self, peer: &str, snapshot: SignedSnapshot) -> Result<SignedSnapshot> {
        let engine = {
            let peers = self.peers.read().map_err(|_| Error::Unauthenticated)?;
            peers.get(peer).cloned()
        };
        match engine {
            Some(engine) => engine.handle_snapshot(snapshot),
            None => Err(Error::StoreUnavailable(format!("no route to {peer}"))),
        }
    }
}

fn make_node(address: &str, peers: &[&str], transport: Arc<Loopback>) -> Node {
    let store = Arc::new(MemStore::new());
    let directory = Directory::new(store.clone());
    let cfg = SyncConfig {
        address: address.to_string(),
        peers: peers.iter().map(|p| p.to_string()).collect(),
        base_period: Duration::from_millis(10),
    };
    let engine = Arc::new(SyncEngine::new(
        cfg,
        directory.clone(),
        Keypair::generate(),
        transport.clone(),
    ));
    transport.peers.write().unwrap().insert(address.to_string(), engine.clone());
    Node { directory, engine, store }
}

fn table(store: &MemStore, bucket: &str) -> BTreeMap<String, Vec<u8>> {
    store.list_all(bucket).unwrap()
}

#[tokio::test]
async fn one_round_converges_both_sides() {
    let transport = Arc::new(Loopback::default());
    let a = make_node("a.onion:3000", &["a.onion:3000", "b.onion:3000"], transport.clone());
    let b = make_node("b.onion:3000", &["a.onion:3000", "b.onion:3000"], transport.clone());

    a.directory.subscribe("n1.onion:80", b"pk1", ts("2026-01-10T00:00:00Z")).unwrap();
    b.directory.subscribe("n2.onion:80", b"pk2", ts("2026-01-11T00:00:00Z")).unwrap();
    a.directory.insert_manifest(&make_manifest(1)).unwrap();
    b.directory.insert_manifest(&make_manifest(2)).unwrap();

    a.engine.run_once(&mut rand::rngs::OsRng).await.unwrap();

    assert_eq!(table(&a.store, BUCKET_NODES), table(&b.store, BUCKET_NODES));
    assert_eq!(table(&a.store, BUCKET_MANIFESTS), table(&b.store, BUCKET_MANIFESTS));
    assert_eq!(a.directory.active_addresses().unwrap().len(), 2);
    assert_eq!(a.directory.manifests().unwrap().len(), 2);
}

#[tokio::test]
async fn merge_is_idempotent() {
    let transport = Arc::new(Loopback::default());
    let a = make_node("a.onion:3000", &["b.onion:3000"], transport.clone());
    let b = make_node("b.onion:3000", &["a.onion:3000"], transport.clone());

    b.directory.subscribe("n1.onion:80", b"pk1", ts("2026-01-10T00:00:00Z")).unwrap();
    b.directory.insert_manifest(&make_manifest(3)).unwrap();

    let snapshot = b.engine.snapshot().unwrap();
    a.engine.handle_snapshot(snapshot.clone()).unwrap();
    let after_once = (table(&a.store, BUCKET_NODES), table(&a.store, BUCKET_MANIFESTS));
    a.engine.handle_snapshot(snapshot).unwrap();
    let after_twice = (table(&a.store, BUCKET_NODES), table(&a.store, BUCKET_MANIFESTS));
    assert_eq!(after_once, after_twice);
}

#[tokio::test]
async fn merge_is_commutative() {
    let transport = Arc::new(Loopback::default());
    let one = make_node("s1.onion:3000", &[], transport.clone());
    let two = make_node("s2.onion:3000", &[], transport.clone());

    one.directory.subscribe("shared.onion:80", b"old-key", ts("2026-01-05T00:00:00Z")).unwrap();
    two.directory.subscribe("shared.onion:80", b"new-key", ts("2026-01-09T00:00:00Z")).unwrap();
    one.directory.subscribe("only-one.onion:80", b"k1", ts("2026-01-06T00:00:00Z")).unwrap();
    two.directory.insert_manifest(&make_manifest(4)).unwrap();

    let snap_one = one.engine.snapshot().unwrap().snapshot;
    let snap_two = two.engine.snapshot().unwrap().snapshot;

    // Fresh targets, applied in opposite orders.
    let x = make_node("x.onion:3000", &[], transport.clone());
    let y = make_node("y.onion:3000", &[], transport.clone());
    x.engine.merge(&snap_one).unwrap();
    x.engine.merge(&snap_two).unwrap();
    y.engine.merge(&snap_two).unwrap();
    y.engine.merge(&snap_one).unwrap();

    assert_eq!(table(&x.store, BUCKET_NODES), table(&y.store, BUCKET_NODES));
    assert_eq!(table(&x.store, BUCKET_MANIFESTS), table(&y.store, BUCKET_MANIFESTS));

    // The shared address resolved to the later registration either way.
    let winner: ActiveNodeRecord = serde_json::from_slice(
        &x.store.get(BUCKET_NODES, "shared.onion:80").unwrap().unwrap(),
    )
    .unwrap();
    assert_eq!(winner.public_key, b"new-key");
}

#[tokio::test]
async fn manifest_catalog_is_add_only() {
    let transport = Arc::new(Loopback::default());
    let a = make_node("a.onion:3000", &[], transport.clone());

    let manifest = make_manifest(5);
    a.directory.insert_manifest(&manifest).unwrap();
    let stored_before = a.store.get(BUCKET_MANIFESTS, &manifest.file_id).unwrap().unwrap();

    // An incoming manifest reusing the id must be discarded.
    let mut imposter = make_manifest(6);
    imposter.file_id = manifest.file_id.clone();
    a.directory.insert_manifest(&imposter).unwrap();

    let stored_after = a.store.get(BUCKET_MANIFESTS, &manifest.file_id).unwrap().unwrap();
    assert_eq!(stored_before, stored_after);
}

#[tokio::test]
async fn tampered_snapshot_is_rejected() {
    let transport = Arc::new(Loopback::default());
    let a = make_node("a.onion:3000", &[], transport.clone());
    let b = make_node("b.onion:3000", &[], transport.clone());

    b.directory.subscribe("n1.onion:80", b"pk1", ts("2026-01-10T00:00:00Z")).unwrap();
    let mut snapshot = b.engine.snapshot().unwrap();
    snapshot.snapshot.address = "mallory.onion:3000".to_string();

    let err = a.engine.handle_snapshot(snapshot).unwrap_err();
    assert!(matches!(err, Error::Unauthenticated), "got {err}");
    assert!(a.directory.active_addresses().unwrap().is_empty());
}

#[tokio::test]
async fn background_loop_converges_and_shuts_down() {
    let transport = Arc::new(Loopback::default());
    let peers = ["a.onion:3000", "b.onion:3000"];
    let a = make_node(peers[0], &peers, transport.clone());
    let b = make_node(peers[1], &peers, transport.clone());

    a.directory.insert_manifest(&make_manifest(7)).unwrap();
    b.directory.insert_manifest(&make_manifest(8)).unwrap();

    let ha = a.engine.clone().spawn();
    let hb = b.engine.clone().spawn();
    tokio::time::sleep(Duration::from_millis(200)).await;
    ha.stop().await;
    hb.stop().await;

    assert_eq!(table(&a.store, BUCKET_MANIFESTS), table(&b.store, BUCKET_MANIFESTS));
    assert_eq!(a.directory.manifests().unwrap().len(), 2);
}

#[tokio::test]
async fn dropped_handle_stops_the_loop() {
    let transport = Arc::new(Loopback::default());
    let a = make_node("a.onion:3000", &["b.onion:3000"], transport.clone());

    // Dropping the handle without stop() closes the shutdown channel; the
    // loop must exit (releasing its engine clone) instead of spinning.
    drop(a.engine.clone().spawn());
    for _ in 0..100 {
        // transport registry holds one clone, this test holds another
        if Arc::strong_count(&a.engine) == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background loop kept running after its handle was dropped");
}

proptest! {
    // LWW registry merge ends at the max timestamp per address no matter
    // how the records are interleaved or repeated.
    #[test]
    fn registry_merge_order_independent(
        stamps in proptest::collection::vec((0u8..4, 1i64..1_000_000), 1..24)
    ) {
        let store_fwd = Arc::new(MemStore::new());
        let store_rev = Arc::new(MemStore::new());
        let fwd = Directory::new(store_fwd.clone());
        let rev = Directory::new(store_rev.clone());

        let records: Vec<(String, ActiveNodeRecord)> = stamps
            .iter()
            .map(|(node, at)| {
                (
                    format!("n{node}.onion:80"),
                    ActiveNodeRecord { public_key: at.to_le_bytes().to_vec(), last_seen: *at },
                )
            })
            .collect();

        for (address, record) in &records {
            fwd.merge_node(address, record).unwrap();
        }
        for (address, record) in records.iter().rev() {
            rev.merge_node(address, record).unwrap();
        }

        let left = store_fwd.list_all(BUCKET_NODES).unwrap();
        let right = store_rev.list_all(BUCKET_NODES).unwrap();
        prop_assert_eq!(&left, &right);

        for (address, record) in &records {
            let winner: ActiveNodeRecord =
                serde_json::from_slice(&left[address]).unwrap();
            prop_assert!(winner.last_seen >= record.last_seen);
        }
    }
}
