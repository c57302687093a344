//! End-to-end scenarios exercised against the in-memory reference store —
//! no real coordination ensemble required.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rf_contrib_registry::entities::{strategy, Instance};
use rf_contrib_registry::recipe::Recipe;
use rf_contrib_registry::store::{CreateMode, MemoryStore, StoreClient};
use rf_contrib_registry::subscriber::Subscriber;
use rf_contrib_registry::Frame;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn frame_over(store: &Arc<MemoryStore>) -> Frame {
    let (client, events) = store.open_session();
    Frame::new(Arc::new(client), events, "y").unwrap()
}

#[test]
fn scenario_1_register_materializes_full_layout() {
    init_logging();
    let store = MemoryStore::new();
    let publisher = frame_over(&store);
    let mut props = BTreeMap::new();
    props.insert("x".to_string(), "y".to_string());
    publisher.register("a", "b", "10.0.0.1:7", props, false).unwrap();

    let (check, _rx) = store.open_session();
    assert_eq!(check.get("/a", false).unwrap(), "1");
    assert_eq!(check.get("/a/b", false).unwrap(), "1");
    assert_eq!(check.get("/a/b/10.0.0.1:7", false).unwrap(), "1");
    assert_eq!(check.get("/a/b/10.0.0.1:7/active", false).unwrap(), "1");
    assert_eq!(check.get("/a/b/10.0.0.1:7/x", false).unwrap(), "y");
    assert_eq!(check.get("/a/b/10.0.0.1:7/weight", false).unwrap(), "50");
    assert_eq!(check.get("/a/b/10.0.0.1:7/priority", false).unwrap(), "50");
}

#[test]
fn scenario_2_subscribe_then_pick_finds_registered_instance() {
    init_logging();
    let store = MemoryStore::new();
    let publisher = frame_over(&store);
    publisher.register("a", "b", "10.0.0.1:7", BTreeMap::new(), false).unwrap();

    let consumer = frame_over(&store);
    consumer.subscribe_service("a", "b", strategy::DEFAULT, true).unwrap();
    let picked = consumer.pick("a", "b", None).unwrap();
    assert_eq!(picked.host, "10.0.0.1");
    assert_eq!(picked.port, 7);
}

#[test]
fn scenario_3_weighted_pick_never_returns_lower_priority_tier() {
    init_logging();
    let store = MemoryStore::new();
    let publisher = frame_over(&store);

    let mut a = BTreeMap::new();
    a.insert("priority".to_string(), "80".to_string());
    a.insert("weight".to_string(), "50".to_string());
    publisher.register("a", "b", "10.0.0.1:7", a, false).unwrap();

    let mut b = BTreeMap::new();
    b.insert("priority".to_string(), "50".to_string());
    b.insert("weight".to_string(), "50".to_string());
    publisher.register("a", "b", "10.0.0.2:7", b, false).unwrap();

    let consumer = frame_over(&store);
    consumer.subscribe_service("a", "b", strategy::DEFAULT, true).unwrap();

    for _ in 0..10_000 {
        let picked = consumer.pick("a", "b", Some(strategy::WEIGHTED | strategy::IDC)).unwrap();
        assert_eq!(picked.node, "10.0.0.1:7");
    }
}

#[test]
fn scenario_4_idc_round_robin_alternates_within_local_idc_only() {
    init_logging();
    let store = MemoryStore::new();
    let publisher = frame_over(&store);

    let mut a = BTreeMap::new();
    a.insert("idc".to_string(), "x".to_string());
    publisher.register("a", "b", "10.0.0.1:7", a, false).unwrap();

    let mut inst_b = BTreeMap::new();
    inst_b.insert("idc".to_string(), "y".to_string());
    publisher.register("a", "b", "10.0.0.2:7", inst_b.clone(), false).unwrap();
    publisher.register("a", "b", "10.0.0.3:7", inst_b, false).unwrap();

    let consumer = frame_over(&store);
    consumer.subscribe_service("a", "b", strategy::DEFAULT, true).unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..10 {
        let picked = consumer.pick("a", "b", Some(strategy::IDC | strategy::ROUND_ROBIN)).unwrap();
        assert_ne!(picked.node, "10.0.0.1:7");
        seen.insert(picked.node);
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn scenario_5_master_strategy_returns_the_lock_holder_instance() {
    init_logging();
    let store = MemoryStore::new();
    let (writer, _rx) = store.open_session();

    let instance = Instance::new("a", "b", "1.2.3.4:7", BTreeMap::new()).unwrap();
    for (path, value) in instance.to_path_pairs() {
        writer.create_if_absent(&path, &value, CreateMode::Persistent).unwrap();
    }
    writer.create("/a/b/1.2.3.4:7/active", "1", CreateMode::Ephemeral).unwrap();
    writer.create("/a/b/1.2.3.4:7/pid", "99", CreateMode::Ephemeral).unwrap();
    writer.create("/a/b/lock_master", "1.2.3.4-99", CreateMode::Ephemeral).unwrap();

    let consumer = frame_over(&store);
    consumer.subscribe_service("a", "b", strategy::DEFAULT, true).unwrap();
    let picked = consumer.pick("a", "b", Some(strategy::MASTER)).unwrap();
    assert_eq!(picked.node, "1.2.3.4:7");
}

#[test]
fn scenario_6_non_blocking_try_lock_fails_while_another_holds_it() {
    init_logging();
    let store = MemoryStore::new();
    let p1 = frame_over(&store);
    let p2 = frame_over(&store);

    assert!(p1.try_lock("a", "b", "master", 0).unwrap());
    assert!(!p2.try_lock("a", "b", "master", 0).unwrap());
    assert!(!p2.lock_owner("a", "b", "master").unwrap());
}

#[test]
fn scenario_7_blocking_lock_acquires_after_incumbent_session_drops() {
    init_logging();
    let store = MemoryStore::new();

    let (p1_client, _p1_rx) = store.open_session();
    let p1_client = Arc::new(p1_client);
    let p1_trait: Arc<dyn StoreClient> = p1_client.clone();
    let p1_subscriber = Arc::new(Subscriber::new(p1_trait.clone()));
    let p1_recipe = Recipe::new(p1_trait, p1_subscriber);
    assert!(p1_recipe.try_lock("a", "b", "master", "1.1.1.1-1", 0).unwrap());

    let (p2_client, _p2_rx) = store.open_session();
    let p2_trait: Arc<dyn StoreClient> = Arc::new(p2_client);
    let p2_subscriber = Arc::new(Subscriber::new(p2_trait.clone()));
    let p2_recipe = Arc::new(Recipe::new(p2_trait, p2_subscriber));

    let waiter = {
        let p2_recipe = p2_recipe.clone();
        thread::spawn(move || p2_recipe.lock("a", "b", "master", "2.2.2.2-2").unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    // Simulates P1's session timing out: its ephemeral lock node vanishes,
    // exactly as a real ensemble would do on connection loss.
    p1_client.close_session();

    let acquired = waiter.join().unwrap();
    assert!(acquired);
    assert!(p2_recipe.owner("a", "b", "master", "2.2.2.2-2").unwrap());
}
