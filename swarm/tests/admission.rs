mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use common::{MockFactory, SHAPES, new_swarm, swarm_config};
use futures::future;
use swarm::SwarmErr;
use worker::WorkerState;

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_admits_of_one_target_build_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.).with_connect_delay(Duration::from_millis(50)));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());

    let results = future::join_all((0..10).map(|_| swarm.admit("auto"))).await;

    let admitted = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Some(_))))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(swarm.live_workers().len(), 1);
    assert!(!swarm.is_pending("auto"));

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn admitting_a_live_target_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());

    assert!(swarm.admit("auto").await.unwrap().is_some());
    assert!(swarm.admit("auto").await.unwrap().is_none());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn construction_is_bounded_by_admission_permits() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.).with_connect_delay(Duration::from_millis(100)));
    let config = swarm_config();
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &config);

    let targets: Vec<String> = (0..9).map(|i| format!("gpu{i}")).collect();
    let admitted = swarm.admit_all(&targets).await;

    assert_eq!(admitted.len(), 9);
    assert_eq!(swarm.live_workers().len(), 9);
    let max = factory.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= config.admission_limit.get(), "{max} workers built at once");
    assert_eq!(swarm.starting(), 0);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_construction_is_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.).failing("broken"));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());

    let err = swarm.admit("broken").await.unwrap_err();
    assert!(matches!(err, SwarmErr::Worker(_)));
    assert!(swarm.workers().is_empty());
    assert!(!swarm.is_pending("broken"));

    // the target may be tried again
    assert!(swarm.admit("broken").await.is_err());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn only_the_first_worker_skips_freshness() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());

    let first = swarm.admit("a").await.unwrap().unwrap();
    let second = swarm.admit("b").await.unwrap().unwrap();

    assert_eq!(first.state(), WorkerState::Active);
    assert_eq!(second.state(), WorkerState::Fresh);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_target_can_be_readmitted() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());

    let old = swarm.admit("auto").await.unwrap().unwrap();
    factory.engine("auto").abort();
    assert!(!old.probe());
    assert!(swarm.live_workers().is_empty());

    let new = swarm.admit("auto").await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(old.state(), WorkerState::Dead);
    assert!(new.is_alive());
    assert_eq!(swarm.workers().len(), 1);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);

    swarm.stop_all();
}
