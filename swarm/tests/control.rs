mod common;

use std::{sync::Arc, time::Duration};

use common::{MockFactory, SHAPES, new_swarm, swarm_config};
use swarm::{Command, ControlLoop, Flow};
use tokio::sync::mpsc;
use worker::{CheckpointStore, JsonStore, WorkerState};

#[tokio::test(flavor = "multi_thread")]
async fn full_cycle_clears_freshness() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());
    let (_tx, rx) = mpsc::channel(8);

    let a = swarm.admit("a").await.unwrap().unwrap();
    let b = swarm.admit("b").await.unwrap().unwrap();
    assert_eq!(b.state(), WorkerState::Fresh);

    factory.engine("a").set("p", vec![1., 2.]);
    factory.engine("a").set("q", vec![3., 4.]);

    let mut control = ControlLoop::new(Arc::clone(&swarm), Arc::new(swarm_config()), rx);
    assert_eq!(control.run_cycle().await.unwrap(), Flow::Continue);

    assert_eq!(control.round(), 1);
    assert_eq!(a.state(), WorkerState::Active);
    assert_eq!(b.state(), WorkerState::Active);
    assert_eq!(factory.engine("b").get("p"), vec![1., 2.]);
    assert_eq!(factory.engine("b").get("q"), vec![3., 4.]);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_leaves_paused_workers_paused() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());
    let (_tx, rx) = mpsc::channel(8);

    let a = swarm.admit("a").await.unwrap().unwrap();
    let b = swarm.admit("b").await.unwrap().unwrap();
    assert!(a.pause());

    let mut control = ControlLoop::new(Arc::clone(&swarm), Arc::new(swarm_config()), rx);
    assert_eq!(control.run_cycle().await.unwrap(), Flow::Continue);

    assert_eq!(a.state(), WorkerState::Paused);
    assert_eq!(b.state(), WorkerState::Active);
    assert!(!a.clear_fresh());
    assert_eq!(a.state(), WorkerState::Paused);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_chunk_keeps_workers_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());
    let (_tx, rx) = mpsc::channel(8);

    swarm.admit("a").await.unwrap().unwrap();
    let b = swarm.admit("b").await.unwrap().unwrap();
    factory.engine("a").set_read_delay(Duration::from_millis(500));

    let mut control = ControlLoop::new(Arc::clone(&swarm), Arc::new(swarm_config()), rx);
    assert_eq!(control.run_cycle().await.unwrap(), Flow::Continue);

    assert_eq!(b.state(), WorkerState::Fresh);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn quit_interrupts_a_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());
    let (tx, rx) = mpsc::channel(8);

    swarm.admit("a").await.unwrap().unwrap();
    let b = swarm.admit("b").await.unwrap().unwrap();

    let mut control = ControlLoop::new(Arc::clone(&swarm), Arc::new(swarm_config()), rx);
    tx.send(Command::Quit).await.unwrap();

    assert_eq!(control.run_cycle().await.unwrap(), Flow::Quit);
    assert_eq!(control.round(), 0);
    assert_eq!(b.state(), WorkerState::Fresh);

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn save_command_persists_a_worker() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &swarm_config());
    let (tx, rx) = mpsc::channel(8);

    swarm.admit("a").await.unwrap().unwrap();

    let mut control = ControlLoop::new(Arc::clone(&swarm), Arc::new(swarm_config()), rx);
    tx.send(Command::PrintTrainers).await.unwrap();
    tx.send(Command::Save).await.unwrap();
    assert_eq!(control.poll_commands().await, Flow::Continue);

    let run_dir = swarm.worker_config().run_dir();
    assert!(JsonStore::new(0).latest(&run_dir).unwrap().is_some());

    swarm.stop_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn run_admits_targets_and_saves_on_quit() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockFactory::new(SHAPES, 0.));
    let mut config = swarm_config();
    config.targets = vec!["a".into(), "b".into()];
    config.save_on_quit = true;
    let swarm = new_swarm(dir.path(), Arc::clone(&factory), &config);
    let (tx, rx) = mpsc::channel(8);

    let control = ControlLoop::new(Arc::clone(&swarm), Arc::new(config), rx);
    let handle = tokio::spawn(control.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(Command::Quit).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("control loop didn't quit")
        .unwrap()
        .unwrap();

    let workers = swarm.workers();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.state() == WorkerState::Dead));

    let run_dir = swarm.worker_config().run_dir();
    assert!(JsonStore::new(0).latest(&run_dir).unwrap().is_some());
}
