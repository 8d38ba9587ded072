mod config;

use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use anyhow::{Context, Result};
use log::{debug, info};
use machine_learning::{BigramFactory, Sampler, TextSampler};
use swarm::{Command, ControlLoop, Swarm};
use tokio::{signal, sync::mpsc};
use worker::{
    CheckpointManager, JsonStore, SamplerFactory, StepCounter, WorkerBuilder,
    checkpoint::read_counter,
};

use crate::config::NodeConfig;

const COMMAND_BUFFER: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = config::path();
    let config = NodeConfig::load(&path)?;
    info!("loaded {}", path.display());

    let worker_config = Arc::new(config.worker);
    let store = Arc::new(JsonStore::new(worker_config.max_to_keep));
    let checkpoints = Arc::new(CheckpointManager::new(store, &worker_config));

    let last_saved = read_counter(checkpoints.run_dir()).context("failed to read the step counter")?;
    let counter = Arc::new(StepCounter::resume(last_saved));
    info!("starting at step {}", counter.get());

    let engines = Arc::new(BigramFactory::new("model", config.model));
    let samplers = samplers(config.dataset, config.swarm.seed);

    let builder = WorkerBuilder::new(
        Arc::clone(&worker_config),
        engines,
        samplers,
        counter,
        checkpoints,
    )
    .context("failed to load the dataset")?;

    let swarm = Swarm::new(builder, &config.swarm);
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    let stdin_tx = tx.clone();
    thread::spawn(move || swarm::read_commands(io::stdin().lock(), stdin_tx));

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C");
            if tx.send(Command::Quit).await.is_err() {
                debug!("control loop already gone, dropping quit");
            }
        }
    });

    ControlLoop::new(swarm, Arc::new(config.swarm), rx)
        .run()
        .await
        .context("control loop failed")
}

/// Builds a sampler over `dataset` per call, each seeded differently when `seed` is set.
fn samplers(dataset: PathBuf, seed: Option<u64>) -> SamplerFactory {
    let next = AtomicU64::new(0);

    Arc::new(move || -> io::Result<Arc<dyn Sampler>> {
        let seed = seed.map(|s| s.wrapping_add(next.fetch_add(1, Ordering::Relaxed)));
        Ok(Arc::new(TextSampler::from_path(&dataset, seed)?))
    })
}
