use std::{
    collections::HashSet,
    sync::Arc,
    time::Instant,
};

use log::{debug, error, info, warn};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use worker::{SavePolicy, Worker, WorkerState};

use crate::{
    command::Command,
    config::SwarmConfig,
    error::{Result, SwarmErr},
    swarm::Swarm,
    sync::Synchronizer,
};

/// Whether the control loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Drives averaging cycles over a swarm and reacts to operator commands.
pub struct ControlLoop {
    swarm: Arc<Swarm>,
    config: Arc<SwarmConfig>,
    sync: Synchronizer,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    rng: StdRng,
    order: Vec<usize>,
    round: u64,
    last_autosave: Instant,
}

impl ControlLoop {
    /// Creates a new `ControlLoop`.
    ///
    /// # Arguments
    /// * `swarm` - The swarm to drive.
    /// * `config` - The averaging settings.
    /// * `commands` - The receiving end of the command channel.
    pub fn new(
        swarm: Arc<Swarm>,
        config: Arc<SwarmConfig>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            sync: Synchronizer::from_config(&config),
            swarm,
            config,
            commands,
            cancel: CancellationToken::new(),
            rng,
            order: Vec::new(),
            round: 0,
            last_autosave: Instant::now(),
        }
    }

    /// The amount of completed cycles.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Admits the configured targets and runs until a `Quit` command arrives.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_inner().await;

        self.cancel.cancel();
        if self.config.save_on_quit {
            self.save(SavePolicy::MostStable).await;
        }
        self.swarm.stop_all();

        info!("swarm stopped after {} rounds", self.round);
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.startup().await;
        let readmission = self.spawn_readmission();

        let result = loop {
            match self.iteration().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.cancel.cancel();
        if let Err(e) = readmission.await {
            warn!("readmission task failed: {e}");
        }

        result
    }

    /// Admits the configured targets; workers present at startup start out non-fresh.
    pub async fn startup(&mut self) {
        self.swarm.admit_all(&self.config.targets).await;

        let workers = self.swarm.live_workers();
        for worker in &workers {
            worker.clear_fresh();
        }
        info!("{} workers alive at startup", workers.len());

        if self.config.averaging && self.swarm.worker_config().fresh_model && workers.len() > 1 {
            info!("synchronizing fresh workers");
            if let Err(e) = self.full_sync(&workers).await {
                error!("initial synchronization failed: {e}");
            }
        }
    }

    /// Averages every chunk once, in index order.
    async fn full_sync(&self, workers: &[Arc<Worker>]) -> Result<()> {
        let chunks = workers.first().map_or(0, |w| w.num_chunks());
        for chunk in 0..chunks {
            self.sync.sync_chunk(chunk, workers).await?;
        }

        Ok(())
    }

    fn spawn_readmission(&self) -> JoinHandle<()> {
        let swarm = Arc::clone(&self.swarm);
        let targets = self.config.targets.clone();
        let interval = self.config.readmit_interval();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(interval) => {
                        swarm.admit_all(&targets).await;
                    }
                }
            }
        })
    }

    /// Runs one control loop iteration: commands, then a full cycle if there's anyone to
    /// average.
    pub async fn iteration(&mut self) -> Result<Flow> {
        if self.poll_commands().await == Flow::Quit {
            return Ok(Flow::Quit);
        }

        self.autosave().await;

        let workers = self.swarm.live_workers();
        if workers.is_empty() || !self.config.averaging {
            time::sleep(self.config.idle()).await;
            return Ok(Flow::Continue);
        }

        self.run_cycle().await
    }

    /// Averages every chunk once, in cycle order.
    ///
    /// Commands and liveness are checked between chunks. Workers that were alive for the
    /// whole cycle stop being fresh, unless a chunk had no reporters.
    pub async fn run_cycle(&mut self) -> Result<Flow> {
        let participants = self.swarm.live_workers();
        let Some(first) = participants.first() else {
            return Ok(Flow::Continue);
        };

        self.reorder(first.num_chunks());
        for worker in &participants {
            worker.probe();
        }

        let start = Instant::now();
        let mut complete = true;

        for chunk in self.order.clone() {
            if self.poll_commands().await == Flow::Quit {
                return Ok(Flow::Quit);
            }

            let workers = self.swarm.live_workers();
            if workers.is_empty() {
                warn!("every worker died mid cycle");
                return Ok(Flow::Continue);
            }

            match self.sync.sync_chunk(chunk, &workers).await {
                Ok(report) => debug!("chunk {chunk}: {report:?}"),
                Err(e @ SwarmErr::ZeroReporters { .. }) => {
                    error!("{e}");
                    complete = false;
                }
                Err(e) => return Err(e),
            }

            time::sleep(self.config.averaging_yield()).await;
        }

        if complete {
            let alive: HashSet<_> = self
                .swarm
                .live_workers()
                .iter()
                .map(|w| Arc::as_ptr(w))
                .collect();

            for worker in participants.iter().filter(|w| alive.contains(&Arc::as_ptr(w))) {
                if worker.clear_fresh() {
                    info!(device = worker.target(); "no longer fresh");
                }
            }
        }

        self.round += 1;
        info!(
            "All done {} ({} chunks in {:.3}s)",
            self.round,
            self.order.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(Flow::Continue)
    }

    fn reorder(&mut self, chunks: usize) {
        if self.order.len() != chunks {
            self.order = (0..chunks).collect();
            self.order.shuffle(&mut self.rng);
        } else if self.config.shuffle_cycles {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Handles every queued command.
    pub async fn poll_commands(&mut self) -> Flow {
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Flow::Continue,
            };

            info!("command: {command:?}");
            match command {
                Command::Save => {
                    self.save(SavePolicy::MostStable).await;
                }
                Command::SaveLowestLoss => {
                    self.save(SavePolicy::LowestLoss).await;
                }
                Command::PrintTrainers => self.print_trainers(),
                Command::Quit => return Flow::Quit,
            }
        }
    }

    async fn save(&self, policy: SavePolicy) -> Option<Arc<Worker>> {
        let workers = self.swarm.live_workers();
        let saved = self.swarm.checkpoints().save_best(&workers, policy).await;

        if saved.is_none() {
            warn!("no worker could be saved");
        }

        saved
    }

    async fn autosave(&mut self) {
        let Some(interval) = self.config.autosave_interval() else {
            return;
        };

        if self.last_autosave.elapsed() >= interval {
            self.last_autosave = Instant::now();
            info!("autosaving");
            self.save(SavePolicy::LowestLoss).await;
        }
    }

    /// Logs the live workers, highest running loss first.
    pub fn print_trainers(&self) {
        let mut statuses: Vec<_> = self
            .swarm
            .live_workers()
            .iter()
            .map(|w| w.status())
            .collect();
        statuses.sort_by(|a, b| b.loss.total_cmp(&a.loss));

        for s in &statuses {
            info!(
                device = s.target.as_str();
                "start={} paused={} fresh={} alive={} elapsed={:.2} loss={:.4} perp={:.4} ticks={:.2}",
                s.started_at,
                s.state == WorkerState::Paused,
                s.state.is_fresh(),
                s.state.is_alive(),
                s.elapsed.as_secs_f64(),
                s.loss,
                s.perplexity,
                s.ticks,
            );
        }

        let trainers = statuses.iter().filter(|s| !s.state.is_fresh()).count();
        info!("{trainers} trainers, {} starting", self.swarm.starting());
    }
}
