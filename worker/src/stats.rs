use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Decay applied to the running averages on every step.
pub const EMA_DECAY: f64 = 0.99;

/// An exponentially weighted average kept as a `(numerator, denominator)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ema {
    pub numerator: f64,
    pub denominator: f64,
}

impl Ema {
    pub fn update(&mut self, value: f64) {
        self.numerator = self.numerator * EMA_DECAY + value;
        self.denominator = self.denominator * EMA_DECAY + 1.;
    }

    /// The running value, `0` before the first update.
    pub fn value(&self) -> f64 {
        if self.denominator == 0. {
            return 0.;
        }

        self.numerator / self.denominator
    }
}

/// What a single step contributed to the statistics.
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    pub loss: f32,
    pub perplexity: f64,
    pub avg_loss: f64,
    pub avg_perplexity: f64,
    pub elapsed: Duration,
    pub delta: Duration,
}

/// Running loss and perplexity of a worker plus its timing.
#[derive(Debug, Clone)]
pub struct Stats {
    pub loss: Ema,
    pub perplexity: Ema,
    start: Instant,
    prev: Instant,
    started_at: SystemTime,
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();

        Self {
            loss: Ema::default(),
            perplexity: Ema::default(),
            start: now,
            prev: now,
            started_at: SystemTime::now(),
        }
    }

    /// Folds a new loss in and advances the step clock.
    pub fn record(&mut self, loss: f32) -> StepReport {
        let perplexity = (loss as f64).exp();
        self.loss.update(loss as f64);
        self.perplexity.update(perplexity);

        let now = Instant::now();
        let delta = now - self.prev;
        self.prev = now;

        StepReport {
            loss,
            perplexity,
            avg_loss: self.loss.value(),
            avg_perplexity: self.perplexity.value(),
            elapsed: now - self.start,
            delta,
        }
    }

    /// Time between the reset and the last recorded step.
    pub fn elapsed(&self) -> Duration {
        self.prev - self.start
    }

    /// Seconds since the unix epoch at the last reset.
    pub fn started_at(&self) -> u64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    /// Time since the last reset, regardless of steps.
    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
