use std::collections::HashMap;

use log::warn;
use parking_lot::Mutex;

use crate::error::{Result, SwarmErr};

#[derive(Default)]
struct Sums {
    sealed: bool,
    vars: HashMap<String, (Vec<f32>, usize)>,
}

/// Running per-variable sums of one chunk's gather phase.
///
/// Once sealed, late contributions are discarded.
#[derive(Default)]
pub struct Accumulator {
    sums: Mutex<Sums>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one worker's values to the sums.
    ///
    /// # Arguments
    /// * `params` - The worker's `(name, value)` pairs.
    ///
    /// # Returns
    /// `false` if the accumulator was already sealed and the values were discarded.
    pub fn fold(&self, params: Vec<(String, Vec<f32>)>) -> bool {
        let mut sums = self.sums.lock();
        if sums.sealed {
            return false;
        }

        for (name, value) in params {
            let (sum, count) = sums
                .vars
                .entry(name)
                .or_insert_with(|| (vec![0.; value.len()], 0));

            if sum.len() != value.len() {
                warn!("discarding a value of {} elements, expected {}", value.len(), sum.len());
                continue;
            }

            sum.iter_mut().zip(&value).for_each(|(s, v)| *s += v);
            *count += 1;
        }

        true
    }

    /// Seals the accumulator and computes the mean of every variable.
    ///
    /// # Arguments
    /// * `chunk` - The chunk index, for error reporting.
    /// * `names` - The chunk's variables, in order.
    ///
    /// # Returns
    /// One mean per name, in order, or `ZeroReporters` if a variable was never reported.
    pub fn seal(&self, chunk: usize, names: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut sums = self.sums.lock();
        sums.sealed = true;

        names
            .iter()
            .map(|name| match sums.vars.get(name) {
                Some((sum, count)) if *count > 0 => {
                    let n = *count as f32;
                    Ok(sum.iter().map(|s| s / n).collect())
                }
                _ => Err(SwarmErr::ZeroReporters {
                    chunk,
                    name: name.clone(),
                }),
            })
            .collect()
    }

    /// The amount of workers that reported `name`.
    pub fn count(&self, name: &str) -> usize {
        self.sums.lock().vars.get(name).map_or(0, |(_, c)| *c)
    }
}
