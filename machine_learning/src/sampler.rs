use std::{fs, io, path::Path};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Separator inserted between files when a directory is loaded.
const FILE_SEPARATOR: &[u8] = b"\n\n";

/// Draws fixed-length token sequences for training.
pub trait Sampler: Send + Sync {
    /// Samples `length` consecutive tokens.
    fn sample(&self, length: usize) -> Vec<u32>;
}

/// Samples random windows of byte-level tokens from a text corpus.
#[derive(Debug)]
pub struct TextSampler {
    tokens: Vec<u32>,
    rng: Mutex<StdRng>,
}

impl TextSampler {
    /// Creates a new `TextSampler` over an in-memory corpus.
    ///
    /// # Arguments
    /// * `text` - The corpus.
    /// * `seed` - An optional seed for deterministic sampling.
    ///
    /// # Returns
    /// A new `TextSampler`, or an `InvalidInput` error if `text` is empty.
    pub fn new(text: &[u8], seed: Option<u64>) -> io::Result<Self> {
        if text.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot sample from an empty corpus",
            ));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            tokens: text.iter().map(|&b| b as u32).collect(),
            rng: Mutex::new(rng),
        })
    }

    /// Loads a corpus from a file, or from every file of a directory in name order.
    ///
    /// # Arguments
    /// * `path` - A file or directory path.
    /// * `seed` - An optional seed for deterministic sampling.
    pub fn from_path(path: &Path, seed: Option<u64>) -> io::Result<Self> {
        if !path.is_dir() {
            return Self::new(&fs::read(path)?, seed);
        }

        let mut files = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        files.retain(|p| p.is_file());
        files.sort();

        let mut text = Vec::new();
        for file in files {
            if !text.is_empty() {
                text.extend_from_slice(FILE_SEPARATOR);
            }
            text.extend(fs::read(file)?);
        }

        Self::new(&text, seed)
    }

    /// Returns the amount of tokens in the corpus.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Sampler for TextSampler {
    fn sample(&self, length: usize) -> Vec<u32> {
        let total = self.tokens.len();
        let start = if total > length {
            self.rng.lock().random_range(0..=total - length)
        } else {
            0
        };

        // Corpora shorter than `length` wrap around.
        self.tokens
            .iter()
            .cycle()
            .skip(start)
            .take(length)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_consecutive_tokens() {
        let text: Vec<u8> = (0..100).collect();
        let sampler = TextSampler::new(&text, Some(7)).unwrap();

        for _ in 0..20 {
            let sample = sampler.sample(10);
            assert_eq!(sample.len(), 10);
            assert!(sample.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn seeded_samplers_agree() {
        let text = b"the quick brown fox jumps over the lazy dog";
        let a = TextSampler::new(text, Some(1)).unwrap();
        let b = TextSampler::new(text, Some(1)).unwrap();

        for _ in 0..5 {
            assert_eq!(a.sample(8), b.sample(8));
        }
    }

    #[test]
    fn short_corpus_wraps() {
        let sampler = TextSampler::new(b"ab", None).unwrap();
        assert_eq!(sampler.sample(5), vec![97, 98, 97, 98, 97]);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        assert!(TextSampler::new(b"", None).is_err());
    }
}
