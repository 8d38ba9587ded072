use std::num::NonZeroUsize;

use machine_learning::VariableSpec;

/// A group of variables exchanged together during averaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub names: Vec<String>,
    /// The total amount of scalar values in the chunk.
    pub len: usize,
}

/// Partitions variables into chunks of at most `max_len` values.
///
/// Variables keep their declaration order, so every worker built from the same
/// model agrees on chunk indices. A variable larger than `max_len` gets a chunk
/// of its own.
///
/// # Arguments
/// * `variables` - The engine's variables, in declaration order.
/// * `max_len` - The element threshold of a chunk.
///
/// # Returns
/// The chunks, in order.
pub fn partition(variables: &[VariableSpec], max_len: NonZeroUsize) -> Vec<Chunk> {
    let max_len = max_len.get();
    let mut chunks = Vec::new();
    let mut current = Chunk {
        names: Vec::new(),
        len: 0,
    };

    for var in variables {
        let len = var.len();

        if !current.names.is_empty() && current.len + len > max_len {
            chunks.push(std::mem::replace(
                &mut current,
                Chunk {
                    names: Vec::new(),
                    len: 0,
                },
            ));
        }

        current.names.push(var.name.clone());
        current.len += len;
    }

    if !current.names.is_empty() {
        chunks.push(current);
    }

    chunks
}
