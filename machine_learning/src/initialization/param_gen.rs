/// A `ParamGen` generates values for the initial state of a variable.
pub trait ParamGen {
    /// Should sample at most `n` values.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// `None` once the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Drains the generator into a single buffer.
    fn collect_all(&mut self, chunk: usize) -> Vec<f32> {
        let mut out = Vec::new();

        while let Some(values) = self.sample(chunk) {
            out.extend(values);
        }

        out
    }
}
