//! Engine configuration.

/// Maximal number of multiplicative deletes after which similarity queries
/// are refused.
pub const DEFAULT_MAX_DELETES: usize = 1;

/// Configuration of the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Number of worker threads of the parallel queries. Zero selects the
    /// number of logical cores.
    pub threads: usize,
    /// Maximal number of multiplicative deletes tolerated by similarity
    /// queries.
    pub max_deletes: usize,
    /// Whether the capacity of intermediate ciphertexts is checked after every
    /// multiplicative stage.
    pub capacity_checks: bool,
    /// Minimal capacity, in bits, an intermediate ciphertext must retain.
    pub min_capacity_bits: usize,
    /// Bit width of the inputs of the interpolation comparator.
    pub comparator_bits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_deletes: DEFAULT_MAX_DELETES,
            capacity_checks: true,
            min_capacity_bits: 1,
            comparator_bits: 4,
        }
    }
}

impl EngineConfig {
    /// Sets the number of worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the maximal number of multiplicative deletes.
    pub fn with_max_deletes(mut self, max_deletes: usize) -> Self {
        self.max_deletes = max_deletes;
        self
    }

    /// Enables or disables the capacity checks.
    pub fn with_capacity_checks(mut self, capacity_checks: bool) -> Self {
        self.capacity_checks = capacity_checks;
        self
    }

    /// Sets the minimal capacity of intermediate ciphertexts.
    pub fn with_min_capacity_bits(mut self, bits: usize) -> Self {
        self.min_capacity_bits = bits;
        self
    }

    /// Sets the bit width of the comparator inputs.
    pub fn with_comparator_bits(mut self, bits: usize) -> Self {
        self.comparator_bits = bits;
        self
    }
}
