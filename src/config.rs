//! Tunable constants.
//!
//! The distilled spec leaves these as magic numbers (minimum 32 buckets, a
//! 0.75-ish load factor implied by "resize is internally triggered by
//! load", and an unbounded id-synthesis retry loop). Exposing them here lets
//! an embedding server tune the store without forking the crate.

/// Tunables for a [`crate::store::Store`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// Initial bucket array size. Rounded up to the next power of two, with
    /// a floor of 32 to match the source.
    pub initial_buckets: usize,
    /// Resize the bucket array when `len as f32 / buckets as f32` exceeds
    /// this.
    pub load_factor: f32,
    /// Upper bound on how many times `insert` will perturb a synthesized id
    /// before giving up with [`crate::error::StoreError::InternalError`].
    /// The retry loop's termination is "probabilistic" per the distilled
    /// spec; this is the strengthening that turns an unbounded loop into a
    /// reported failure on pathological fill (see `SPEC_FULL.md` §10).
    pub max_id_synthesis_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_buckets: 32,
            load_factor: 0.75,
            max_id_synthesis_retries: 1 << 20,
        }
    }
}

impl StoreConfig {
    pub(crate) fn initial_buckets_pow2(&self) -> usize {
        self.initial_buckets.max(32).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_source_minimums() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.initial_buckets_pow2(), 32);
    }

    #[test]
    fn small_request_floors_to_32() {
        let cfg = StoreConfig {
            initial_buckets: 4,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.initial_buckets_pow2(), 32);
    }

    #[test]
    fn rounds_up_to_power_of_two() {
        let cfg = StoreConfig {
            initial_buckets: 100,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.initial_buckets_pow2(), 128);
    }
}
