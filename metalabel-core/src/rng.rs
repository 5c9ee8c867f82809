//! Deterministic seed hierarchy.
//!
//! One master seed expands into a sub-seed per `(scope, iteration)` pair via
//! BLAKE3. Derivation is hash-based rather than sequential, so a checkpoint's
//! classifier seed does not depend on how many models were fitted before it
//! or on which thread fits it.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for `scope` (e.g. "pooled" or an instrument name) at
    /// `iteration` (e.g. a retrain checkpoint index).
    pub fn sub_seed(&self, scope: &str, iteration: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(scope.as_bytes());
        hasher.update(&iteration.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, scope: &str, iteration: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(scope, iteration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn sub_seeds_are_deterministic() {
        let h = SeedHierarchy::new(42);
        assert_eq!(h.sub_seed("BTC", 17520), h.sub_seed("BTC", 17520));
    }

    #[test]
    fn scopes_and_iterations_differ() {
        let h = SeedHierarchy::new(42);
        assert_ne!(h.sub_seed("BTC", 0), h.sub_seed("ETH", 0));
        assert_ne!(h.sub_seed("BTC", 0), h.sub_seed("BTC", 1));
    }

    #[test]
    fn derivation_order_independent() {
        let h = SeedHierarchy::new(42);
        let btc_first = h.sub_seed("BTC", 3);
        let eth_second = h.sub_seed("ETH", 3);
        let eth_first = h.sub_seed("ETH", 3);
        let btc_second = h.sub_seed("BTC", 3);
        assert_eq!(btc_first, btc_second);
        assert_eq!(eth_first, eth_second);
    }

    #[test]
    fn master_seed_changes_output() {
        assert_ne!(
            SeedHierarchy::new(42).sub_seed("pooled", 0),
            SeedHierarchy::new(43).sub_seed("pooled", 0)
        );
    }

    #[test]
    fn rng_streams_repeat() {
        let h = SeedHierarchy::new(7);
        let a: Vec<u32> = (0..4).map({
            let mut r = h.rng_for("x", 1);
            move |_| r.gen()
        }).collect();
        let b: Vec<u32> = (0..4).map({
            let mut r = h.rng_for("x", 1);
            move |_| r.gen()
        }).collect();
        assert_eq!(a, b);
    }
}
