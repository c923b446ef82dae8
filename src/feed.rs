use crate::types::Threat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of threat values. Every call is an independent draw; the
/// downstream styling assumes the `[0, 1)` domain.
pub trait ThreatFeed {
    fn next_threat(&mut self) -> Threat;
}

/// Uniform random stand-in for a live intelligence feed.
pub struct UniformFeed<R = StdRng> {
    rng: R,
}

impl UniformFeed<StdRng> {
    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }
}

impl<R: Rng> ThreatFeed for UniformFeed<R> {
    fn next_threat(&mut self) -> Threat {
        // gen::<f64>() samples [0, 1) already; clamping only guards the type.
        Threat::clamped(self.rng.gen::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_stay_in_unit_interval() {
        let mut feed = UniformFeed::seeded(7);
        for _ in 0..10_000 {
            let value = feed.next_threat().value();
            assert!((0.0..1.0).contains(&value), "{value} out of range");
        }
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let mut a = UniformFeed::seeded(42);
        let mut b = UniformFeed::seeded(42);
        let left: Vec<f64> = (0..16).map(|_| a.next_threat().value()).collect();
        let right: Vec<f64> = (0..16).map(|_| b.next_threat().value()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn draws_are_spread_across_the_interval() {
        let mut feed = UniformFeed::seeded(3);
        let mut buckets = [0u32; 4];
        for _ in 0..4_000 {
            let bucket = (feed.next_threat().value() * 4.0) as usize;
            buckets[bucket] += 1;
        }
        assert!(buckets.iter().all(|&count| count > 800), "{buckets:?}");
    }
}
