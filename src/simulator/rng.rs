use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG for simulation runs. Same seed, same sequence.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Uniform in `[min, max)`; returns `min` for an empty range.
    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    pub fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }

    /// Index in `[0, n)` skewed toward 0, roughly Zipf(1).
    ///
    /// Draws a log-uniform value so low ranks dominate, which gives the
    /// heavy-hitter shape stream summaries are built for.
    pub fn gen_skewed(&mut self, n: u64) -> u64 {
        if n <= 1 {
            return 0;
        }
        let unit = self.next_u64() as f64 / u64::MAX as f64;
        let rank = ((n as f64 + 1.0).powf(unit) - 1.0).floor() as u64;
        rank.min(n - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_gen_range_bounds() {
        let mut rng = DeterministicRng::new(1);
        for _ in 0..1000 {
            let v = rng.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5, 5), 5);
    }

    #[test]
    fn test_skewed_favors_low_ranks() {
        let mut rng = DeterministicRng::new(3);
        let mut hist = [0u32; 100];
        for _ in 0..10_000 {
            hist[rng.gen_skewed(100) as usize] += 1;
        }
        assert!(hist[0] > hist[50]);
        assert!(hist[..10].iter().sum::<u32>() > hist[50..].iter().sum::<u32>());
    }
}
