//! Explicit, splittable RNG threading.
//!
//! Every sampling call in this crate takes a generator by value or by
//! mutable reference instead of reaching for a thread-local or process-wide
//! global. Parallel Monte-Carlo realizations each derive their own
//! sub-generator from a parent seed and a realization index, so the ensemble
//! is identical regardless of how many threads executed it or in what order
//! (`SPEC_FULL.md` §5, §10.5).

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Derives a deterministic sub-generator for Monte-Carlo realization `j`
/// from a parent seed. `StdRng` is ChaCha12-based, exceeding the
/// "Mersenne-Twister-quality or better" requirement.
pub fn realization_rng(parent_seed: u64, j: u64) -> StdRng {
    StdRng::seed_from_u64(stream_salt(parent_seed, j))
}

/// Mixes a realization index into the parent seed. Splitmix-style
/// multiplicative mixing keeps adjacent realization indices from producing
/// correlated streams, which a plain XOR would not guarantee.
fn stream_salt(parent_seed: u64, j: u64) -> u64 {
    let mut z = parent_seed
        .wrapping_add(j.wrapping_mul(0x9E3779B97F4A7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
