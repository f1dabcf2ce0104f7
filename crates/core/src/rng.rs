//! Process-lifetime random source.
//!
//! The original Go implementation called `rand.Seed(time.Now().UTC().UnixNano())`
//! on every id/position generation (`consistenthash/server_node.go`, `util/ids.go`),
//! which re-seeds the PRNG on every call — a correctness bug the spec calls out
//! explicitly (`spec.md` Design Notes: "Random seeding every call"). Here the
//! generator is seeded once, lazily, the first time anything asks for randomness,
//! and reused for the rest of the process's life.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::OnceLock;

static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn rng() -> &'static Mutex<StdRng> {
    RNG.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

/// Returns a fresh random 128-bit value from the process-lifetime RNG.
pub fn random_u128() -> u128 {
    let mut bytes = [0u8; 16];
    rng().lock().fill_bytes(&mut bytes);
    u128::from_be_bytes(bytes)
}
