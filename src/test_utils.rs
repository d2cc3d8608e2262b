use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;

/// A scratch directory removed when dropped.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("pagestore-test-")
                .tempdir()
                .unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.dir.path()
    }
}

/// Uniform number in `[min, max]`.
pub fn generate_random_number(rng: &mut StdRng, min: u64, max: u64) -> u64 {
    rng.gen_range(min..=max)
}

/// Deterministic generator for reproducible workloads.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// `count` distinct keys in `[0, count)` shuffled with `seed`.
pub fn shuffled_keys(count: u64, seed: u64) -> Vec<u64> {
    use rand::seq::SliceRandom;

    let mut keys: Vec<u64> = (0..count).collect();
    keys.shuffle(&mut seeded_rng(seed));
    keys
}
