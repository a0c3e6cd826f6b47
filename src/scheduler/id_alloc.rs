use super::job::JobId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws random job identifiers, retrying on collision and on zero.
pub struct IdAllocator {
    rng: StdRng,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic allocator for tests and reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns an id for which `taken` is false.
    ///
    /// The caller holds the gateway lock, so `taken` sees a stable store.
    pub fn allocate(&mut self, taken: impl Fn(JobId) -> bool) -> JobId {
        loop {
            let id = JobId::new(self.rng.random::<u64>());
            if id.is_none() || taken(id) {
                tracing::debug!("id allocator redraw after collision on {id}");
                continue;
            }
            return id;
        }
    }
}
