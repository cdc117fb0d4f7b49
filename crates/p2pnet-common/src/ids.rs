//! Random identifier allocation for sessions and tunnels.
//!
//! Identifiers are uniform random `u32` draws. A draw that collides with a
//! live identifier is retried, but only up to a fixed number of attempts so
//! that allocation under heavy churn fails instead of spinning.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Identifier that is never handed out. Marks "no session" on the wire.
pub const UNASSIGNED_ID: u32 = 0;

/// Default number of draws before giving up.
pub const DEFAULT_MAX_ID_ATTEMPTS: usize = 100;

/// Every draw collided with a live identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no unused identifier found after {attempts} attempts")]
pub struct IdExhausted {
    pub attempts: usize,
}

/// Source of candidate identifiers.
pub trait IdSource: Send {
    fn next_id(&mut self) -> u32;
}

impl<F> IdSource for F
where
    F: FnMut() -> u32 + Send,
{
    fn next_id(&mut self) -> u32 {
        self()
    }
}

/// Cryptographically seeded random identifiers.
pub struct RandomIds {
    rng: StdRng,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for RandomIds {
    fn next_id(&mut self) -> u32 {
        self.rng.gen()
    }
}

/// Draws identifiers until one is unused or the attempt budget runs out.
pub struct IdAllocator {
    source: Box<dyn IdSource>,
    max_attempts: usize,
}

impl IdAllocator {
    pub fn new(max_attempts: usize) -> Self {
        Self::with_source(Box::new(RandomIds::new()), max_attempts)
    }

    pub fn with_source(source: Box<dyn IdSource>, max_attempts: usize) -> Self {
        Self {
            source,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Allocate an identifier for which `in_use` returns false.
    ///
    /// `UNASSIGNED_ID` is treated as always in use.
    pub fn allocate(&mut self, in_use: impl Fn(u32) -> bool) -> Result<u32, IdExhausted> {
        for _ in 0..self.max_attempts {
            let candidate = self.source.next_id();
            if candidate != UNASSIGNED_ID && !in_use(candidate) {
                return Ok(candidate);
            }
        }
        Err(IdExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
