//! Shared countdown budget for sequential bounded steps
//!
//! The initial-build sequence runs several external commands under one
//! deadline: each step receives the remainder of the budget as its own
//! timeout, so a slow early step starves later steps instead of the outer
//! operation silently overrunning its bound.

use std::time::{Duration, Instant};

/// A single deadline shared by consecutive time-boxed steps
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    deadline: Instant,
}

impl Countdown {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    /// Time left in the budget; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
