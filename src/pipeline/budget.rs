// src/pipeline/budget.rs

//! Wall-clock budget of one run segment.

use std::time::{Duration, Instant};

/// Time left before the hosting runtime stops the process.
pub trait TimeBudget: Send + Sync {
    fn remaining(&self) -> Duration;
}

/// Budget ending at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    /// Deadline from a Lambda context, given in epoch milliseconds.
    pub fn from_epoch_millis(deadline_ms: u64) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::after(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
    }
}

impl TimeBudget for Deadline {
    fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Budget that never runs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl TimeBudget for Unbounded {
    fn remaining(&self) -> Duration {
        Duration::MAX
    }
}

/// Compares the remaining budget with the low-water mark.
#[derive(Clone, Copy)]
pub struct BudgetCheck<'a> {
    budget: &'a dyn TimeBudget,
    low_water: Duration,
}

impl<'a> BudgetCheck<'a> {
    pub fn new(budget: &'a dyn TimeBudget, low_water: Duration) -> Self {
        Self { budget, low_water }
    }

    /// Whether the segment must checkpoint now.
    pub fn exhausted(&self) -> bool {
        self.budget.remaining() < self.low_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_in_the_past_is_exhausted() {
        let deadline = Deadline::from_epoch_millis(0);
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(BudgetCheck::new(&deadline, Duration::from_secs(1)).exhausted());
    }

    #[test]
    fn test_far_deadline_is_not_exhausted() {
        let deadline = Deadline::after(Duration::from_secs(900));
        let check = BudgetCheck::new(&deadline, Duration::from_secs(420));
        assert!(!check.exhausted());
    }

    #[test]
    fn test_unbounded() {
        let check = BudgetCheck::new(&Unbounded, Duration::from_secs(420));
        assert!(!check.exhausted());
    }
}
