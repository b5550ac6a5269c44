//! Slice budgets bounding one incremental step.

use std::time::{Duration, Instant};

/// Steps between clock reads for a time budget.
const STEPS_PER_TIME_CHECK: i64 = 1000;

#[derive(Debug, Clone, Copy)]
enum Limit {
    Unlimited,
    Work,
    Time(Instant),
}

/// A consumable quota of work.
///
/// Work budgets count steps. Time budgets read the clock only every
/// thousand steps, or on the next check after [`force_check`](Self::force_check).
///
/// ```
/// use ccbridge::budget::SliceBudget;
///
/// let mut budget = SliceBudget::work(2);
/// budget.step();
/// assert!(!budget.is_over_budget());
/// budget.step();
/// assert!(budget.is_over_budget());
/// ```
#[derive(Debug, Clone)]
pub struct SliceBudget {
    limit: Limit,
    counter: i64,
    exhausted: bool,
}

impl SliceBudget {
    pub fn unlimited() -> Self {
        Self {
            limit: Limit::Unlimited,
            counter: i64::MAX,
            exhausted: false,
        }
    }

    pub fn work(steps: u64) -> Self {
        Self {
            limit: Limit::Work,
            counter: i64::try_from(steps).unwrap_or(i64::MAX),
            exhausted: false,
        }
    }

    pub fn time(slice: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(slice)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        Self {
            limit: Limit::Time(deadline),
            counter: STEPS_PER_TIME_CHECK,
            exhausted: false,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self.limit, Limit::Unlimited)
    }

    pub fn step(&mut self) {
        self.step_by(1);
    }

    pub fn step_by(&mut self, amount: u64) {
        if self.is_unlimited() {
            return;
        }
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        self.counter = self.counter.saturating_sub(amount);
    }

    /// Make the next [`is_over_budget`](Self::is_over_budget) call consult the
    /// clock for time budgets.
    pub fn force_check(&mut self) {
        if let Limit::Time(_) = self.limit {
            self.counter = 0;
        }
    }

    pub fn is_over_budget(&mut self) -> bool {
        if self.exhausted {
            return true;
        }
        if self.counter > 0 {
            return false;
        }
        match self.limit {
            Limit::Unlimited => false,
            Limit::Work => {
                self.exhausted = true;
                true
            }
            Limit::Time(deadline) => {
                if Instant::now() >= deadline {
                    self.exhausted = true;
                    true
                } else {
                    self.counter = STEPS_PER_TIME_CHECK;
                    false
                }
            }
        }
    }
}

impl Default for SliceBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}
