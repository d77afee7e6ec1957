use std::ops::AddAssign;

/// Request counters of a single phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseResult {
    pub total: usize,
    pub failed: usize,
}

impl PhaseResult {
    pub fn inc(&mut self) {
        self.total += 1;
    }

    pub fn inc_failed(&mut self) {
        self.failed += 1;
    }

    pub fn succeeded(&self) -> usize {
        self.total.saturating_sub(self.failed)
    }
}

impl AddAssign for PhaseResult {
    fn add_assign(&mut self, other: PhaseResult) {
        self.total += other.total;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub setup: PhaseResult,
    pub tests: PhaseResult,
    pub teardown: PhaseResult,
}

impl RunResult {
    pub fn merge(&mut self, other: &RunResult) {
        self.setup += other.setup;
        self.tests += other.tests;
        self.teardown += other.teardown;
    }

    /// All phases summed up into one counter pair.
    pub fn sum(&self) -> PhaseResult {
        let mut sum = self.setup;
        sum += self.tests;
        sum += self.teardown;
        sum
    }

    pub fn total(&self) -> usize {
        self.sum().total
    }

    pub fn failed(&self) -> usize {
        self.sum().failed
    }

    pub fn succeeded(&self) -> usize {
        self.sum().succeeded()
    }
}
