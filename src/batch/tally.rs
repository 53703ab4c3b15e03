use crate::issuer::Outcome;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub successes: u64,
    pub failures: u64,
}

impl Tally {
    pub fn record(&mut self, outcome: &Outcome) {
        if outcome.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn merge(&mut self, other: Tally) {
        self.successes += other.successes;
        self.failures += other.failures;
    }

    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }
}
