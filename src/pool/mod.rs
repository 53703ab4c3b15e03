use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Identifiers are sampled from `0..ID_UPPER_BOUND`.
pub const ID_UPPER_BOUND: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of identifiers generated once at startup.
///
/// The pool is never mutated after construction; batches only ever read from
/// it, through [`IdPool::sample`] and [`IdPool::get`].
#[derive(Debug)]
pub struct IdPool {
    ids: Box<[Identifier]>,
}

impl IdPool {
    pub fn generate<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Self {
        let ids = (0..count)
            .map(|_| Identifier(rng.random_range(0..ID_UPPER_BOUND).to_string()))
            .collect();
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Identifier> {
        self.ids.get(index)
    }

    pub fn ids(&self) -> &[Identifier] {
        &self.ids
    }

    /// Picks `count` indices uniformly, with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<usize> {
        if self.ids.is_empty() {
            return Vec::new();
        }
        (0..count)
            .map(|_| rng.random_range(0..self.ids.len()))
            .collect()
    }
}

pub type SharedIdPool = Arc<IdPool>;
