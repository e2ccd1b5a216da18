//! Response pools and the selection state machine.
//!
//! A pool owns the candidate responses of one route together with their
//! consumption counters. Callers serialize access to a pool; nothing in here
//! is shared.

use crate::config::{ResponseDefinition, ResponseSelection};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

/// Candidate responses of a route and their selection state.
#[derive(Debug)]
pub struct ResponsePool {
    strategy: ResponseSelection,
    entries: Vec<PoolEntry>,
    /// Next index the cycle strategy will try
    cursor: usize,
    rng: StdRng,
}

#[derive(Debug)]
struct PoolEntry {
    response: Arc<ResponseDefinition>,
    /// Selections left, `None` for unlimited
    remaining: Option<u32>,
    used_count: u64,
}

impl PoolEntry {
    fn is_active(&self) -> bool {
        self.remaining != Some(0)
    }
}

/// Consumption state of one response, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseState {
    pub id: Option<String>,
    pub used_count: u64,
    pub remaining: Option<u32>,
    pub is_active: bool,
}

impl ResponsePool {
    /// Create a pool over `responses` in declaration order.
    pub fn new(strategy: ResponseSelection, responses: Vec<ResponseDefinition>) -> Self {
        Self::with_rng(strategy, responses, StdRng::from_entropy())
    }

    /// Create a pool whose random draws are reproducible.
    pub fn with_seed(strategy: ResponseSelection, responses: Vec<ResponseDefinition>, seed: u64) -> Self {
        Self::with_rng(strategy, responses, StdRng::seed_from_u64(seed))
    }

    fn with_rng(strategy: ResponseSelection, responses: Vec<ResponseDefinition>, rng: StdRng) -> Self {
        let entries = responses
            .into_iter()
            .map(|response| PoolEntry {
                remaining: response.repeat,
                response: Arc::new(response),
                used_count: 0,
            })
            .collect();

        Self {
            strategy,
            entries,
            cursor: 0,
            rng,
        }
    }

    pub fn strategy(&self) -> ResponseSelection {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether no response can be selected any more.
    pub fn is_exhausted(&self) -> bool {
        !self.entries.iter().any(PoolEntry::is_active)
    }

    /// Select a response and consume one unit of its repeat budget.
    ///
    /// Returns `None` once every response is exhausted.
    pub fn select(&mut self) -> Option<Arc<ResponseDefinition>> {
        let index = match self.strategy {
            ResponseSelection::Cycle => self.next_cycle(),
            ResponseSelection::Random => self.next_random(),
            ResponseSelection::Greedy => self.first_active(),
        }?;

        let entry = &mut self.entries[index];
        if let Some(remaining) = entry.remaining.as_mut() {
            *remaining -= 1;
        }
        entry.used_count += 1;
        Some(entry.response.clone())
    }

    fn next_cycle(&mut self) -> Option<usize> {
        let n = self.entries.len();
        for step in 0..n {
            let index = (self.cursor + step) % n;
            if self.entries[index].is_active() {
                self.cursor = (index + 1) % n;
                return Some(index);
            }
        }
        None
    }

    fn first_active(&self) -> Option<usize> {
        self.entries.iter().position(PoolEntry::is_active)
    }

    fn next_random(&mut self) -> Option<usize> {
        let active: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].is_active())
            .collect();
        if active.is_empty() {
            return None;
        }

        // Omitted weights share equally over the active subset.
        let fallback = 1.0 / active.len() as f64;
        let weights: Vec<f64> = active
            .iter()
            .map(|&i| self.entries[i].response.weight.unwrap_or(fallback))
            .collect();

        let pick = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(&mut self.rng),
            // All weights zero: uniform among the active responses.
            Err(_) => self.rng.gen_range(0..active.len()),
        };
        Some(active[pick])
    }

    /// Consumption state of every response, in declaration order.
    pub fn states(&self) -> Vec<ResponseState> {
        self.entries
            .iter()
            .map(|e| ResponseState {
                id: e.response.id.clone(),
                used_count: e.used_count,
                remaining: e.remaining,
                is_active: e.is_active(),
            })
            .collect()
    }
}
