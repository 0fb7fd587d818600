//! Resource ledger: tracks available/acquired amounts of named resources
//! and implements the disjunctive acquisition protocol (spec.md §4.5).

use std::collections::BTreeMap;

use crate::task::{Amount, ResourceSet};

/// `available[r] + sum(acquired[r]) == initial_capacity[r]` for every
/// resource `r`, always.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    available: BTreeMap<String, Amount>,
    acquired: BTreeMap<String, Vec<(String, Amount)>>,
}

impl ResourceLedger {
    /// Compute initial capacities over the declared (pre-expansion) graph:
    /// for each resource name, the maximum amount requested by any
    /// resource set that mentions it. This ensures every individual job
    /// can in principle run; it does not guarantee concurrency.
    pub fn with_capacities<'a>(resource_sets: impl IntoIterator<Item = &'a ResourceSet>) -> Self {
        let mut available: BTreeMap<String, Amount> = BTreeMap::new();
        for set in resource_sets {
            for (name, amount) in set {
                let entry = available.entry(name.clone()).or_insert(Amount::from_integer(0));
                if *amount > *entry {
                    *entry = *amount;
                }
            }
        }
        Self {
            available,
            acquired: BTreeMap::new(),
        }
    }

    /// Try each resource set in declared order; acquire the first one
    /// that is fully satisfiable, atomically. Returns whether acquisition
    /// succeeded. A task with no resource requirements always succeeds.
    pub fn try_acquire(&mut self, job_key: &str, resource_sets: &[ResourceSet]) -> bool {
        if resource_sets.is_empty() {
            return true;
        }
        for set in resource_sets {
            let fits = set.iter().all(|(name, amount)| {
                self.available.get(name).copied().unwrap_or(Amount::from_integer(0)) >= *amount
            });
            if fits {
                for (name, amount) in set {
                    *self.available.get_mut(name).expect("capacity precomputed for every resource") -= *amount;
                    self.acquired
                        .entry(name.clone())
                        .or_default()
                        .push((job_key.to_string(), *amount));
                }
                return true;
            }
        }
        false
    }

    /// Return every amount acquired by `job_key` to `available`.
    pub fn release(&mut self, job_key: &str) {
        for (name, entries) in self.acquired.iter_mut() {
            let mut i = 0;
            while i < entries.len() {
                if entries[i].0 == job_key {
                    let (_, amount) = entries.remove(i);
                    *self.available.entry(name.clone()).or_insert(Amount::from_integer(0)) += amount;
                } else {
                    i += 1;
                }
            }
        }
    }

    pub fn available(&self, name: &str) -> Amount {
        self.available.get(name).copied().unwrap_or(Amount::from_integer(0))
    }

    /// Sum of amounts currently attributed to `name` across all acquirers.
    pub fn acquired_total(&self, name: &str) -> Amount {
        self.acquired
            .get(name)
            .map(|v| v.iter().map(|(_, a)| *a).sum())
            .unwrap_or(Amount::from_integer(0))
    }
}
