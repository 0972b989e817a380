//! Host placement under a fixed per-host slot limit
//!
//! The scheduler only tracks slot counts and answers placement questions.
//! Evicting filler instances and launching components is the lifecycle
//! controller's job; it asks `admission_plan` which instances to evict and
//! then stops them one at a time.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::lifecycle::{ServiceKey, Tier};

/// Default number of components a host may run at once
pub const DEFAULT_MAX_APPS: usize = 2;

/// Errors from placement decisions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("Insufficient capacity: need {needed} slot(s), {available} free, {reclaimable} reclaimable from filler instances")]
    Insufficient {
        needed: usize,
        available: usize,
        reclaimable: usize,
    },

    #[error("Host '{0}' is at capacity")]
    HostFull(String),

    #[error("Unknown host: {0}")]
    UnknownHost(String),
}

/// A filler instance that could be evicted, with the slots it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillerSlots {
    pub service_key: ServiceKey,
    pub slots: usize,
}

/// Slot usage of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUsage {
    pub host: String,
    pub used: usize,
    pub max: usize,
}

/// Tracks per-host slot usage and chooses hosts
pub struct PlacementScheduler {
    max_apps: usize,
    counts: BTreeMap<String, usize>,
    rng: StdRng,
}

impl PlacementScheduler {
    pub fn new(hosts: impl IntoIterator<Item = String>, max_apps: usize) -> Self {
        Self::with_rng(hosts, max_apps, StdRng::from_entropy())
    }

    /// Deterministic host choice for tests and reproducible runs
    pub fn with_seed(hosts: impl IntoIterator<Item = String>, max_apps: usize, seed: u64) -> Self {
        Self::with_rng(hosts, max_apps, StdRng::seed_from_u64(seed))
    }

    fn with_rng(hosts: impl IntoIterator<Item = String>, max_apps: usize, rng: StdRng) -> Self {
        Self {
            max_apps,
            counts: hosts.into_iter().map(|h| (h, 0)).collect(),
            rng,
        }
    }

    pub fn max_apps(&self) -> usize {
        self.max_apps
    }

    pub fn current_count(&self, host: &str) -> Option<usize> {
        self.counts.get(host).copied()
    }

    /// Free slots summed over every host
    pub fn available_slots(&self) -> usize {
        self.counts
            .values()
            .map(|used| self.max_apps.saturating_sub(*used))
            .sum()
    }

    pub fn used_slots(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn usage(&self) -> Vec<HostUsage> {
        self.counts
            .iter()
            .map(|(host, used)| HostUsage {
                host: host.clone(),
                used: *used,
                max: self.max_apps,
            })
            .collect()
    }

    /// Uniformly random host with a free slot that is not in `exclude`
    pub fn find_host(&mut self, exclude: &HashSet<String>) -> Option<String> {
        let candidates: Vec<&String> = self
            .counts
            .iter()
            .filter(|(host, used)| **used < self.max_apps && !exclude.contains(*host))
            .map(|(host, _)| host)
            .collect();
        candidates.choose(&mut self.rng).map(|h| (*h).clone())
    }

    /// Prefer a host not yet used by this instance, fall back to any with room
    pub fn pick_host(&mut self, used: &HashSet<String>) -> Option<String> {
        if let Some(host) = self.find_host(used) {
            return Some(host);
        }
        let host = self.find_host(&HashSet::new());
        if let Some(ref h) = host {
            debug!("No unused host with free capacity, sharing {}", h);
        }
        host
    }

    /// Take one slot on `host`
    pub fn reserve(&mut self, host: &str) -> Result<(), PlacementError> {
        let used = self
            .counts
            .get_mut(host)
            .ok_or_else(|| PlacementError::UnknownHost(host.to_string()))?;
        if *used >= self.max_apps {
            return Err(PlacementError::HostFull(host.to_string()));
        }
        *used += 1;
        Ok(())
    }

    /// Give back one slot on `host`
    pub fn release(&mut self, host: &str) -> Result<(), PlacementError> {
        let used = self
            .counts
            .get_mut(host)
            .ok_or_else(|| PlacementError::UnknownHost(host.to_string()))?;
        *used = used.saturating_sub(1);
        Ok(())
    }

    /// Decide which filler instances must go before `needed` slots fit
    ///
    /// `fillers` is in eviction order (oldest first). Only user-requested
    /// work may evict. When the slots cannot be found even after evicting
    /// every filler, nothing is evicted and `Insufficient` is returned.
    pub fn admission_plan(
        &self,
        needed: usize,
        tier: Tier,
        fillers: &[FillerSlots],
    ) -> Result<Vec<ServiceKey>, PlacementError> {
        let available = self.available_slots();
        if available >= needed {
            return Ok(Vec::new());
        }

        let reclaimable = match tier {
            Tier::UserRequested => fillers.iter().map(|f| f.slots).sum(),
            Tier::Filler => 0,
        };
        if available + reclaimable < needed {
            return Err(PlacementError::Insufficient {
                needed,
                available,
                reclaimable,
            });
        }

        let mut victims = Vec::new();
        let mut freed = available;
        for filler in fillers {
            if freed >= needed {
                break;
            }
            victims.push(filler.service_key.clone());
            freed += filler.slots;
        }
        Ok(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("h{}", i)).collect()
    }

    fn filler(n: u64, slots: usize) -> FillerSlots {
        FillerSlots {
            service_key: ServiceKey::new("colab", n),
            slots,
        }
    }

    #[test]
    fn test_reserve_respects_max_apps() {
        let mut sched = PlacementScheduler::with_seed(hosts(1), 2, 7);
        sched.reserve("h1").unwrap();
        sched.reserve("h1").unwrap();
        assert_eq!(
            sched.reserve("h1"),
            Err(PlacementError::HostFull("h1".to_string()))
        );
        assert_eq!(sched.current_count("h1"), Some(2));
        assert_eq!(sched.available_slots(), 0);
    }

    #[test]
    fn test_find_host_skips_full_and_excluded() {
        let mut sched = PlacementScheduler::with_seed(hosts(3), 1, 1);
        sched.reserve("h1").unwrap();
        let exclude: HashSet<String> = ["h2".to_string()].into();
        for _ in 0..20 {
            assert_eq!(sched.find_host(&exclude).as_deref(), Some("h3"));
        }
        sched.reserve("h3").unwrap();
        assert_eq!(sched.find_host(&exclude), None);
    }

    #[test]
    fn test_find_host_is_spread() {
        let mut sched = PlacementScheduler::with_seed(hosts(4), 2, 42);
        let seen: HashSet<String> = (0..200)
            .filter_map(|_| sched.find_host(&HashSet::new()))
            .collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_pick_host_relaxes_exclusion() {
        let mut sched = PlacementScheduler::with_seed(hosts(1), 2, 3);
        let used: HashSet<String> = ["h1".to_string()].into();
        assert_eq!(sched.find_host(&used), None);
        assert_eq!(sched.pick_host(&used).as_deref(), Some("h1"));
    }

    #[test]
    fn test_release_never_underflows() {
        let mut sched = PlacementScheduler::with_seed(hosts(1), 2, 3);
        sched.release("h1").unwrap();
        assert_eq!(sched.current_count("h1"), Some(0));
        assert!(matches!(
            sched.release("h9"),
            Err(PlacementError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_admission_without_eviction() {
        let sched = PlacementScheduler::with_seed(hosts(2), 2, 0);
        let plan = sched
            .admission_plan(3, Tier::UserRequested, &[filler(1, 2)])
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_admission_evicts_oldest_filler_first() {
        let mut sched = PlacementScheduler::with_seed(hosts(2), 2, 0);
        for h in ["h1", "h1", "h2", "h2"] {
            sched.reserve(h).unwrap();
        }
        let fillers = [filler(1, 2), filler(2, 2)];
        let plan = sched
            .admission_plan(2, Tier::UserRequested, &fillers)
            .unwrap();
        assert_eq!(plan, vec![ServiceKey::new("colab", 1)]);

        let plan = sched
            .admission_plan(3, Tier::UserRequested, &fillers)
            .unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_admission_all_or_nothing() {
        let mut sched = PlacementScheduler::with_seed(hosts(2), 2, 0);
        for h in ["h1", "h1", "h2", "h2"] {
            sched.reserve(h).unwrap();
        }
        let err = sched
            .admission_plan(5, Tier::UserRequested, &[filler(1, 2), filler(2, 2)])
            .unwrap_err();
        assert_eq!(
            err,
            PlacementError::Insufficient {
                needed: 5,
                available: 0,
                reclaimable: 4
            }
        );
    }

    #[test]
    fn test_filler_never_evicts() {
        let mut sched = PlacementScheduler::with_seed(hosts(1), 2, 0);
        sched.reserve("h1").unwrap();
        sched.reserve("h1").unwrap();
        assert!(sched
            .admission_plan(2, Tier::Filler, &[filler(1, 2)])
            .is_err());
    }
}
