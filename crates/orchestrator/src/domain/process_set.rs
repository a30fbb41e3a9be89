use std::sync::{Arc, Mutex, MutexGuard};

/// Process ids under observation, in the order they were first seen.
///
/// Shared between the monitoring loop and the event channel readers. Every
/// membership test followed by an insert must happen under one lock.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitoredProcessSet {
    pids: Vec<u32>,
}

pub type SharedProcessSet = Arc<Mutex<MonitoredProcessSet>>;

pub fn lock_set(set: &SharedProcessSet) -> MutexGuard<'_, MonitoredProcessSet> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MonitoredProcessSet {
    pub fn shared() -> SharedProcessSet {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Returns false if the pid was already present.
    pub fn insert(&mut self, pid: u32) -> bool {
        if self.pids.contains(&pid) {
            return false;
        }
        self.pids.push(pid);
        true
    }

    pub fn extend(&mut self, pids: impl IntoIterator<Item = u32>) -> usize {
        pids.into_iter().filter(|pid| self.insert(*pid)).count()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn remove(&mut self, pid: u32) -> bool {
        let before = self.pids.len();
        self.pids.retain(|p| *p != pid);
        before != self.pids.len()
    }

    /// Drop every pid for which `alive` is false and return the dropped ones.
    pub fn retain_alive(&mut self, mut alive: impl FnMut(u32) -> bool) -> Vec<u32> {
        let mut dead = Vec::new();
        self.pids.retain(|pid| {
            let keep = alive(*pid);
            if !keep {
                dead.push(*pid);
            }
            keep
        });
        dead
    }

    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_insertion_order() {
        let mut set = MonitoredProcessSet::default();
        assert_eq!(set.extend([30, 10, 20, 10]), 3);
        assert_eq!(set.pids(), &[30, 10, 20]);
        assert!(set.remove(10));
        assert!(!set.remove(10));
        assert_eq!(set.pids(), &[30, 20]);
    }

    #[test]
    fn retain_alive_reports_removed() {
        let mut set = MonitoredProcessSet::default();
        set.extend([100, 101, 102]);
        let dead = set.retain_alive(|pid| pid != 101);
        assert_eq!(dead, vec![101]);
        assert_eq!(set.pids(), &[100, 102]);
    }

    proptest! {
        #[test]
        fn never_holds_duplicates(ops in proptest::collection::vec((any::<bool>(), 0u32..16), 0..64)) {
            let mut set = MonitoredProcessSet::default();
            for (insert, pid) in ops {
                if insert {
                    set.insert(pid);
                } else {
                    set.remove(pid);
                }
                let mut sorted = set.pids().to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(sorted.len(), set.len());
            }
        }
    }
}
