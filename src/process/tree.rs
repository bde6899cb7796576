use crate::process::ProcessSample;
use std::collections::{HashMap, HashSet};

/// Parent/child view over one snapshot of the process table
///
/// Built once per tick and discarded afterwards; the process topology may
/// change between ticks.
#[derive(Debug, Default)]
pub struct ProcessForest {
    /// RSS in bytes, indexed by pid
    rss: HashMap<u32, u64>,
    /// Child pids in snapshot order, indexed by parent pid
    children: HashMap<u32, Vec<u32>>,
}

impl ProcessForest {
    /// Index a snapshot by parent pid
    ///
    /// A pid listed more than once keeps its last row as a whole, parent
    /// link included. Children stay in the order their pid first appeared.
    pub fn build(samples: &[ProcessSample]) -> Self {
        let mut rows: HashMap<u32, &ProcessSample> = HashMap::with_capacity(samples.len());
        let mut order = Vec::with_capacity(samples.len());
        for sample in samples {
            if rows.insert(sample.pid, sample).is_none() {
                order.push(sample.pid);
            }
        }

        let mut forest = Self::default();
        for pid in order {
            if let Some(sample) = rows.get(&pid) {
                forest.rss.insert(pid, sample.rss);
                forest.children.entry(sample.ppid).or_default().push(pid);
            }
        }

        forest
    }

    /// Number of processes in the snapshot
    pub(crate) fn len(&self) -> usize {
        self.rss.len()
    }

    /// RSS of a single process
    pub fn rss_of(&self, pid: u32) -> Option<u64> {
        self.rss.get(&pid).copied()
    }

    /// Every transitive descendant of `pid`, depth first
    ///
    /// Each pid is visited at most once, so cyclic or self-referencing
    /// parent links terminate.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut found = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut stack = self.children_of(pid);

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            found.push(current);
            stack.extend(self.children_of(current));
        }

        found
    }

    /// Direct children of `pid`, reversed so that popping yields snapshot order
    fn children_of(&self, pid: u32) -> Vec<u32> {
        self.children
            .get(&pid)
            .map(|children| children.iter().rev().copied().collect())
            .unwrap_or_default()
    }

    /// RSS of `pid` plus the RSS of all its descendants
    ///
    /// Returns `None` if `pid` is not in the snapshot.
    pub fn cumulative_rss(&self, pid: u32) -> Option<u64> {
        let own = self.rss_of(pid)?;
        let total = self
            .descendants(pid)
            .into_iter()
            .filter_map(|child| self.rss_of(child))
            .fold(own, u64::saturating_add);
        Some(total)
    }
}
