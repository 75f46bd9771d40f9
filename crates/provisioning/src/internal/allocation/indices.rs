use crate::internal::common::Set;

/// Assigns cluster membership indices.
///
/// Indices are handed out in increasing order, skipping those already used by the cluster.
/// Probed indices are provisional: [`NodeIndices::reset_probe`] forgets them and
/// [`NodeIndices::commit_probe`] makes them permanent for the lifetime of this tracker.
#[derive(Debug)]
pub struct NodeIndices {
    used: Set<u32>,
    /// First index not yet committed.
    committed: u32,
    /// First index not yet probed.
    probe: u32,
}

impl NodeIndices {
    pub fn new(used: impl IntoIterator<Item = u32>) -> Self {
        NodeIndices {
            used: used.into_iter().collect(),
            committed: 0,
            probe: 0,
        }
    }

    /// Returns the next free index without committing it.
    pub fn probe_next(&mut self) -> u32 {
        while self.used.contains(&self.probe) {
            self.probe += 1;
        }
        let index = self.probe;
        self.probe += 1;
        index
    }

    /// Returns the next free index and commits it, together with any outstanding probes.
    pub fn next(&mut self) -> u32 {
        let index = self.probe_next();
        self.commit_probe();
        index
    }

    pub fn reset_probe(&mut self) {
        self.probe = self.committed;
    }

    pub fn commit_probe(&mut self) {
        self.committed = self.probe;
    }
}

/// Source of membership indices for one allocation attempt.
pub trait IndexSupply {
    fn next_index(&mut self) -> u32;
}

/// Hands out provisional indices, for allocations that may be thrown away.
pub struct Probing<'a>(pub &'a mut NodeIndices);

impl IndexSupply for Probing<'_> {
    fn next_index(&mut self) -> u32 {
        self.0.probe_next()
    }
}

/// Hands out committed indices, for allocations done under the allocation lock.
pub struct Committing<'a>(pub &'a mut NodeIndices);

impl IndexSupply for Committing<'_> {
    fn next_index(&mut self) -> u32 {
        self.0.next()
    }
}
