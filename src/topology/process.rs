//! Global rank ⇄ (node, intra-node rank) mapping.
//!
//! A [`ProcessTopology`] is computed once per schedule construction from the
//! caller's [`TapConfig`] and threaded explicitly through every phase. The
//! three supported placements are mutually inverse: for every rank `p`,
//! `to_global(to_node(p), to_local(p)) == p`.

use crate::config::{RankOrdering, TapConfig};
use crate::tap_error::TapError;

/// Placement of the current process and the rules to place any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessTopology {
    rank: usize,
    num_procs: usize,
    ppn: usize,
    num_nodes: usize,
    ordering: RankOrdering,
}

impl ProcessTopology {
    /// Build the topology for `rank` out of `num_procs` processes.
    ///
    /// # Errors
    /// `InvalidConfig` if `ppn` is zero or does not divide `num_procs`,
    /// `RankOutOfRange` if `rank >= num_procs`.
    pub fn new(rank: usize, num_procs: usize, cfg: &TapConfig) -> Result<Self, TapError> {
        Self::with_ordering(rank, num_procs, cfg.ppn, cfg.ordering)
    }

    pub fn with_ordering(
        rank: usize,
        num_procs: usize,
        ppn: usize,
        ordering: RankOrdering,
    ) -> Result<Self, TapError> {
        if ppn == 0 {
            return Err(TapError::InvalidConfig("ppn must be at least 1".into()));
        }
        if num_procs == 0 || num_procs % ppn != 0 {
            return Err(TapError::InvalidConfig(format!(
                "{num_procs} processes cannot be split into nodes of {ppn}"
            )));
        }
        if rank >= num_procs {
            return Err(TapError::RankOutOfRange {
                rank,
                size: num_procs,
            });
        }
        Ok(Self {
            rank,
            num_procs,
            ppn,
            num_nodes: num_procs / ppn,
            ordering,
        })
    }

    /// Build from a legacy integer ordering code. An unknown code is reported
    /// once, by rank 0, and fails construction on every rank.
    pub fn from_code(
        rank: usize,
        num_procs: usize,
        ppn: usize,
        code: i32,
    ) -> Result<Self, TapError> {
        let ordering = match RankOrdering::from_code(code) {
            Ok(o) => o,
            Err(e) => {
                if rank == 0 {
                    log::error!("This MPI rank ordering is not supported: {e}");
                }
                return Err(e);
            }
        };
        Self::with_ordering(rank, num_procs, ppn, ordering)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_procs(&self) -> usize {
        self.num_procs
    }

    pub fn ppn(&self) -> usize {
        self.ppn
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn ordering(&self) -> RankOrdering {
        self.ordering
    }

    /// Node hosting the current process.
    pub fn node(&self) -> usize {
        self.to_node(self.rank)
    }

    /// Rank of the current process within its node.
    pub fn local_rank(&self) -> usize {
        self.to_local(self.rank)
    }

    /// Node on which global rank `proc` lies.
    #[inline]
    pub fn to_node(&self, proc: usize) -> usize {
        debug_assert!(proc < self.num_procs);
        let n = self.num_nodes;
        match self.ordering {
            RankOrdering::Cyclic => proc % n,
            RankOrdering::Block => proc / self.ppn,
            RankOrdering::Alternating => {
                if (proc / n) % 2 == 0 {
                    proc % n
                } else {
                    n - (proc % n) - 1
                }
            }
        }
    }

    /// Rank of global process `proc` within its node.
    #[inline]
    pub fn to_local(&self, proc: usize) -> usize {
        debug_assert!(proc < self.num_procs);
        match self.ordering {
            RankOrdering::Cyclic | RankOrdering::Alternating => proc / self.num_nodes,
            RankOrdering::Block => proc % self.ppn,
        }
    }

    /// Global rank of intra-node rank `local` on `node`.
    #[inline]
    pub fn to_global(&self, node: usize, local: usize) -> usize {
        debug_assert!(node < self.num_nodes && local < self.ppn);
        let n = self.num_nodes;
        match self.ordering {
            RankOrdering::Cyclic => local * n + node,
            RankOrdering::Block => local + node * self.ppn,
            // Odd rows of the placement run backwards over the nodes.
            RankOrdering::Alternating => {
                if local % 2 == 0 {
                    local * n + node
                } else {
                    local * n + n - node - 1
                }
            }
        }
    }

    /// Check that `proc` is a valid global rank.
    pub fn check_rank(&self, proc: usize) -> Result<(), TapError> {
        if proc < self.num_procs {
            Ok(())
        } else {
            Err(TapError::RankOutOfRange {
                rank: proc,
                size: self.num_procs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(ordering: RankOrdering) -> ProcessTopology {
        ProcessTopology::with_ordering(0, 8, 4, ordering).unwrap()
    }

    #[test]
    fn block_places_contiguous_ranks() {
        let t = topo(RankOrdering::Block);
        let nodes: Vec<_> = (0..8).map(|p| t.to_node(p)).collect();
        assert_eq!(nodes, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(t.to_local(6), 2);
        assert_eq!(t.to_global(1, 2), 6);
    }

    #[test]
    fn cyclic_places_round_robin() {
        let t = topo(RankOrdering::Cyclic);
        let nodes: Vec<_> = (0..8).map(|p| t.to_node(p)).collect();
        assert_eq!(nodes, vec![0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(t.to_local(5), 2);
        assert_eq!(t.to_global(1, 2), 5);
    }

    #[test]
    fn alternating_reverses_odd_rows() {
        let t = ProcessTopology::with_ordering(0, 9, 3, RankOrdering::Alternating).unwrap();
        let nodes: Vec<_> = (0..9).map(|p| t.to_node(p)).collect();
        assert_eq!(nodes, vec![0, 1, 2, 2, 1, 0, 0, 1, 2]);
        for p in 0..9 {
            assert_eq!(t.to_global(t.to_node(p), t.to_local(p)), p);
        }
    }

    #[test]
    fn every_node_has_ppn_ranks() {
        for o in [
            RankOrdering::Cyclic,
            RankOrdering::Block,
            RankOrdering::Alternating,
        ] {
            let t = topo(o);
            let mut per_node = vec![0usize; t.num_nodes()];
            for p in 0..8 {
                per_node[t.to_node(p)] += 1;
            }
            assert!(per_node.iter().all(|&c| c == 4), "{o}: {per_node:?}");
        }
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(ProcessTopology::with_ordering(0, 6, 4, RankOrdering::Block).is_err());
        assert!(ProcessTopology::with_ordering(8, 8, 4, RankOrdering::Block).is_err());
        assert!(matches!(
            ProcessTopology::from_code(0, 8, 4, 7),
            Err(TapError::UnsupportedOrdering(_))
        ));
    }
}
