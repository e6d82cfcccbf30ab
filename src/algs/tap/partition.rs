//! Splitting off-process columns into on-node and off-node sets.

use crate::algs::permute::{apply_permutation, sort_permutation_by};
use crate::data::columns::OffProcColumns;
use crate::tap_error::TapError;
use crate::topology::ProcessTopology;

/// Columns owned by other ranks on this node, grouped by owning local rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnNodeColumns {
    pub cols: Vec<usize>,
    /// Owner of each column as a local rank.
    pub local_procs: Vec<usize>,
    /// Position of each column in the caller's dependency set.
    pub to_off_proc: Vec<usize>,
}

/// Columns owned on other nodes, in dependency-set order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffNodeColumns {
    pub cols: Vec<usize>,
    /// Owning node of each column.
    pub nodes: Vec<usize>,
    /// Owning world rank of each column.
    pub procs: Vec<usize>,
    pub to_off_proc: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitColumns {
    pub on_node: OnNodeColumns,
    pub off_node: OffNodeColumns,
}

impl SplitColumns {
    pub fn len(&self) -> usize {
        self.on_node.cols.len() + self.off_node.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classify every dependency by whether its owner shares this rank's node.
///
/// The two outputs partition the input: each position lands in exactly one of
/// them and `to_off_proc` records where it came from. On-node columns are
/// stably ordered by owning local rank so each owner forms one run.
pub fn split_off_proc_cols(
    deps: &OffProcColumns,
    topo: &ProcessTopology,
) -> Result<SplitColumns, TapError> {
    let my_node = topo.node();
    let mut on = OnNodeColumns::default();
    let mut off = OffNodeColumns::default();
    for (pos, (col, owner)) in deps.iter().enumerate() {
        topo.check_rank(owner)?;
        let node = topo.to_node(owner);
        if node == my_node {
            on.cols.push(col);
            on.local_procs.push(topo.to_local(owner));
            on.to_off_proc.push(pos);
        } else {
            off.cols.push(col);
            off.nodes.push(node);
            off.procs.push(owner);
            off.to_off_proc.push(pos);
        }
    }

    let perm = sort_permutation_by(&on.local_procs, |a, b| a.cmp(b));
    on = OnNodeColumns {
        cols: apply_permutation(&perm, &on.cols),
        local_procs: apply_permutation(&perm, &on.local_procs),
        to_off_proc: apply_permutation(&perm, &on.to_off_proc),
    };

    log::debug!(
        "rank {}: {} on-node and {} off-node columns",
        topo.rank(),
        on.cols.len(),
        off.cols.len()
    );
    Ok(SplitColumns {
        on_node: on,
        off_node: off,
    })
}
