//! Topology-aware communication schedules.
//!
//! A [`TapComm`] replaces one irregular all-to-some exchange with four
//! phases so that each pair of nodes exchanges data through few, large
//! messages:
//!
//! 1. **S**: ranks gather data bound for other nodes from owners on their
//!    own node,
//! 2. **global**: one set of inter-node messages per pair of partner ranks,
//! 3. **R**: receivers redistribute inter-node data to the ranks on their
//!    node that need it,
//! 4. **L**: data owned on the same node moves directly.
//!
//! The two-step variant ([`TapVariant::TwoStep`]) drops the S phase: owners
//! send their own values straight to the rank with the same local index on
//! the requesting node.
//!
//! Construction is collective over the world communicator. Execution
//! ([`TapComm::communicate`]) is collective too and can run any number of
//! times on the same schedule. [`TapComm::communicate_t`] runs the phases in
//! reverse and sums every contribution into the owning rank.

pub mod global_exchange;
pub mod global_procs;
pub mod local_l;
pub mod local_r;
pub mod local_s;
pub mod node_plan;
pub mod partition;
pub mod remap;

use std::ops::Range;

use bytemuck::Pod;
use num_traits::Zero;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{exchange_values, exchange_values_t};
use crate::algs::par_comm::check_len;
use crate::config::{TapConfig, TapVariant};
use crate::data::columns::OffProcColumns;
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;
use crate::topology::ProcessTopology;

pub use global_procs::GlobalProcs;
pub use node_plan::NodeAggregationPlan;
pub use partition::{OffNodeColumns, OnNodeColumns, SplitColumns};

/// Tags used while building and executing a [`TapComm`].
///
/// Construction and execution use disjoint tags so a rank that finished
/// building and starts exchanging never feeds a peer still building.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TapTags {
    pub token: CommTag,
    pub confirm: CommTag,
    pub local_r: CommTag,
    pub global: CommTag,
    pub local_s: CommTag,
    pub local_l: CommTag,
    pub apply_s: CommTag,
    pub apply_global: CommTag,
    pub apply_r: CommTag,
    pub apply_l: CommTag,
    pub transpose_s: CommTag,
    pub transpose_global: CommTag,
    pub transpose_r: CommTag,
    pub transpose_l: CommTag,
}

impl TapTags {
    /// Fourteen consecutive tags starting at `base`.
    pub fn from_base(base: CommTag) -> Self {
        Self {
            token: base,
            confirm: base.offset(1),
            local_r: base.offset(2),
            global: base.offset(3),
            local_s: base.offset(4),
            local_l: base.offset(5),
            apply_s: base.offset(6),
            apply_global: base.offset(7),
            apply_r: base.offset(8),
            apply_l: base.offset(9),
            transpose_s: base.offset(10),
            transpose_global: base.offset(11),
            transpose_r: base.offset(12),
            transpose_l: base.offset(13),
        }
    }
}

impl Default for TapTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x7A00))
    }
}

/// A finalized topology-aware schedule for one rank.
#[derive(Debug)]
pub struct TapComm<C: Communicator> {
    variant: TapVariant,
    topology: ProcessTopology,
    local_comm: C,
    tags: TapTags,
    owned: Range<usize>,
    plan: NodeAggregationPlan,
    partners: GlobalProcs,
    local_s: ParSchedule,
    global: ParSchedule,
    local_r: ParSchedule,
    local_l: ParSchedule,
    /// position in on-node list -> position in the dependency set
    on_node_to_off_proc: Vec<usize>,
    /// position in off-node list -> position in the dependency set
    off_node_to_off_proc: Vec<usize>,
}

impl<C: Communicator> TapComm<C> {
    /// Build the schedule. Collective over `world`.
    ///
    /// `deps` lists the columns this rank needs from other ranks; `owned` is
    /// the contiguous range of global columns it stores.
    pub fn build(
        world: &C,
        cfg: &TapConfig,
        deps: &OffProcColumns,
        owned: Range<usize>,
    ) -> Result<Self, TapError> {
        Self::build_with_tags(world, cfg, deps, owned, TapTags::default())
    }

    pub fn build_with_tags(
        world: &C,
        cfg: &TapConfig,
        deps: &OffProcColumns,
        owned: Range<usize>,
        tags: TapTags,
    ) -> Result<Self, TapError> {
        cfg.validate()?;
        let topology = ProcessTopology::new(world.rank(), world.size(), cfg)?;
        let split = partition::split_off_proc_cols(deps, &topology)?;

        let local_comm = world.split(topology.node(), topology.local_rank())?;
        if local_comm.size() != topology.ppn() || local_comm.rank() != topology.local_rank() {
            return Err(TapError::InvalidConfig(format!(
                "node group of rank {} has {} members, expected ppn {}",
                world.rank(),
                local_comm.size(),
                topology.ppn()
            )));
        }

        let plan = node_plan::gather_off_node_nodes(&local_comm, &topology, &split.off_node, cfg)?;
        let (partners, local_s, global, local_r, local_l) = match cfg.variant {
            TapVariant::ThreeStep => {
                let partners = global_procs::find_global_comm_procs(
                    world,
                    &local_comm,
                    &topology,
                    &plan,
                    tags.token,
                    tags.confirm,
                )?;
                let mut local_r =
                    local_r::form_local_r(&local_comm, &split.off_node, &plan, tags.local_r)?;
                let mut global = global_exchange::form_global_par_comm(
                    world,
                    &topology,
                    &partners,
                    &local_r,
                    tags.global,
                )?;
                let mut local_s =
                    local_s::form_local_s(&local_comm, &global, owned.start, tags.local_s)?;
                let mut local_l =
                    local_l::form_local_l(&local_comm, &split.on_node, tags.local_l)?;
                remap::adjust_send_indices(
                    &mut local_s,
                    &mut global,
                    &mut local_r.schedule,
                    &mut local_l,
                    &owned,
                )?;
                (partners, local_s, global, local_r.schedule, local_l)
            }
            TapVariant::TwoStep => {
                let mut local_r = local_r::form_simple_local_r(
                    &local_comm,
                    &topology,
                    &split.off_node,
                    tags.local_r,
                )?;
                let mut global =
                    global_exchange::form_simple_global_par_comm(world, &local_r, tags.global)?;
                let mut local_l =
                    local_l::form_local_l(&local_comm, &split.on_node, tags.local_l)?;
                remap::adjust_two_step_send_indices(
                    &mut global,
                    &mut local_r.schedule,
                    &mut local_l,
                    &owned,
                )?;
                let partners = GlobalProcs {
                    send_procs: global.send_procs().to_vec(),
                    recv_procs: global.recv_procs().to_vec(),
                };
                (partners, ParSchedule::new(), global, local_r.schedule, local_l)
            }
        };

        log::debug!(
            "rank {}: {} schedule built, {} on-node and {} off-node dependencies",
            world.rank(),
            cfg.variant,
            split.on_node.cols.len(),
            split.off_node.cols.len()
        );

        Ok(Self {
            variant: cfg.variant,
            topology,
            local_comm,
            tags,
            owned,
            plan,
            partners,
            local_s,
            global,
            local_r,
            local_l,
            on_node_to_off_proc: split.on_node.to_off_proc,
            off_node_to_off_proc: split.off_node.to_off_proc,
        })
    }

    /// Gather the values of every dependency, in dependency-set order.
    /// Collective over `world`, which must be the communicator the schedule
    /// was built on.
    pub fn communicate<T: Pod + Zero>(&self, world: &C, values: &[T]) -> Result<Vec<T>, TapError> {
        self.communicate_block(world, values, 1)
    }

    /// [`communicate`](Self::communicate) for `block` values per column.
    /// Values of one column are contiguous: `values[i * block..(i + 1) * block]`
    /// belongs to owned column `i`, and the result is laid out the same way
    /// over the dependencies.
    pub fn communicate_block<T: Pod + Zero>(
        &self,
        world: &C,
        values: &[T],
        block: usize,
    ) -> Result<Vec<T>, TapError> {
        check_len("owned values", self.owned.len() * block, values.len())?;
        let g_buf = match self.variant {
            TapVariant::ThreeStep => {
                let s_buf = exchange_values(
                    &self.local_comm,
                    &self.local_s,
                    self.tags.apply_s,
                    values,
                    block,
                )?;
                exchange_values(world, &self.global, self.tags.apply_global, &s_buf, block)?
            }
            TapVariant::TwoStep => {
                exchange_values(world, &self.global, self.tags.apply_global, values, block)?
            }
        };
        let r_buf = exchange_values(
            &self.local_comm,
            &self.local_r,
            self.tags.apply_r,
            &g_buf,
            block,
        )?;
        let l_buf = exchange_values(
            &self.local_comm,
            &self.local_l,
            self.tags.apply_l,
            values,
            block,
        )?;

        let mut out = vec![T::zero(); self.num_dependencies() * block];
        let mut scatter = |recv: &[usize], to_dep: &[usize], buf: &[T]| {
            for (&k, vals) in recv.iter().zip(buf.chunks_exact(block.max(1))) {
                let d = to_dep[k];
                out[d * block..(d + 1) * block].copy_from_slice(vals);
            }
        };
        scatter(self.local_r.recv_data.indices(), &self.off_node_to_off_proc, &r_buf);
        scatter(self.local_l.recv_data.indices(), &self.on_node_to_off_proc, &l_buf);
        Ok(out)
    }

    /// Transposed exchange: `dep_values` holds one value per dependency, in
    /// dependency-set order. Every value travels back to the column's owner
    /// (R, global, S in reverse, and L), where contributions to the same
    /// owned column are summed. Returns one value per owned column.
    pub fn communicate_t<T: Pod + Zero>(
        &self,
        world: &C,
        dep_values: &[T],
    ) -> Result<Vec<T>, TapError> {
        self.communicate_t_block(world, dep_values, 1)
    }

    /// [`communicate_t`](Self::communicate_t) for `block` values per column,
    /// laid out as in [`communicate_block`](Self::communicate_block).
    pub fn communicate_t_block<T: Pod + Zero>(
        &self,
        world: &C,
        dep_values: &[T],
        block: usize,
    ) -> Result<Vec<T>, TapError> {
        check_len(
            "dependency values",
            self.num_dependencies() * block,
            dep_values.len(),
        )?;
        let gather = |recv: &[usize], to_dep: &[usize]| {
            let mut buf = Vec::with_capacity(recv.len() * block);
            for &k in recv {
                let d = to_dep[k];
                buf.extend_from_slice(&dep_values[d * block..(d + 1) * block]);
            }
            buf
        };
        let r_src = gather(self.local_r.recv_data.indices(), &self.off_node_to_off_proc);
        let l_src = gather(self.local_l.recv_data.indices(), &self.on_node_to_off_proc);
        let n_owned = self.owned.len();

        let g_sum = exchange_values_t(
            &self.local_comm,
            &self.local_r,
            self.tags.transpose_r,
            &r_src,
            block,
            self.global.recv_data.size_msgs(),
        )?;
        let mut out = match self.variant {
            TapVariant::ThreeStep => {
                let s_sum = exchange_values_t(
                    world,
                    &self.global,
                    self.tags.transpose_global,
                    &g_sum,
                    block,
                    self.local_s.recv_data.size_msgs(),
                )?;
                exchange_values_t(
                    &self.local_comm,
                    &self.local_s,
                    self.tags.transpose_s,
                    &s_sum,
                    block,
                    n_owned,
                )?
            }
            TapVariant::TwoStep => exchange_values_t(
                world,
                &self.global,
                self.tags.transpose_global,
                &g_sum,
                block,
                n_owned,
            )?,
        };
        let l_sum = exchange_values_t(
            &self.local_comm,
            &self.local_l,
            self.tags.transpose_l,
            &l_src,
            block,
            n_owned,
        )?;
        for (o, v) in out.iter_mut().zip(l_sum) {
            *o = *o + v;
        }
        Ok(out)
    }

    /// Number of values [`communicate`](Self::communicate) returns.
    pub fn num_dependencies(&self) -> usize {
        self.on_node_to_off_proc.len() + self.off_node_to_off_proc.len()
    }

    pub fn variant(&self) -> TapVariant {
        self.variant
    }

    pub fn topology(&self) -> &ProcessTopology {
        &self.topology
    }

    pub fn local_comm(&self) -> &C {
        &self.local_comm
    }

    pub fn owned(&self) -> Range<usize> {
        self.owned.clone()
    }

    /// Remote nodes this node receives from, heaviest first. The two-step
    /// variant computes the plan too but does not route through replicas.
    pub fn recv_nodes(&self) -> &[usize] {
        self.plan.nodes()
    }

    pub fn replicas(&self) -> &[usize] {
        self.plan.replicas()
    }

    pub fn node_plan(&self) -> &NodeAggregationPlan {
        &self.plan
    }

    pub fn global_send_procs(&self) -> &[usize] {
        &self.partners.send_procs
    }

    pub fn global_recv_procs(&self) -> &[usize] {
        &self.partners.recv_procs
    }

    pub fn local_s(&self) -> &ParSchedule {
        &self.local_s
    }

    pub fn global(&self) -> &ParSchedule {
        &self.global
    }

    pub fn local_r(&self) -> &ParSchedule {
        &self.local_r
    }

    pub fn local_l(&self) -> &ParSchedule {
        &self.local_l
    }
}
