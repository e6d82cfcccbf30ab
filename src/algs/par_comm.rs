//! Direct point-to-point schedule: every rank talks to every owner it needs
//! data from. Used as the reference a topology-aware schedule must agree
//! with, and as the baseline in benchmarks.

use std::ops::Range;

use bytemuck::Pod;
use itertools::Itertools;
use num_traits::Zero;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{exchange_values, exchange_values_t};
use crate::algs::index_exchange::{count_incoming, exchange_index_lists};
use crate::algs::permute::sort_permutation_by;
use crate::algs::tap::remap::remap_owned;
use crate::data::columns::OffProcColumns;
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;

/// Pairwise schedule with one message per (receiver, owner) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParComm {
    schedule: ParSchedule,
    owned: Range<usize>,
    tag: CommTag,
    num_deps: usize,
}

impl ParComm {
    /// Build the schedule. Collective over `world`; `tag` is used for the
    /// request round, `tag.offset(1)` for every later exchange and
    /// `tag.offset(2)` for transposed exchanges.
    pub fn build<C: Communicator>(
        world: &C,
        deps: &OffProcColumns,
        owned: Range<usize>,
        tag: CommTag,
    ) -> Result<Self, TapError> {
        let perm = sort_permutation_by(deps.owners(), |a, b| a.cmp(b));
        let mut schedule = ParSchedule::new();
        let mut outgoing = Vec::new();
        let mut flags = vec![0usize; world.size()];
        for (owner, group) in &perm.iter().chunk_by(|&&i| deps.owners()[i]) {
            if owner >= world.size() {
                return Err(TapError::RankOutOfRange {
                    rank: owner,
                    size: world.size(),
                });
            }
            let positions: Vec<usize> = group.copied().collect();
            schedule.recv_data.add_msg(owner, &positions);
            flags[owner] = 1;
            outgoing.push((owner, positions.iter().map(|&i| deps.cols()[i]).collect()));
        }

        let n_incoming = count_incoming(world, &flags)?;
        for (src, cols) in exchange_index_lists(world, &outgoing, n_incoming, tag)? {
            schedule.send_data.add_msg(src, &cols);
        }
        remap_owned(schedule.send_data.indices_mut(), &owned)?;
        Ok(Self {
            schedule,
            owned,
            tag,
            num_deps: deps.len(),
        })
    }

    /// Gather the values of every dependency, in dependency-set order.
    pub fn communicate<C, T>(&self, world: &C, values: &[T]) -> Result<Vec<T>, TapError>
    where
        C: Communicator,
        T: Pod + Zero,
    {
        self.communicate_block(world, values, 1)
    }

    /// [`communicate`](Self::communicate) for `block` values per column,
    /// stored contiguously per column.
    pub fn communicate_block<C, T>(
        &self,
        world: &C,
        values: &[T],
        block: usize,
    ) -> Result<Vec<T>, TapError>
    where
        C: Communicator,
        T: Pod + Zero,
    {
        check_len("owned values", self.owned.len() * block, values.len())?;
        let buf = exchange_values(world, &self.schedule, self.tag.offset(1), values, block)?;
        let mut out = vec![T::zero(); self.num_deps * block];
        for (j, &k) in self.schedule.recv_data.indices().iter().enumerate() {
            out[k * block..(k + 1) * block].copy_from_slice(&buf[j * block..(j + 1) * block]);
        }
        Ok(out)
    }

    /// Transposed exchange: send one value per dependency back to its owner,
    /// which receives the sum of all contributions per owned column.
    pub fn communicate_t<C, T>(&self, world: &C, dep_values: &[T]) -> Result<Vec<T>, TapError>
    where
        C: Communicator,
        T: Pod + Zero,
    {
        self.communicate_t_block(world, dep_values, 1)
    }

    pub fn communicate_t_block<C, T>(
        &self,
        world: &C,
        dep_values: &[T],
        block: usize,
    ) -> Result<Vec<T>, TapError>
    where
        C: Communicator,
        T: Pod + Zero,
    {
        check_len("dependency values", self.num_deps * block, dep_values.len())?;
        let mut src = Vec::with_capacity(self.schedule.recv_data.size_msgs() * block);
        for &k in self.schedule.recv_data.indices() {
            src.extend_from_slice(&dep_values[k * block..(k + 1) * block]);
        }
        exchange_values_t(
            world,
            &self.schedule,
            self.tag.offset(2),
            &src,
            block,
            self.owned.len(),
        )
    }

    pub fn schedule(&self) -> &ParSchedule {
        &self.schedule
    }
}

pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), TapError> {
    if expected == got {
        Ok(())
    } else {
        Err(TapError::LengthMismatch {
            what,
            expected,
            got,
        })
    }
}
