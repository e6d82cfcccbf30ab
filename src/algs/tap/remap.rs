//! Rewriting global-column send indices into buffer positions.
//!
//! Construction records send indices as global columns. Execution needs
//! positions in the buffer each phase reads from:
//!
//! | phase  | send index refers to                        |
//! |--------|---------------------------------------------|
//! | S, L   | the caller's owned values                   |
//! | global | the flattened receive buffer of S           |
//! | R      | the flattened receive buffer of global      |
//!
//! Without an S phase (two-step) the global phase reads owned values too.
//!
//! A column with no position upstream is an error, never a silent default.

use std::ops::Range;

use hashbrown::HashMap;

use crate::data::schedule::{CommData, ParSchedule};
use crate::tap_error::TapError;

/// Position of each global column in a phase's receive buffer. The first
/// occurrence wins.
pub fn position_map(recv: &CommData) -> HashMap<usize, usize> {
    let mut map = HashMap::with_capacity(recv.size_msgs());
    for (pos, &col) in recv.indices().iter().enumerate() {
        map.entry(col).or_insert(pos);
    }
    map
}

/// Replace each index by its position in `map`.
pub fn remap_through(
    indices: &mut [usize],
    map: &HashMap<usize, usize>,
    buffer: &'static str,
) -> Result<(), TapError> {
    for idx in indices.iter_mut() {
        let col = *idx;
        *idx = *map
            .get(&col)
            .ok_or(TapError::MissingIndex { index: col, buffer })?;
    }
    Ok(())
}

/// Replace each owned global column by its offset in `owned`.
pub fn remap_owned(indices: &mut [usize], owned: &Range<usize>) -> Result<(), TapError> {
    for idx in indices.iter_mut() {
        if !owned.contains(idx) {
            return Err(TapError::MissingIndex {
                index: *idx,
                buffer: "owned values",
            });
        }
        *idx -= owned.start;
    }
    Ok(())
}

/// Remap every phase's send indices. Each must run exactly once on freshly
/// built schedules: the global and R maps are computed from receive indices,
/// which remapping never touches.
pub fn adjust_send_indices(
    local_s: &mut ParSchedule,
    global: &mut ParSchedule,
    local_r: &mut ParSchedule,
    local_l: &mut ParSchedule,
    owned: &Range<usize>,
) -> Result<(), TapError> {
    remap_owned(local_s.send_data.indices_mut(), owned)?;
    remap_owned(local_l.send_data.indices_mut(), owned)?;

    let s_positions = position_map(&local_s.recv_data);
    remap_through(global.send_data.indices_mut(), &s_positions, "S receive")?;

    let g_positions = position_map(&global.recv_data);
    remap_through(local_r.send_data.indices_mut(), &g_positions, "global receive")?;
    Ok(())
}

/// Remap a two-step schedule, which has no S phase.
pub fn adjust_two_step_send_indices(
    global: &mut ParSchedule,
    local_r: &mut ParSchedule,
    local_l: &mut ParSchedule,
    owned: &Range<usize>,
) -> Result<(), TapError> {
    remap_owned(global.send_data.indices_mut(), owned)?;
    remap_owned(local_l.send_data.indices_mut(), owned)?;

    let g_positions = position_map(&global.recv_data);
    remap_through(local_r.send_data.indices_mut(), &g_positions, "global receive")?;
    Ok(())
}
