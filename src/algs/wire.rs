//! Fixed little-endian wire types for schedule construction and execution.
//!
//! Index payloads (global columns, node ids, ranks, bitset words) travel as
//! `u64` little-endian words. Value payloads are `Pod` slices shipped as-is.
//! Decoders never assume alignment of the received bytes.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

use crate::tap_error::TapError;

/// One index word on the wire.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIndex {
    pub id_le: u64,
}

impl WireIndex {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }

    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

assert_eq_size!(WireIndex, u64);

pub fn encode_words(words: impl IntoIterator<Item = u64>) -> Vec<u8> {
    let wire: Vec<WireIndex> = words.into_iter().map(WireIndex::of).collect();
    bytemuck::cast_slice(&wire).to_vec()
}

pub fn encode_indices(indices: &[usize]) -> Vec<u8> {
    encode_words(indices.iter().map(|&i| i as u64))
}

pub fn decode_words(peer: usize, bytes: &[u8]) -> Result<Vec<u64>, TapError> {
    let w = size_of::<WireIndex>();
    if bytes.len() % w != 0 {
        return Err(TapError::PayloadSize {
            peer,
            expected: bytes.len() / w * w,
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(w)
        .map(|c| bytemuck::pod_read_unaligned::<WireIndex>(c).get())
        .collect())
}

pub fn decode_indices(peer: usize, bytes: &[u8]) -> Result<Vec<usize>, TapError> {
    decode_words(peer, bytes)?
        .into_iter()
        .map(|w| usize::try_from(w).map_err(|_| TapError::comm(peer, format!("index {w} overflows usize"))))
        .collect()
}

/// Raw bytes of a value slice.
pub fn value_bytes<T: Pod>(values: &[T]) -> &[u8] {
    bytemuck::cast_slice(values)
}

/// Decode exactly `expected` values of `T`.
pub fn decode_values<T: Pod>(peer: usize, bytes: &[u8], expected: usize) -> Result<Vec<T>, TapError> {
    let w = size_of::<T>();
    if bytes.len() != expected * w {
        return Err(TapError::PayloadSize {
            peer,
            expected: expected * w,
            got: bytes.len(),
        });
    }
    if w == 0 {
        return Ok(vec![T::zeroed(); expected]);
    }
    Ok(bytes.chunks_exact(w).map(bytemuck::pod_read_unaligned).collect())
}
