//! Thin façade over point-to-point message passing.
//!
//! Messages are *contiguous byte slices*; typed payloads go through
//! [`crate::algs::wire`]. Everything the schedule builder needs is expressed
//! as point-to-point traffic plus a handful of collectives:
//!
//! - buffered (`isend`) and synchronous-mode (`issend`) non-blocking sends,
//! - blocking/non-blocking probe on a source + tag, and matched receive,
//! - a non-blocking barrier,
//! - `split` into sub-communicators (the node-local group),
//! - all-gather and OR/sum reductions, implemented by default on top of the
//!   point-to-point calls so a backend only has to provide the primitives;
//!   the MPI backend maps them onto the native collectives.
//!
//! Tags stay at or below [`CommTag::MAX`] (32767), the smallest upper bound
//! MPI allows an implementation to have.
//!
//! Every handle is waitable and testable. Callers always drain their send
//! handles before returning so buffers are never reused early.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::algs::wire;
use crate::tap_error::TapError;

/// Typed message tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    /// Largest tag every MPI implementation accepts.
    pub const MAX: CommTag = CommTag(0x7FFF);

    /// Reserved for the default collective implementations.
    pub const COLLECTIVE: CommTag = CommTag::MAX;

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

/// Which sender a probe or receive should match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(usize),
}

impl Source {
    #[inline]
    fn matches(self, src: usize) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(r) => r == src,
        }
    }
}

/// Envelope information of a pending message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    pub source: usize,
    pub tag: CommTag,
    /// Payload length in bytes.
    pub len: usize,
}

/// Anything that can be tested for and waited on until completion.
pub trait Wait {
    /// Non-blocking completion check. Stays `true` once it returned `true`.
    fn test(&mut self) -> Result<bool, TapError>;

    /// Block until complete.
    fn wait(self) -> Result<(), TapError>;
}

/// Wait on every handle, even after a failure, and report the first error.
pub fn wait_all<W: Wait>(handles: impl IntoIterator<Item = W>) -> Result<(), TapError> {
    let mut first = None;
    for h in handles {
        if let Err(e) = h.wait() {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// `true` once every handle has completed.
pub fn test_all<W: Wait>(handles: &mut [W]) -> Result<bool, TapError> {
    let mut done = true;
    for h in handles.iter_mut() {
        done &= h.test()?;
    }
    Ok(done)
}

/// Non-blocking communication interface.
pub trait Communicator {
    /// Handle returned by `isend` / `issend`.
    type SendHandle: Wait;
    /// Handle returned by `ibarrier`.
    type BarrierHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Buffered send: completes without the receiver's cooperation.
    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<Self::SendHandle, TapError>;

    /// Synchronous-mode send: completes only once `peer` has matched it.
    fn issend(&self, peer: usize, tag: CommTag, buf: &[u8])
    -> Result<Self::SendHandle, TapError>;

    /// Block until a message matching `source`/`tag` is pending.
    fn probe(&self, source: Source, tag: CommTag) -> Result<Status, TapError>;

    /// Return the envelope of a pending matching message, if any.
    fn iprobe(&self, source: Source, tag: CommTag) -> Result<Option<Status>, TapError>;

    /// Receive the oldest message from `source` with `tag`, blocking.
    fn recv(&self, source: usize, tag: CommTag) -> Result<Bytes, TapError>;

    fn ibarrier(&self) -> Result<Self::BarrierHandle, TapError>;

    /// Collective: group ranks by `color`, order each group by `key`.
    fn split(&self, color: usize, key: usize) -> Result<Self, TapError>
    where
        Self: Sized;

    /// Collective: every rank receives every rank's buffer, in rank order.
    fn all_gather_varcount(&self, buf: &[u8]) -> Result<Vec<Bytes>, TapError> {
        let me = self.rank();
        let mut sends = Vec::with_capacity(self.size().saturating_sub(1));
        for peer in (0..self.size()).filter(|&p| p != me) {
            sends.push(self.isend(peer, CommTag::COLLECTIVE, buf)?);
        }
        let mut out = Vec::with_capacity(self.size());
        let mut maybe_err = None;
        for peer in 0..self.size() {
            if peer == me {
                out.push(Bytes::copy_from_slice(buf));
                continue;
            }
            match self.recv(peer, CommTag::COLLECTIVE) {
                Ok(b) => out.push(b),
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            }
        }
        wait_all(sends)?;
        match maybe_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn all_gather_usize(&self, vals: &[usize]) -> Result<Vec<Vec<usize>>, TapError> {
        let parts = self.all_gather_varcount(&wire::encode_indices(vals))?;
        parts
            .iter()
            .enumerate()
            .map(|(peer, bytes)| wire::decode_indices(peer, bytes))
            .collect()
    }

    /// Collective bitwise OR of equal-length word vectors.
    fn all_reduce_bor(&self, words: &[u64]) -> Result<Vec<u64>, TapError> {
        let parts = self.all_gather_varcount(&wire::encode_words(words.iter().copied()))?;
        let mut out = vec![0u64; words.len()];
        for (peer, bytes) in parts.iter().enumerate() {
            let theirs = wire::decode_words(peer, bytes)?;
            check_reduce_len(words.len(), theirs.len())?;
            for (o, w) in out.iter_mut().zip(theirs) {
                *o |= w;
            }
        }
        Ok(out)
    }

    /// Collective element-wise sum of equal-length vectors.
    fn all_reduce_sum(&self, vals: &[usize]) -> Result<Vec<usize>, TapError> {
        let parts = self.all_gather_usize(vals)?;
        let mut out = vec![0usize; vals.len()];
        for theirs in parts {
            check_reduce_len(vals.len(), theirs.len())?;
            for (o, v) in out.iter_mut().zip(theirs) {
                *o += v;
            }
        }
        Ok(out)
    }
}

fn check_reduce_len(expected: usize, got: usize) -> Result<(), TapError> {
    if expected == got {
        Ok(())
    } else {
        Err(TapError::LengthMismatch {
            what: "reduction operand",
            expected,
            got,
        })
    }
}

// --- ThreadComm: one rank per thread inside a single process ---

struct Envelope {
    context: u32,
    source: usize,
    tag: CommTag,
    payload: Bytes,
    matched: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

struct Universe {
    mailboxes: Vec<Mailbox>,
    /// (parent context, split sequence, color) -> child context
    contexts: DashMap<(u32, u32, usize), u32>,
    next_context: AtomicU32,
    /// (context, barrier epoch) -> progress, removed once every member saw it complete
    barriers: DashMap<(u32, u32), Arc<BarrierState>>,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: AtomicUsize,
    released: AtomicUsize,
}

/// In-process communicator: each rank is a thread with its own FIFO mailbox.
///
/// Matching follows MPI rules: messages from one source with one tag on one
/// communicator are received in the order they were sent.
pub struct ThreadComm {
    universe: Arc<Universe>,
    context: u32,
    rank: usize,
    /// group rank -> world rank
    members: Arc<[usize]>,
    splits: AtomicU32,
    barriers: AtomicU32,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .finish()
    }
}

impl ThreadComm {
    /// Communicators for ranks `0..n` of a fresh world.
    pub fn world(n: usize) -> Vec<ThreadComm> {
        let universe = Arc::new(Universe {
            mailboxes: (0..n).map(|_| Mailbox::default()).collect(),
            contexts: DashMap::new(),
            next_context: AtomicU32::new(1),
            barriers: DashMap::new(),
        });
        let members: Arc<[usize]> = (0..n).collect();
        (0..n)
            .map(|rank| ThreadComm {
                universe: Arc::clone(&universe),
                context: 0,
                rank,
                members: Arc::clone(&members),
                splits: AtomicU32::new(0),
                barriers: AtomicU32::new(0),
            })
            .collect()
    }

    /// World rank of the calling thread.
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn check_peer(&self, peer: usize) -> Result<(), TapError> {
        if peer < self.members.len() {
            Ok(())
        } else {
            Err(TapError::RankOutOfRange {
                rank: peer,
                size: self.members.len(),
            })
        }
    }

    fn mailbox_of(&self, peer: usize) -> &Mailbox {
        &self.universe.mailboxes[self.members[peer]]
    }

    fn post(
        &self,
        peer: usize,
        tag: CommTag,
        buf: &[u8],
        matched: Option<Arc<AtomicBool>>,
    ) -> Result<(), TapError> {
        self.check_peer(peer)?;
        let mb = self.mailbox_of(peer);
        mb.queue.lock().push_back(Envelope {
            context: self.context,
            source: self.rank,
            tag,
            payload: Bytes::copy_from_slice(buf),
            matched,
        });
        mb.arrived.notify_all();
        Ok(())
    }

    fn position(&self, queue: &VecDeque<Envelope>, source: Source, tag: CommTag) -> Option<usize> {
        queue
            .iter()
            .position(|e| e.context == self.context && e.tag == tag && source.matches(e.source))
    }
}

/// Handle of a [`ThreadComm`] send.
#[derive(Debug)]
pub struct ThreadSendHandle {
    matched: Option<Arc<AtomicBool>>,
}

impl Wait for ThreadSendHandle {
    fn test(&mut self) -> Result<bool, TapError> {
        Ok(self
            .matched
            .as_ref()
            .is_none_or(|m| m.load(Ordering::Acquire)))
    }

    fn wait(mut self) -> Result<(), TapError> {
        while !self.test()? {
            std::thread::yield_now();
        }
        Ok(())
    }
}

/// Handle of a [`ThreadComm`] non-blocking barrier.
pub struct ThreadBarrierHandle {
    universe: Arc<Universe>,
    key: (u32, u32),
    state: Arc<BarrierState>,
    expected: usize,
    released: bool,
}

impl fmt::Debug for ThreadBarrierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBarrierHandle")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("expected", &self.expected)
            .finish()
    }
}

impl Wait for ThreadBarrierHandle {
    fn test(&mut self) -> Result<bool, TapError> {
        if self.released {
            return Ok(true);
        }
        if self.state.arrived.load(Ordering::Acquire) < self.expected {
            return Ok(false);
        }
        self.released = true;
        // every member arrived before anyone could get here, so the last one
        // to observe completion can drop the registry entry
        if self.state.released.fetch_add(1, Ordering::AcqRel) + 1 == self.expected {
            self.universe.barriers.remove(&self.key);
        }
        Ok(true)
    }

    fn wait(mut self) -> Result<(), TapError> {
        while !self.test()? {
            std::thread::yield_now();
        }
        Ok(())
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSendHandle;
    type BarrierHandle = ThreadBarrierHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<ThreadSendHandle, TapError> {
        self.post(peer, tag, buf, None)?;
        Ok(ThreadSendHandle { matched: None })
    }

    fn issend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<ThreadSendHandle, TapError> {
        let matched = Arc::new(AtomicBool::new(false));
        self.post(peer, tag, buf, Some(Arc::clone(&matched)))?;
        Ok(ThreadSendHandle {
            matched: Some(matched),
        })
    }

    fn probe(&self, source: Source, tag: CommTag) -> Result<Status, TapError> {
        if let Source::Rank(r) = source {
            self.check_peer(r)?;
        }
        let mb = self.mailbox_of(self.rank);
        let mut queue = mb.queue.lock();
        loop {
            if let Some(env) = self
                .position(&queue, source, tag)
                .and_then(|i| queue.get(i))
            {
                return Ok(Status {
                    source: env.source,
                    tag,
                    len: env.payload.len(),
                });
            }
            mb.arrived.wait(&mut queue);
        }
    }

    fn iprobe(&self, source: Source, tag: CommTag) -> Result<Option<Status>, TapError> {
        let queue = self.mailbox_of(self.rank).queue.lock();
        Ok(self
            .position(&queue, source, tag)
            .and_then(|i| queue.get(i))
            .map(|env| Status {
                source: env.source,
                tag,
                len: env.payload.len(),
            }))
    }

    fn recv(&self, source: usize, tag: CommTag) -> Result<Bytes, TapError> {
        self.check_peer(source)?;
        let mb = self.mailbox_of(self.rank);
        let mut queue = mb.queue.lock();
        loop {
            if let Some(env) = self
                .position(&queue, Source::Rank(source), tag)
                .and_then(|i| queue.remove(i))
            {
                if let Some(m) = env.matched {
                    m.store(true, Ordering::Release);
                }
                return Ok(env.payload);
            }
            mb.arrived.wait(&mut queue);
        }
    }

    fn ibarrier(&self) -> Result<ThreadBarrierHandle, TapError> {
        let epoch = self.barriers.fetch_add(1, Ordering::Relaxed);
        let key = (self.context, epoch);
        let state = Arc::clone(
            &*self
                .universe
                .barriers
                .entry(key)
                .or_insert_with(|| Arc::new(BarrierState::default())),
        );
        state.arrived.fetch_add(1, Ordering::AcqRel);
        Ok(ThreadBarrierHandle {
            universe: Arc::clone(&self.universe),
            key,
            state,
            expected: self.size(),
            released: false,
        })
    }

    fn split(&self, color: usize, key: usize) -> Result<Self, TapError> {
        let seq = self.splits.fetch_add(1, Ordering::Relaxed);
        let all = self.all_gather_usize(&[color, key])?;
        let mut group = Vec::new();
        for (r, ck) in all.iter().enumerate() {
            if ck.len() != 2 {
                return Err(TapError::LengthMismatch {
                    what: "split (color, key)",
                    expected: 2,
                    got: ck.len(),
                });
            }
            if ck[0] == color {
                group.push((ck[1], r));
            }
        }
        group.sort_unstable();
        let rank = group
            .iter()
            .position(|&(_, r)| r == self.rank)
            .ok_or_else(|| TapError::comm(self.rank, "split lost the calling rank"))?;
        let members: Arc<[usize]> = group.iter().map(|&(_, r)| self.members[r]).collect();
        let universe = &self.universe;
        let context = *universe
            .contexts
            .entry((self.context, seq, color))
            .or_insert_with(|| universe.next_context.fetch_add(1, Ordering::Relaxed));
        Ok(ThreadComm {
            universe: Arc::clone(&self.universe),
            context,
            rank,
            members,
            splits: AtomicU32::new(0),
            barriers: AtomicU32::new(0),
        })
    }
}

/// Run `f` on every rank of an `n`-rank [`ThreadComm`] world and collect the
/// results in rank order. A panic on any rank is re-raised here.
pub fn run_world<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(r) => r,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::collective::{CommunicatorCollectives as _, SystemOperation};
    use mpi::datatype::{Equivalence as _, PartitionMut};
    use mpi::point_to_point::{Destination as _, Source as _};
    use mpi::request::StaticScope;
    use mpi::topology::{Color, Communicator as _, SimpleCommunicator};

    fn mpi_tag(tag: CommTag) -> Result<i32, TapError> {
        if tag > CommTag::MAX {
            return Err(TapError::InvalidConfig(format!(
                "tag {} exceeds the portable MPI limit {}",
                tag.as_u16(),
                CommTag::MAX.as_u16()
            )));
        }
        Ok(i32::from(tag.as_u16()))
    }

    /// Wrapper over an MPI communicator.
    pub struct MpiComm {
        comm: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Arc<mpi::environment::Universe>,
    }

    impl MpiComm {
        /// Initialize MPI and wrap `MPI_COMM_WORLD`.
        pub fn new() -> Result<Self, TapError> {
            let universe = mpi::initialize()
                .ok_or_else(|| TapError::comm(0, "MPI was already initialized"))?;
            let comm = universe.world();
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Ok(Self {
                comm,
                rank,
                size,
                _universe: Arc::new(universe),
            })
        }

        fn post(
            &self,
            peer: usize,
            tag: CommTag,
            buf: &[u8],
            synchronous: bool,
        ) -> Result<MpiHandle, TapError> {
            if peer >= self.size {
                return Err(TapError::RankOutOfRange {
                    rank: peer,
                    size: self.size,
                });
            }
            let tag = mpi_tag(tag)?;
            // The buffer must outlive the request; it is reclaimed on completion.
            let data: &'static [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let raw = data as *const [u8] as *mut [u8];
            let process = self.comm.process_at_rank(peer as i32);
            let req = if synchronous {
                process.immediate_synchronous_send_with_tag(StaticScope, data, tag)
            } else {
                process.immediate_send_with_tag(StaticScope, data, tag)
            };
            let mut pending = Some(req);
            Ok(MpiHandle {
                poll: Box::new(move || match pending.take() {
                    None => true,
                    Some(r) => match r.test() {
                        Ok(_) => {
                            // SAFETY: `raw` came from `Box::leak` above and the
                            // request that borrowed it has completed.
                            unsafe { drop(Box::from_raw(raw)) };
                            true
                        }
                        Err(r) => {
                            pending = Some(r);
                            false
                        }
                    },
                }),
                done: false,
            })
        }
    }

    /// Waitable MPI request.
    pub struct MpiHandle {
        poll: Box<dyn FnMut() -> bool>,
        done: bool,
    }

    impl Wait for MpiHandle {
        fn test(&mut self) -> Result<bool, TapError> {
            if !self.done {
                self.done = (self.poll)();
            }
            Ok(self.done)
        }

        fn wait(mut self) -> Result<(), TapError> {
            while !self.test()? {
                std::hint::spin_loop();
            }
            Ok(())
        }
    }

    fn status_of(st: mpi::point_to_point::Status, tag: CommTag) -> Status {
        Status {
            source: st.source_rank() as usize,
            tag,
            len: st.count(u8::equivalent_datatype()) as usize,
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type BarrierHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<MpiHandle, TapError> {
            self.post(peer, tag, buf, false)
        }

        fn issend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<MpiHandle, TapError> {
            self.post(peer, tag, buf, true)
        }

        fn probe(&self, source: Source, tag: CommTag) -> Result<Status, TapError> {
            let t = mpi_tag(tag)?;
            let st = match source {
                Source::Any => self.comm.any_process().probe_with_tag(t),
                Source::Rank(r) => self.comm.process_at_rank(r as i32).probe_with_tag(t),
            };
            Ok(status_of(st, tag))
        }

        fn iprobe(&self, source: Source, tag: CommTag) -> Result<Option<Status>, TapError> {
            let t = mpi_tag(tag)?;
            let st = match source {
                Source::Any => self.comm.any_process().immediate_probe_with_tag(t),
                Source::Rank(r) => self
                    .comm
                    .process_at_rank(r as i32)
                    .immediate_probe_with_tag(t),
            };
            Ok(st.map(|s| status_of(s, tag)))
        }

        fn recv(&self, source: usize, tag: CommTag) -> Result<Bytes, TapError> {
            if source >= self.size {
                return Err(TapError::RankOutOfRange {
                    rank: source,
                    size: self.size,
                });
            }
            let (data, _status) = self
                .comm
                .process_at_rank(source as i32)
                .receive_vec_with_tag::<u8>(mpi_tag(tag)?);
            Ok(Bytes::from(data))
        }

        fn ibarrier(&self) -> Result<MpiHandle, TapError> {
            let mut pending = Some(self.comm.immediate_barrier());
            Ok(MpiHandle {
                poll: Box::new(move || match pending.take() {
                    None => true,
                    Some(r) => match r.test() {
                        Ok(_) => true,
                        Err(r) => {
                            pending = Some(r);
                            false
                        }
                    },
                }),
                done: false,
            })
        }

        fn split(&self, color: usize, key: usize) -> Result<Self, TapError> {
            let comm = self
                .comm
                .split_by_color_with_key(Color::with_value(color as i32), key as i32)
                .ok_or_else(|| TapError::comm(self.rank, "communicator split returned no group"))?;
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Ok(Self {
                comm,
                rank,
                size,
                _universe: Arc::clone(&self._universe),
            })
        }

        fn all_gather_varcount(&self, buf: &[u8]) -> Result<Vec<Bytes>, TapError> {
            let len = Count::try_from(buf.len())
                .map_err(|_| TapError::comm(self.rank, "all-gather payload too large"))?;
            let mut counts: Vec<Count> = vec![0; self.size];
            self.comm.all_gather_into(&len, &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0, |acc, &c| {
                    let start = *acc;
                    *acc += c;
                    Some(start)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut all = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut all[..], &counts[..], &displs[..]);
                self.comm.all_gather_varcount_into(buf, &mut partition);
            }
            let all = Bytes::from(all);
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| all.slice(d as usize..(d + c) as usize))
                .collect())
        }

        fn all_reduce_bor(&self, words: &[u64]) -> Result<Vec<u64>, TapError> {
            self.check_uniform_len(words.len())?;
            let mut out = vec![0u64; words.len()];
            self.comm
                .all_reduce_into(words, &mut out[..], SystemOperation::bitwise_or());
            Ok(out)
        }

        fn all_reduce_sum(&self, vals: &[usize]) -> Result<Vec<usize>, TapError> {
            self.check_uniform_len(vals.len())?;
            let mine: Vec<u64> = vals.iter().map(|&v| v as u64).collect();
            let mut out = vec![0u64; vals.len()];
            self.comm
                .all_reduce_into(&mine[..], &mut out[..], SystemOperation::sum());
            out.into_iter()
                .map(|v| {
                    usize::try_from(v)
                        .map_err(|_| TapError::comm(self.rank, format!("sum {v} overflows usize")))
                })
                .collect()
        }
    }

    impl MpiComm {
        /// Native reductions need equal operand lengths on every rank.
        fn check_uniform_len(&self, len: usize) -> Result<(), TapError> {
            let mine = [len as u64, !(len as u64)];
            let mut bounds = [0u64; 2];
            self.comm
                .all_reduce_into(&mine[..], &mut bounds[..], SystemOperation::max());
            let (longest, shortest) = (bounds[0] as usize, !bounds[1] as usize);
            if longest != len || shortest != len {
                return Err(TapError::LengthMismatch {
                    what: "reduction operand",
                    expected: len,
                    got: if longest != len { longest } else { shortest },
                });
            }
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_two_ranks() {
        let got = run_world(2, |comm| {
            let tag = CommTag::new(7);
            if comm.rank() == 0 {
                let s = comm.isend(1, tag, &[1, 2, 3, 4]).unwrap();
                s.wait().unwrap();
                Vec::new()
            } else {
                comm.recv(0, tag).unwrap().to_vec()
            }
        });
        assert_eq!(got[1], vec![1, 2, 3, 4]);
    }

    #[test]
    fn fifo_per_source_and_tag_isolation() {
        let comms = ThreadComm::world(2);
        let (a, b) = (&comms[0], &comms[1]);
        let (t1, t2) = (CommTag::new(1), CommTag::new(2));
        a.isend(1, t2, b"x").unwrap();
        a.isend(1, t1, b"first").unwrap();
        a.isend(1, t1, b"second").unwrap();
        assert_eq!(&b.recv(0, t1).unwrap()[..], b"first");
        assert_eq!(&b.recv(0, t1).unwrap()[..], b"second");
        assert_eq!(&b.recv(0, t2).unwrap()[..], b"x");
        assert!(b.iprobe(Source::Any, t1).unwrap().is_none());
    }

    #[test]
    fn issend_completes_only_when_matched() {
        let comms = ThreadComm::world(2);
        let tag = CommTag::new(3);
        let mut h = comms[0].issend(1, tag, &[9]).unwrap();
        assert!(!h.test().unwrap());
        let st = comms[1].iprobe(Source::Any, tag).unwrap().unwrap();
        assert_eq!(st.source, 0);
        assert_eq!(st.len, 1);
        // probing does not match
        assert!(!h.test().unwrap());
        comms[1].recv(0, tag).unwrap();
        assert!(h.test().unwrap());
    }

    #[test]
    fn ibarrier_completes_after_all_arrive() {
        let comms = ThreadComm::world(3);
        let mut h0 = comms[0].ibarrier().unwrap();
        let mut h1 = comms[1].ibarrier().unwrap();
        assert!(!h0.test().unwrap());
        let mut h2 = comms[2].ibarrier().unwrap();
        assert!(h0.test().unwrap() && h1.test().unwrap() && h2.test().unwrap());
        // a second epoch is independent of the first
        let mut again = comms[0].ibarrier().unwrap();
        assert!(!again.test().unwrap());
    }

    #[test]
    fn completed_barriers_leave_no_registry_entry() {
        let comms = ThreadComm::world(2);
        let registry = || comms[0].universe.barriers.len();
        for _ in 0..3 {
            let mut a = comms[0].ibarrier().unwrap();
            let mut b = comms[1].ibarrier().unwrap();
            assert!(a.test().unwrap());
            assert_eq!(registry(), 1);
            // testing twice does not count twice
            assert!(a.test().unwrap());
            assert_eq!(registry(), 1);
            b.wait().unwrap();
            assert_eq!(registry(), 0);
        }
    }

    #[test]
    fn split_and_collectives() {
        let out = run_world(6, |comm| {
            let sub = comm.split(comm.rank() % 2, comm.rank()).unwrap();
            let gathered = sub.all_gather_usize(&[comm.rank()]).unwrap();
            let sum = sub.all_reduce_sum(&[1, comm.rank()]).unwrap();
            let or = comm.all_reduce_bor(&[1u64 << comm.rank()]).unwrap();
            (sub.rank(), sub.size(), gathered, sum, or)
        });
        for (world, (sub_rank, sub_size, gathered, sum, or)) in out.into_iter().enumerate() {
            assert_eq!(sub_size, 3);
            assert_eq!(sub_rank, world / 2);
            let want: Vec<Vec<usize>> = (0..6)
                .filter(|r| r % 2 == world % 2)
                .map(|r| vec![r])
                .collect();
            assert_eq!(gathered, want);
            let rank_sum: usize = (0..6).filter(|r| r % 2 == world % 2).sum();
            assert_eq!(sum, vec![3, rank_sum]);
            assert_eq!(or, vec![0b11_1111]);
        }
    }

    #[test]
    fn out_of_range_peer_is_an_error() {
        let comms = ThreadComm::world(1);
        assert!(matches!(
            comms[0].isend(4, CommTag::new(1), &[]),
            Err(TapError::RankOutOfRange { rank: 4, size: 1 })
        ));
    }
}
