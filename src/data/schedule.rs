//! Finalized communication schedules.
//!
//! A [`CommData`] is a CSR-like list of messages: peer ranks, message
//! boundaries and one flat index array. A [`ParSchedule`] pairs the send and
//! receive halves of one communication phase. Outstanding request handles are
//! not stored here; they live only for the duration of one exchange call.

/// One message of a schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message<'a> {
    pub proc: usize,
    pub indices: &'a [usize],
}

impl Message<'_> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Ordered (peer, length, index list) entries of one direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommData {
    procs: Vec<usize>,
    indptr: Vec<usize>,
    indices: Vec<usize>,
}

impl Default for CommData {
    fn default() -> Self {
        Self {
            procs: Vec::new(),
            indptr: vec![0],
            indices: Vec::new(),
        }
    }
}

impl CommData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to `proc` carrying `indices`.
    pub fn add_msg(&mut self, proc: usize, indices: &[usize]) {
        self.procs.push(proc);
        self.indices.extend_from_slice(indices);
        self.indptr.push(self.indices.len());
    }

    /// Append a message of `len` values that land contiguously after the
    /// current end of the buffer.
    pub fn add_msg_len(&mut self, proc: usize, len: usize) {
        let start = self.indices.len();
        self.procs.push(proc);
        self.indices.extend(start..start + len);
        self.indptr.push(self.indices.len());
    }

    pub fn num_msgs(&self) -> usize {
        self.procs.len()
    }

    /// Total number of values moved by this direction.
    pub fn size_msgs(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn procs(&self) -> &[usize] {
        &self.procs
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub(crate) fn indices_mut(&mut self) -> &mut [usize] {
        &mut self.indices
    }

    pub fn msg(&self, i: usize) -> Message<'_> {
        Message {
            proc: self.procs[i],
            indices: &self.indices[self.indptr[i]..self.indptr[i + 1]],
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Message<'_>> + '_ {
        (0..self.num_msgs()).map(move |i| self.msg(i))
    }

    /// Every message's index list is strictly ascending.
    pub fn is_sorted_unique(&self) -> bool {
        self.iter()
            .all(|m| m.indices.windows(2).all(|w| w[0] < w[1]))
    }
}

/// Send and receive halves of one communication phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParSchedule {
    pub send_data: CommData,
    pub recv_data: CommData,
}

impl ParSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_procs(&self) -> &[usize] {
        self.send_data.procs()
    }

    pub fn recv_procs(&self) -> &[usize] {
        self.recv_data.procs()
    }
}
