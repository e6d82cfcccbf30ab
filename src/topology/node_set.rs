//! Fixed-size bitset over node ids.

/// One bit per node; the universe size is fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeSet {
    words: Vec<u64>,
    num_nodes: usize,
}

const WORD_BITS: usize = u64::BITS as usize;

impl NodeSet {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            words: vec![0; num_nodes.div_ceil(WORD_BITS)],
            num_nodes,
        }
    }

    /// Rebuild a set from words produced by [`NodeSet::words`] on a peer.
    pub fn from_words(num_nodes: usize, words: Vec<u64>) -> Self {
        debug_assert_eq!(words.len(), num_nodes.div_ceil(WORD_BITS));
        Self { words, num_nodes }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn insert(&mut self, node: usize) {
        debug_assert!(node < self.num_nodes);
        self.words[node / WORD_BITS] |= 1u64 << (node % WORD_BITS);
    }

    pub fn contains(&self, node: usize) -> bool {
        node < self.num_nodes && (self.words[node / WORD_BITS] >> (node % WORD_BITS)) & 1 == 1
    }

    /// In-place union with another set over the same universe.
    pub fn union_with(&mut self, other: &NodeSet) {
        debug_assert_eq!(self.num_nodes, other.num_nodes);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..WORD_BITS)
                .filter(move |b| (w >> b) & 1 == 1)
                .map(move |b| i * WORD_BITS + b)
        })
    }
}

impl Extend<usize> for NodeSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for n in iter {
            self.insert(n);
        }
    }
}
