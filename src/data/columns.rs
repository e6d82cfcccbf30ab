//! Off-process column dependencies supplied by the matrix/vector owner.

use hashbrown::HashSet;

use crate::tap_error::TapError;

/// Global columns a process needs but does not store, each with its owner.
///
/// Every column appears once and maps to exactly one owning process. The
/// position of a column in this set is the position its value takes in the
/// gathered output of an exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffProcColumns {
    cols: Vec<usize>,
    owners: Vec<usize>,
}

impl OffProcColumns {
    /// # Errors
    /// `LengthMismatch` if the arrays differ in length, `DuplicateColumn` if a
    /// column is listed twice.
    pub fn new(cols: Vec<usize>, owners: Vec<usize>) -> Result<Self, TapError> {
        if cols.len() != owners.len() {
            return Err(TapError::LengthMismatch {
                what: "column owners",
                expected: cols.len(),
                got: owners.len(),
            });
        }
        let mut seen = HashSet::with_capacity(cols.len());
        for &c in &cols {
            if !seen.insert(c) {
                return Err(TapError::DuplicateColumn(c));
            }
        }
        Ok(Self { cols, owners })
    }

    /// Resolve owners from a contiguous column partition: process `p` owns
    /// `col_starts[p]..col_starts[p + 1]`.
    pub fn from_col_starts(cols: Vec<usize>, col_starts: &[usize]) -> Result<Self, TapError> {
        let num_procs = col_starts.len().saturating_sub(1);
        let global_cols = col_starts.last().copied().unwrap_or(0);
        let mut owners = Vec::with_capacity(cols.len());
        for &c in &cols {
            if c >= global_cols {
                return Err(TapError::MissingIndex {
                    index: c,
                    buffer: "global column partition",
                });
            }
            // last process whose range starts at or before `c`
            let owner = col_starts.partition_point(|&s| s <= c) - 1;
            owners.push(owner.min(num_procs.saturating_sub(1)));
        }
        Self::new(cols, owners)
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (usize, usize)> + '_ {
        self.cols.iter().copied().zip(self.owners.iter().copied())
    }
}
