//! Row ordering guard

use crate::error::{Error, Result};

/// Tracks which rows of an image have been written
///
/// Rows must be written in strictly ascending order without gaps. The
/// sequence may restart from row 0 until it is sealed by the commit; after
/// that every row is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSequence {
    total: u32,
    next: u32,
    sealed: bool,
}

impl RowSequence {
    /// Sequence over `total` rows
    pub fn new(total: u32) -> Self {
        Self {
            total,
            next: 0,
            sealed: false,
        }
    }

    /// Whether `row` may be written now
    pub fn check(&self, row: u32) -> Result<()> {
        if self.sealed || row >= self.total {
            return Err(Error::RowOutOfOrder);
        }
        if row == self.next || row == 0 || row + 1 == self.next {
            Ok(())
        } else {
            Err(Error::RowOutOfOrder)
        }
    }

    /// Note a successful write of `row`
    pub fn record(&mut self, row: u32) {
        self.next = row + 1;
    }

    /// Check and record in one go
    pub fn accept(&mut self, row: u32) -> Result<()> {
        self.check(row)?;
        self.record(row);
        Ok(())
    }

    /// Refuse all further rows
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Sealed by a commit
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Next row expected
    pub fn next(&self) -> u32 {
        self.next
    }

    /// Rows in the image
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Every row written
    pub fn is_complete(&self) -> bool {
        self.next == self.total
    }
}
