//! Rows of positional cell values.

use crate::types::Cell;

/// A complete row of data from one source, or one merged output row.
///
/// [`Row`] contains a vector of [`Cell`] values positionally correlated to
/// some schema: the source's own schema on ingestion, the union schema on
/// emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Cell values in field order.
    values: Vec<Cell>,
}

impl Row {
    /// Creates a new row with the given cell values.
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Creates a row of `len` null cells.
    ///
    /// Used to allocate output rows sized to the union schema before routing
    /// source values into their mapped positions.
    pub fn nulls(len: usize) -> Self {
        Self {
            values: vec![Cell::Null; len],
        }
    }

    /// Returns the row values in field order.
    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Returns mutable access to the row values in field order.
    pub fn values_mut(&mut self) -> &mut Vec<Cell> {
        &mut self.values
    }

    /// Consumes the row and returns its values in field order.
    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }

    /// Returns the number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Cell>> for Row {
    fn from(values: Vec<Cell>) -> Self {
        Self::new(values)
    }
}
