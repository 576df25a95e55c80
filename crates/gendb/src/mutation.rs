//! In-place mutations of the encrypted table.
//!
//! Updates are additive: the encrypted value is added to the stored slot,
//! which must therefore hold zero for the update to act as a write. Use
//! [`MutationEngine::reset_then_set`] to overwrite a known value.

use gendb_traits::HomomorphicBackend;
use log::{debug, info};

use crate::{EncryptedStore, Error, Result, SchemeContext};

/// Engine mutating an encrypted table.
pub struct MutationEngine<'a, B: HomomorphicBackend> {
    context: &'a SchemeContext<B>,
    store: &'a mut EncryptedStore<B>,
}

impl<'a, B: HomomorphicBackend> MutationEngine<'a, B> {
    /// Create an engine mutating `store`.
    pub fn new(context: &'a SchemeContext<B>, store: &'a mut EncryptedStore<B>) -> Self {
        Self { context, store }
    }

    /// Add `value` to the cell at `(row, column)`. The value must lie below
    /// the bound of the column.
    pub fn update_one_value(&mut self, row: usize, column: usize, value: u64) -> Result<()> {
        let (chunk, slot) = self.store.locate(row)?;
        self.store.check_value(column, value)?;
        let delta = self.lane_vector(slot, value)?;
        self.context
            .add_assign(self.store.chunk_mut(column, chunk)?, &delta)?;
        debug!("Updated row {row}, column {column}");
        Ok(())
    }

    /// Add `values` to the cells of `row`, one value per column.
    pub fn update_one_row(&mut self, row: usize, values: &[u64]) -> Result<()> {
        self.check_row(values)?;
        let (chunk, slot) = self.store.locate(row)?;
        for (column, value) in values.iter().enumerate() {
            let delta = self.lane_vector(slot, *value)?;
            self.context
                .add_assign(self.store.chunk_mut(column, chunk)?, &delta)?;
        }
        debug!("Updated row {row}");
        Ok(())
    }

    /// Write `values` at row `num_rows + 1`. The table does not grow: the row
    /// must fall within the allocated chunks, and it is not seen by the row
    /// mask of the queries.
    pub fn insert_one_row(&mut self, values: &[u64]) -> Result<usize> {
        let row = self.store.num_rows() + 1;
        self.update_one_row(row, values)?;
        info!("Inserted row {row}");
        Ok(row)
    }

    /// Zero `row` by subtracting its current values, which the caller must
    /// know.
    pub fn delete_row_addition(&mut self, row: usize, current_values: &[u64]) -> Result<()> {
        self.check_row_length(current_values)?;
        let (chunk, slot) = self.store.locate(row)?;
        for (column, value) in current_values.iter().enumerate() {
            let delta = self.lane_vector(slot, *value)?;
            self.context
                .sub_assign(self.store.chunk_mut(column, chunk)?, &delta)?;
        }
        info!("Deleted row {row} additively");
        Ok(())
    }

    /// Zero `row` by multiplying every column by a mask vanishing on the row.
    /// This consumes capacity of every chunk holding the row, and is counted
    /// against the deletes tolerated by similarity queries.
    pub fn delete_row_multiplication(&mut self, row: usize) -> Result<()> {
        let (chunk, slot) = self.store.locate(row)?;
        let mask = self.context.one_hot_complement(slot)?;
        for column in 0..self.store.num_columns() {
            self.context
                .multiply_plain_assign(self.store.chunk_mut(column, chunk)?, &mask)?;
        }
        self.store.record_multiplicative_delete();
        info!(
            "Deleted row {row} multiplicatively ({} so far)",
            self.store.multiplicative_deletes()
        );
        Ok(())
    }

    /// Overwrite `row`: subtract its current values, then add the new ones.
    pub fn reset_then_set(
        &mut self,
        row: usize,
        current_values: &[u64],
        new_values: &[u64],
    ) -> Result<()> {
        self.check_row(new_values)?;
        self.delete_row_addition(row, current_values)?;
        self.update_one_row(row, new_values)
    }

    fn check_row_length(&self, values: &[u64]) -> Result<()> {
        if values.len() > self.store.num_columns() {
            return Err(Error::TooManyValues(values.len(), self.store.num_columns()));
        }
        Ok(())
    }

    /// Checked before any chunk is touched, so that a rejected row leaves the
    /// table unchanged.
    fn check_row(&self, values: &[u64]) -> Result<()> {
        self.check_row_length(values)?;
        values
            .iter()
            .enumerate()
            .try_for_each(|(column, value)| self.store.check_value(column, *value))
    }

    /// Encryption of `value` in `slot`, zero elsewhere.
    fn lane_vector(&self, slot: usize, value: u64) -> Result<B::Ciphertext> {
        let mut values = vec![0; slot + 1];
        values[slot] = value;
        self.context.encrypt_vector(&values)
    }
}
