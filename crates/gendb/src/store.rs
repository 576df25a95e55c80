//! Column-major encrypted genotype table.

use std::fmt::Write;

use gendb_traits::HomomorphicBackend;
use itertools::Itertools;
use log::info;
use rand::Rng;

use crate::{Error, Result, SchemeContext};

/// An encrypted column: one ciphertext per chunk of `num_slots` rows. Slot `k`
/// of chunk `j` holds row `j * num_slots + k`.
#[derive(Debug, Clone)]
pub struct EncryptedColumn<C> {
    chunks: Vec<C>,
}

impl<C> EncryptedColumn<C> {
    /// Returns the ciphertexts of the column.
    pub fn chunks(&self) -> &[C] {
        &self.chunks
    }

    /// Returns the number of chunks of the column.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns whether the column holds no chunk.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Exclusive bound on genotype values.
pub const GENOTYPE_BOUND: u64 = 3;

/// An encrypted table of genotypes, stored column by column.
///
/// Every column carries an exclusive bound on the values it may hold, fixed
/// when the table is loaded. Genotype columns are bounded by
/// [`GENOTYPE_BOUND`].
pub struct EncryptedStore<B: HomomorphicBackend> {
    columns: Vec<EncryptedColumn<B::Ciphertext>>,
    bounds: Vec<u64>,
    headers: Option<Vec<String>>,
    num_rows: usize,
    num_chunks: usize,
    num_slots: usize,
    multiplicative_deletes: usize,
}

impl<B: HomomorphicBackend> EncryptedStore<B> {
    /// Encrypt a table given as a list of columns of equal length. The last
    /// chunk of every column is padded with zeros. The bound of a column is
    /// one more than its largest value, and never below [`GENOTYPE_BOUND`].
    pub fn set_data(context: &SchemeContext<B>, columns: &[Vec<u64>]) -> Result<Self> {
        let num_rows = columns.first().map(Vec::len).ok_or(Error::EmptyTable)?;
        if num_rows == 0 {
            return Err(Error::EmptyTable);
        }
        if let Some((column, values)) = columns
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != num_rows)
        {
            return Err(Error::RaggedTable {
                column,
                found: values.len(),
                expected: num_rows,
            });
        }

        let num_slots = context.num_slots();
        let encrypted = columns
            .iter()
            .map(|values| {
                values
                    .chunks(num_slots)
                    .map(|chunk| context.encrypt_vector(chunk))
                    .collect::<Result<Vec<_>>>()
                    .map(|chunks| EncryptedColumn { chunks })
            })
            .collect::<Result<Vec<_>>>()?;

        let bounds = columns
            .iter()
            .map(|values| values.iter().max().map_or(0, |m| m + 1).max(GENOTYPE_BOUND))
            .collect();

        let store = Self {
            columns: encrypted,
            bounds,
            headers: None,
            num_rows,
            num_chunks: num_rows.div_ceil(num_slots),
            num_slots,
            multiplicative_deletes: 0,
        };
        info!(
            "Loaded {} columns of {} rows in {} chunks",
            store.num_columns(),
            num_rows,
            store.num_chunks
        );
        Ok(store)
    }

    /// Allocate a table of `num_rows` rows and `num_columns` genotype columns
    /// holding encryptions of zero.
    pub fn gen_data(
        context: &SchemeContext<B>,
        num_rows: usize,
        num_columns: usize,
    ) -> Result<Self> {
        if num_rows == 0 || num_columns == 0 {
            return Err(Error::EmptyTable);
        }
        let num_slots = context.num_slots();
        let num_chunks = num_rows.div_ceil(num_slots);
        let columns = (0..num_columns)
            .map(|_| {
                (0..num_chunks)
                    .map(|_| context.zero())
                    .collect::<Result<Vec<_>>>()
                    .map(|chunks| EncryptedColumn { chunks })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Allocated {num_columns} columns of {num_rows} rows in {num_chunks} chunks");
        Ok(Self {
            columns,
            bounds: vec![GENOTYPE_BOUND; num_columns],
            headers: None,
            num_rows,
            num_chunks,
            num_slots,
            multiplicative_deletes: 0,
        })
    }

    /// Generate a table of `num_rows` rows and `num_columns` columns of values
    /// drawn uniformly in `[low, high]`, such as ages or measurements meant
    /// for range queries. Every slot of every chunk is filled, padding
    /// included; the row mask of the queries hides the padding.
    pub fn gen_continuous_data(
        context: &SchemeContext<B>,
        num_rows: usize,
        num_columns: usize,
        low: u64,
        high: u64,
    ) -> Result<Self> {
        if num_rows == 0 || num_columns == 0 {
            return Err(Error::EmptyTable);
        }
        if low > high {
            return Err(Error::MalformedQuery(format!("empty range [{low}, {high}]")));
        }
        let p = context.plaintext_modulus();
        if high >= p {
            return Err(Error::ValueOutOfRange(high, p));
        }

        let num_slots = context.num_slots();
        let num_chunks = num_rows.div_ceil(num_slots);
        let mut rng = rand::rng();
        let columns = (0..num_columns)
            .map(|_| {
                (0..num_chunks)
                    .map(|_| {
                        let values = (0..num_slots)
                            .map(|_| rng.random_range(low..=high))
                            .collect::<Vec<_>>();
                        context.encrypt_vector(&values)
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(|chunks| EncryptedColumn { chunks })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Generated {num_columns} columns of {num_rows} rows in [{low}, {high}]");
        Ok(Self {
            columns,
            bounds: vec![high + 1; num_columns],
            headers: None,
            num_rows,
            num_chunks,
            num_slots,
            multiplicative_deletes: 0,
        })
    }

    /// Returns the number of rows holding data.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of chunks of every column.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Returns the number of rows the allocated chunks can hold.
    pub fn row_capacity(&self) -> usize {
        self.num_chunks * self.num_slots
    }

    /// Returns the number of multiplicative deletes performed so far.
    pub fn multiplicative_deletes(&self) -> usize {
        self.multiplicative_deletes
    }

    pub(crate) fn record_multiplicative_delete(&mut self) {
        self.multiplicative_deletes += 1;
    }

    /// Returns a column.
    pub fn column(&self, column: usize) -> Result<&EncryptedColumn<B::Ciphertext>> {
        self.columns
            .get(column)
            .ok_or(Error::ColumnOutOfRange(column, self.columns.len()))
    }

    /// Returns the exclusive bound on the values of a column.
    pub fn value_bound(&self, column: usize) -> Result<u64> {
        self.bounds
            .get(column)
            .copied()
            .ok_or(Error::ColumnOutOfRange(column, self.columns.len()))
    }

    /// Check that `value` may be written in `column`.
    pub fn check_value(&self, column: usize, value: u64) -> Result<()> {
        let bound = self.value_bound(column)?;
        if value >= bound {
            return Err(Error::ValueOutOfBounds {
                column,
                value,
                bound,
            });
        }
        Ok(())
    }

    /// Returns the ciphertext holding a chunk of a column.
    pub fn chunk(&self, column: usize, chunk: usize) -> Result<&B::Ciphertext> {
        self.column(column)?
            .chunks
            .get(chunk)
            .ok_or(Error::RowOutOfRange(chunk * self.num_slots, self.row_capacity()))
    }

    pub(crate) fn chunk_mut(&mut self, column: usize, chunk: usize) -> Result<&mut B::Ciphertext> {
        let num_columns = self.columns.len();
        let num_slots = self.num_slots;
        let row_capacity = self.row_capacity();
        self.columns
            .get_mut(column)
            .ok_or(Error::ColumnOutOfRange(column, num_columns))?
            .chunks
            .get_mut(chunk)
            .ok_or(Error::RowOutOfRange(chunk * num_slots, row_capacity))
    }

    /// Split a row index into a chunk index and a slot index.
    pub fn locate(&self, row: usize) -> Result<(usize, usize)> {
        if row >= self.row_capacity() {
            return Err(Error::RowOutOfRange(row, self.row_capacity()));
        }
        Ok((row / self.num_slots, row % self.num_slots))
    }

    /// Annotate the columns with headers.
    pub fn set_column_headers(&mut self, headers: Vec<String>) -> Result<()> {
        if headers.len() != self.num_columns() {
            return Err(Error::HeaderMismatch(headers.len(), self.num_columns()));
        }
        self.headers = Some(headers);
        Ok(())
    }

    /// Returns the column headers, if any.
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Returns the index of the column with the given header.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers
            .as_ref()?
            .iter()
            .position(|h| h == header)
    }

    /// Zero the padding slots of the last chunk. Chunks other than the last
    /// one, and tables whose row count is a multiple of the slot count, are
    /// left untouched.
    pub fn apply_row_mask(
        &self,
        context: &SchemeContext<B>,
        chunk: usize,
        ct: &mut B::Ciphertext,
    ) -> Result<()> {
        let remainder = self.num_rows % self.num_slots;
        if chunk + 1 == self.num_chunks && remainder != 0 {
            context.multiply_plain_assign(ct, &context.prefix_mask(remainder)?)?;
        }
        Ok(())
    }

    /// Decrypt the table with the server key and lay it out as text, one row
    /// per line. Meant for debugging.
    pub fn render(&self, context: &SchemeContext<B>, with_headers: bool) -> Result<String> {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                column
                    .chunks
                    .iter()
                    .map(|ct| context.decrypt(ct))
                    .collect::<Result<Vec<_>>>()
                    .map(|chunks| chunks.concat())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = String::new();
        if with_headers {
            if let Some(headers) = &self.headers {
                let _ = writeln!(out, "{}", headers.join("\t"));
            }
        }
        for row in 0..self.num_rows {
            let line = columns
                .iter()
                .map(|values| values.get(row).map_or_else(String::new, u64::to_string))
                .join("\t");
            let _ = writeln!(out, "{line}");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::EncryptedStore;
    use crate::backend::SimulatedBackend;
    use crate::{Error, SchemeContext};
    use std::error::Error as StdError;

    #[test]
    fn set_data() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 17)?)?;
        let columns = vec![vec![0, 1, 2, 0, 1, 2], vec![2, 2, 1, 1, 0, 0]];
        let store = EncryptedStore::set_data(&context, &columns)?;
        assert_eq!(store.num_rows(), 6);
        assert_eq!(store.num_columns(), 2);
        assert_eq!(store.num_chunks(), 2);
        assert_eq!(store.row_capacity(), 8);
        assert_eq!(store.column(1)?.len(), 2);
        assert_eq!(context.decrypt(store.chunk(0, 1)?)?, vec![1, 2, 0, 0]);
        assert_eq!(context.decrypt(store.chunk(1, 0)?)?, vec![2, 2, 1, 1]);
        assert!(matches!(store.chunk(2, 0), Err(Error::ColumnOutOfRange(2, 2))));
        assert!(matches!(store.chunk(0, 2), Err(Error::RowOutOfRange(8, 8))));
        assert_eq!(store.locate(5)?, (1, 1));
        assert!(store.locate(8).is_err());
        Ok(())
    }

    #[test]
    fn value_bounds() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 97)?)?;
        let store = EncryptedStore::set_data(&context, &[vec![0, 1, 0], vec![20, 30, 3]])?;
        assert_eq!(store.value_bound(0)?, 3);
        assert_eq!(store.value_bound(1)?, 31);
        assert!(store.value_bound(2).is_err());
        store.check_value(0, 2)?;
        store.check_value(1, 30)?;
        assert!(matches!(
            store.check_value(0, 3),
            Err(Error::ValueOutOfBounds {
                column: 0,
                value: 3,
                bound: 3
            })
        ));
        Ok(())
    }

    #[test]
    fn gen_continuous_data() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 97)?)?;
        let store = EncryptedStore::gen_continuous_data(&context, 7, 2, 18, 65)?;
        assert_eq!(store.num_chunks(), 2);
        assert_eq!(store.value_bound(1)?, 66);
        for column in 0..2 {
            for chunk in store.column(column)?.chunks() {
                assert!(context.decrypt(chunk)?.iter().all(|v| (18..=65).contains(v)));
            }
        }
        assert!(EncryptedStore::gen_continuous_data(&context, 7, 2, 5, 4).is_err());
        assert!(matches!(
            EncryptedStore::gen_continuous_data(&context, 7, 2, 5, 97),
            Err(Error::ValueOutOfRange(97, 97))
        ));
        Ok(())
    }

    #[test]
    fn invalid_data() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 17)?)?;
        assert!(matches!(
            EncryptedStore::set_data(&context, &[]),
            Err(Error::EmptyTable)
        ));
        assert!(matches!(
            EncryptedStore::set_data(&context, &[vec![]]),
            Err(Error::EmptyTable)
        ));
        assert!(matches!(
            EncryptedStore::set_data(&context, &[vec![0, 1], vec![0]]),
            Err(Error::RaggedTable {
                column: 1,
                found: 1,
                expected: 2
            })
        ));
        assert!(matches!(
            EncryptedStore::set_data(&context, &[vec![0, 17]]),
            Err(Error::ValueOutOfRange(17, 17))
        ));
        assert!(EncryptedStore::gen_data(&context, 0, 1).is_err());
        Ok(())
    }

    #[test]
    fn gen_data() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 17)?)?;
        let store = EncryptedStore::gen_data(&context, 9, 3)?;
        assert_eq!(store.num_chunks(), 3);
        for column in 0..3 {
            for chunk in store.column(column)?.chunks() {
                assert_eq!(context.decrypt(chunk)?, vec![0; 4]);
            }
        }
        Ok(())
    }

    #[test]
    fn row_mask() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(4, 17)?)?;
        let store = EncryptedStore::gen_data(&context, 6, 1)?;
        let ones = context.encrypt_value(1)?;

        let mut ct = ones.clone();
        store.apply_row_mask(&context, 0, &mut ct)?;
        assert_eq!(context.decrypt(&ct)?, vec![1; 4]);
        let mut ct = ones.clone();
        store.apply_row_mask(&context, 1, &mut ct)?;
        assert_eq!(context.decrypt(&ct)?, vec![1, 1, 0, 0]);

        // Without padding, the last chunk is left untouched.
        let full = EncryptedStore::gen_data(&context, 8, 1)?;
        let mut ct = ones;
        full.apply_row_mask(&context, 1, &mut ct)?;
        assert_eq!(context.decrypt(&ct)?, vec![1; 4]);
        Ok(())
    }

    #[test]
    fn headers_and_render() -> Result<(), Box<dyn StdError>> {
        let context = SchemeContext::new(SimulatedBackend::new(2, 17)?)?;
        let mut store = EncryptedStore::set_data(&context, &[vec![0, 1, 2], vec![2, 1, 0]])?;
        assert!(store.headers().is_none());
        assert!(store.column_index("snp1").is_none());
        assert!(store.set_column_headers(vec!["snp1".to_string()]).is_err());

        store.set_column_headers(vec!["snp1".to_string(), "snp2".to_string()])?;
        assert_eq!(store.column_index("snp2"), Some(1));
        assert_eq!(store.column_index("als"), None);
        assert_eq!(
            store.render(&context, true)?,
            "snp1\tsnp2\n0\t2\n1\t1\n2\t0\n"
        );
        assert_eq!(store.render(&context, false)?, "0\t2\n1\t1\n2\t0\n");
        Ok(())
    }
}
