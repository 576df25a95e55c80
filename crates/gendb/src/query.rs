//! Statistical queries over the encrypted table.

use gendb_traits::{Comparator, HomomorphicBackend};
use log::{debug, warn};

use crate::aggregate::{add_many_safe, add_tree, multiply_tree, squash_into_lane};
use crate::predicate::{chunk_indicator, complement, validate_filters, Composition, Filter};
use crate::{
    EncryptedStore, EngineConfig, Error, QueryDescriptor, Result, SchemeContext, WorkerPool,
};

/// Counts produced by a minor allele frequency query: the number of minor
/// alleles among the matching rows, and twice the number of matching rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MafCounts {
    /// Sum of the genotypes of the matching rows.
    pub numerator: u64,
    /// Number of alleles of the matching rows.
    pub denominator: u64,
}

impl MafCounts {
    /// Read the counts from the first two slots of a decrypted result.
    pub fn from_slots(slots: &[u64]) -> Option<Self> {
        match slots {
            [numerator, denominator, ..] => Some(Self {
                numerator: *numerator,
                denominator: *denominator,
            }),
            _ => None,
        }
    }

    /// Returns `min(num, denom - num) / denom`, or `None` when no row matched.
    pub fn frequency(&self) -> Option<f64> {
        if self.denominator == 0 {
            return None;
        }
        let minor = self
            .numerator
            .min(self.denominator.saturating_sub(self.numerator));
        Some(minor as f64 / self.denominator as f64)
    }
}

/// Result of a similarity query: among the rows close to the query vector,
/// the number of rows with and without the target column set. Each count is
/// held in slot 0 of its ciphertext.
#[derive(Debug, Clone)]
pub struct SimilarityResult<C> {
    /// Rows within the threshold with the target set.
    pub with_target: C,
    /// Rows within the threshold with the target unset.
    pub without_target: C,
}

/// Engine answering queries over an encrypted table.
///
/// Every query is a pure function of the table and of its arguments.
pub struct QueryEngine<'a, B: HomomorphicBackend> {
    context: &'a SchemeContext<B>,
    store: &'a EncryptedStore<B>,
    config: &'a EngineConfig,
    comparator: Option<&'a dyn Comparator<B>>,
}

impl<'a, B: HomomorphicBackend> QueryEngine<'a, B> {
    /// Create an engine over a table.
    pub fn new(
        context: &'a SchemeContext<B>,
        store: &'a EncryptedStore<B>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            context,
            store,
            config,
            comparator: None,
        }
    }

    /// Use a comparator for the similarity and range queries.
    pub fn with_comparator(mut self, comparator: &'a dyn Comparator<B>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Count the rows satisfying the filters. Slot 0 holds the count.
    pub fn count(&self, descriptor: &QueryDescriptor) -> Result<B::Ciphertext> {
        self.validate(descriptor)?;
        let indicators = self.indicators(descriptor.composition, &descriptor.filters)?;
        self.collapse(indicators, 0, "count")
    }

    /// Minor allele frequency of `snp_column` among the rows satisfying the
    /// filters. Slot 0 holds the sum of the genotypes of the matching rows,
    /// slot 1 twice the number of matching rows; see [`MafCounts`].
    pub fn maf(&self, snp_column: usize, descriptor: &QueryDescriptor) -> Result<B::Ciphertext> {
        self.validate(descriptor)?;
        self.check_column(snp_column)?;
        let indicators = self.indicators(descriptor.composition, &descriptor.filters)?;
        self.pack_maf(snp_column, indicators)
    }

    /// Polygenic risk score: one ciphertext per chunk, whose slots hold the
    /// weighted sum of the genotypes of the corresponding rows. Weights are
    /// reduced modulo the plaintext modulus; the padding slots of the last
    /// chunk are not masked.
    pub fn prs(&self, weights: &[(usize, i64)]) -> Result<Vec<B::Ciphertext>> {
        self.validate_weights(weights)?;
        (0..self.store.num_chunks())
            .map(|chunk| self.weighted_sum(weights, chunk))
            .collect()
    }

    /// Among the rows whose squared Euclidean distance to `query`, computed
    /// over the first `query.len()` columns, is at most `threshold`, count the
    /// rows with and without `target_column` set.
    ///
    /// The query vector is encrypted: `query[c]` holds the genotype compared
    /// with column `c` in every slot, see [`SchemeContext::encrypt_query`].
    /// Refused once more multiplicative deletes than tolerated were
    /// performed, as deleted rows no longer hold valid genotypes.
    pub fn similarity(
        &self,
        target_column: usize,
        query: &[B::Ciphertext],
        threshold: u64,
    ) -> Result<SimilarityResult<B::Ciphertext>> {
        let comparator = self.prepare_similarity(target_column, query.len())?;
        let columns = query.iter().enumerate().collect::<Vec<_>>();
        let distances = (0..self.store.num_chunks())
            .map(|chunk| self.squared_distance(&columns, chunk))
            .collect::<Result<Vec<_>>>()?;
        self.split_by_target(comparator, target_column, distances, threshold)
    }

    /// Count the rows whose value in `column` lies in `[lower, upper]`.
    /// The values of `column` must lie below the comparator input bound.
    pub fn counting_range(
        &self,
        column: usize,
        lower: u64,
        upper: u64,
    ) -> Result<B::Ciphertext> {
        let indicators = self.range_indicators(column, lower, upper)?;
        self.collapse(indicators, 0, "count")
    }

    /// Minor allele frequency of `snp_column` among the rows whose value in
    /// `column` lies in `[lower, upper]`, packed as in [`Self::maf`].
    pub fn maf_range(
        &self,
        snp_column: usize,
        column: usize,
        lower: u64,
        upper: u64,
    ) -> Result<B::Ciphertext> {
        self.check_column(snp_column)?;
        let indicators = self.range_indicators(column, lower, upper)?;
        self.pack_maf(snp_column, indicators)
    }

    /// Parallel [`Self::count`]: the filters are sharded across the workers.
    pub fn count_p(
        &self,
        pool: &WorkerPool,
        descriptor: &QueryDescriptor,
    ) -> Result<B::Ciphertext> {
        self.validate(descriptor)?;
        let indicators = self.parallel_indicators(pool, descriptor)?;
        self.collapse(indicators, 0, "count")
    }

    /// Parallel [`Self::maf`]: the filters are sharded across the workers.
    pub fn maf_p(
        &self,
        pool: &WorkerPool,
        snp_column: usize,
        descriptor: &QueryDescriptor,
    ) -> Result<B::Ciphertext> {
        self.validate(descriptor)?;
        self.check_column(snp_column)?;
        let indicators = self.parallel_indicators(pool, descriptor)?;
        self.pack_maf(snp_column, indicators)
    }

    /// Parallel [`Self::prs`]: the weighted columns are sharded across the
    /// workers.
    pub fn prs_p(&self, pool: &WorkerPool, weights: &[(usize, i64)]) -> Result<Vec<B::Ciphertext>> {
        self.validate_weights(weights)?;
        let partials = pool.map_shards(weights, |shard| {
            (0..self.store.num_chunks())
                .map(|chunk| self.weighted_sum(shard, chunk))
                .collect::<Result<Vec<_>>>()
        })?;
        transpose(partials, self.store.num_chunks())
            .into_iter()
            .map(|sums| add_tree(self.context, sums))
            .collect()
    }

    /// Parallel [`Self::similarity`]: the distance computation is sharded
    /// across the workers by column.
    pub fn similarity_p(
        &self,
        pool: &WorkerPool,
        target_column: usize,
        query: &[B::Ciphertext],
        threshold: u64,
    ) -> Result<SimilarityResult<B::Ciphertext>> {
        let comparator = self.prepare_similarity(target_column, query.len())?;
        let columns = query.iter().enumerate().collect::<Vec<_>>();
        let partials = pool.map_shards(&columns, |shard| {
            (0..self.store.num_chunks())
                .map(|chunk| self.squared_distance(shard, chunk))
                .collect::<Result<Vec<_>>>()
        })?;
        let distances = transpose(partials, self.store.num_chunks())
            .into_iter()
            .map(|sums| add_tree(self.context, sums))
            .collect::<Result<Vec<_>>>()?;
        self.split_by_target(comparator, target_column, distances, threshold)
    }

    fn validate(&self, descriptor: &QueryDescriptor) -> Result<()> {
        validate_filters(&descriptor.filters, self.store.num_columns())
    }

    fn validate_weights(&self, weights: &[(usize, i64)]) -> Result<()> {
        if weights.is_empty() {
            return Err(Error::MalformedQuery(
                "the weighted column list is empty".to_string(),
            ));
        }
        weights
            .iter()
            .try_for_each(|(column, _)| self.check_column(*column))
    }

    fn check_column(&self, column: usize) -> Result<()> {
        if column >= self.store.num_columns() {
            return Err(Error::ColumnOutOfRange(column, self.store.num_columns()));
        }
        Ok(())
    }

    fn check_capacity(&self, stage: &'static str, ct: &B::Ciphertext) -> Result<()> {
        if !self.config.capacity_checks {
            return Ok(());
        }
        let remaining = self.context.capacity(ct)?;
        debug!("Capacity after {stage}: {remaining} bits");
        if remaining < self.config.min_capacity_bits {
            warn!("Refusing to release the result of {stage}: {remaining} bits left");
            return Err(Error::NoiseBudgetExhausted {
                stage,
                remaining,
                required: self.config.min_capacity_bits,
            });
        }
        Ok(())
    }

    fn comparator(&self) -> Result<&'a dyn Comparator<B>> {
        let comparator = self.comparator.ok_or(Error::ComparatorUnavailable)?;
        let p = self.context.plaintext_modulus();
        if !comparator.supports(p) {
            return Err(Error::ComparatorDomain {
                bound: p,
                required: comparator.input_bound(),
            });
        }
        Ok(comparator)
    }

    /// Masked indicators of the rows satisfying the filters, one per chunk.
    fn indicators(
        &self,
        composition: Composition,
        filters: &[Filter],
    ) -> Result<Vec<B::Ciphertext>> {
        (0..self.store.num_chunks())
            .map(|chunk| {
                let mut indicator =
                    chunk_indicator(self.context, self.store, composition, filters, chunk, false)?;
                self.store
                    .apply_row_mask(self.context, chunk, &mut indicator)?;
                self.check_capacity("filter evaluation", &indicator)?;
                Ok(indicator)
            })
            .collect()
    }

    /// Shards compute partial products of their filters for every chunk; the
    /// partial products are multiplied on the calling thread. The order of
    /// the shards does not matter since the products commute.
    fn parallel_indicators(
        &self,
        pool: &WorkerPool,
        descriptor: &QueryDescriptor,
    ) -> Result<Vec<B::Ciphertext>> {
        let composition = descriptor.composition;
        let partials = pool.map_shards(&descriptor.filters, |shard| {
            (0..self.store.num_chunks())
                .map(|chunk| {
                    chunk_indicator(self.context, self.store, composition, shard, chunk, true)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        debug!(
            "Combining {} partial indicators per chunk",
            partials.len()
        );

        transpose(partials, self.store.num_chunks())
            .into_iter()
            .enumerate()
            .map(|(chunk, products)| {
                let mut indicator = multiply_tree(self.context, products)?;
                if composition == Composition::Disjunctive {
                    complement(self.context, &mut indicator)?;
                }
                self.store
                    .apply_row_mask(self.context, chunk, &mut indicator)?;
                self.check_capacity("filter evaluation", &indicator)?;
                Ok(indicator)
            })
            .collect()
    }

    /// Sum the per-chunk ciphertexts, then every slot into `lane`.
    fn collapse(
        &self,
        ciphertexts: Vec<B::Ciphertext>,
        lane: usize,
        stage: &'static str,
    ) -> Result<B::Ciphertext> {
        let sum = add_tree(self.context, ciphertexts)?;
        let collapsed = squash_into_lane(self.context, sum, lane)?;
        self.check_capacity(stage, &collapsed)?;
        Ok(collapsed)
    }

    fn pack_maf(
        &self,
        snp_column: usize,
        indicators: Vec<B::Ciphertext>,
    ) -> Result<B::Ciphertext> {
        let numerators = indicators
            .iter()
            .enumerate()
            .map(|(chunk, indicator)| {
                let mut numerator = indicator.clone();
                self.context
                    .multiply_assign(&mut numerator, self.store.chunk(snp_column, chunk)?)?;
                self.check_capacity("allele count", &numerator)?;
                Ok(numerator)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut packed = self.collapse(numerators, 0, "allele count")?;
        let mut denominator = self.collapse(indicators, 1, "row count")?;
        let rows = denominator.clone();
        self.context.add_assign(&mut denominator, &rows)?;
        self.context.add_assign(&mut packed, &denominator)?;
        Ok(packed)
    }

    fn weighted_sum(&self, weights: &[(usize, i64)], chunk: usize) -> Result<B::Ciphertext> {
        let terms = weights
            .iter()
            .map(|(column, weight)| {
                let mut term = self.store.chunk(*column, chunk)?.clone();
                let weight = self.context.constant(self.context.reduce(*weight))?;
                self.context.multiply_plain_assign(&mut term, &weight)?;
                Ok(term)
            })
            .collect::<Result<Vec<_>>>()?;
        let sum = add_many_safe(self.context, &terms)?;
        self.check_capacity("risk score", &sum)?;
        Ok(sum)
    }

    fn prepare_similarity(
        &self,
        target_column: usize,
        query_len: usize,
    ) -> Result<&'a dyn Comparator<B>> {
        let performed = self.store.multiplicative_deletes();
        if performed > self.config.max_deletes {
            warn!("Similarity query refused after {performed} multiplicative deletes");
            return Err(Error::TooManyDeletes {
                performed,
                max: self.config.max_deletes,
            });
        }
        let comparator = self.comparator()?;
        self.check_column(target_column)?;
        if query_len == 0 {
            return Err(Error::MalformedQuery("the query vector is empty".to_string()));
        }
        if query_len > self.store.num_columns() {
            return Err(Error::TooManyValues(query_len, self.store.num_columns()));
        }

        // Query genotypes are at most 2, so that |x_c - v_c| is below the
        // larger of 2 and the largest value of column c.
        let largest_distance = (0..query_len).try_fold(0u64, |sum, c| -> Result<u64> {
            let largest = self.store.value_bound(c)?.saturating_sub(1).max(2);
            Ok(sum.saturating_add(largest.saturating_mul(largest)))
        })?;
        if largest_distance >= comparator.input_bound() {
            return Err(Error::ComparatorDomain {
                bound: comparator.input_bound(),
                required: largest_distance,
            });
        }
        Ok(comparator)
    }

    /// Slot-wise sum of `(x_c - v_c)^2` over the pairs of a column index and
    /// an encrypted query value, for one chunk.
    fn squared_distance(
        &self,
        columns: &[(usize, &B::Ciphertext)],
        chunk: usize,
    ) -> Result<B::Ciphertext> {
        let squares = columns
            .iter()
            .map(|(column, value)| {
                let mut diff = self.store.chunk(*column, chunk)?.clone();
                self.context.sub_assign(&mut diff, value)?;
                self.context.square_assign(&mut diff)?;
                Ok(diff)
            })
            .collect::<Result<Vec<_>>>()?;
        add_tree(self.context, squares)
    }

    fn split_by_target(
        &self,
        comparator: &dyn Comparator<B>,
        target_column: usize,
        distances: Vec<B::Ciphertext>,
        threshold: u64,
    ) -> Result<SimilarityResult<B::Ciphertext>> {
        let mut with_target = Vec::with_capacity(distances.len());
        let mut without_target = Vec::with_capacity(distances.len());
        for (chunk, distance) in distances.iter().enumerate() {
            let mut within = comparator
                .less_or_equal(self.context.backend(), distance, threshold)
                .map_err(Error::backend)?;
            self.store.apply_row_mask(self.context, chunk, &mut within)?;

            let mut with = within.clone();
            self.context
                .multiply_assign(&mut with, self.store.chunk(target_column, chunk)?)?;
            self.check_capacity("comparison", &with)?;
            self.context.sub_assign(&mut within, &with)?;
            with_target.push(with);
            without_target.push(within);
        }
        Ok(SimilarityResult {
            with_target: self.collapse(with_target, 0, "count")?,
            without_target: self.collapse(without_target, 0, "count")?,
        })
    }

    /// Masked indicators of `lower <= x <= upper` for the values `x` of
    /// `column`, one per chunk. Refused when the bound of the column exceeds
    /// the comparator input bound.
    fn range_indicators(
        &self,
        column: usize,
        lower: u64,
        upper: u64,
    ) -> Result<Vec<B::Ciphertext>> {
        let comparator = self.comparator()?;
        self.check_column(column)?;
        let largest = self.store.value_bound(column)?.saturating_sub(1);
        if largest >= comparator.input_bound() {
            warn!("Range query refused: column {column} holds values up to {largest}");
            return Err(Error::ComparatorDomain {
                bound: comparator.input_bound(),
                required: largest,
            });
        }
        if lower > upper {
            return Err(Error::MalformedQuery(format!(
                "empty range [{lower}, {upper}]"
            )));
        }

        let backend = self.context.backend();
        (0..self.store.num_chunks())
            .map(|chunk| {
                let x = self.store.chunk(column, chunk)?;
                let mut bounds = vec![comparator
                    .less_or_equal(backend, x, upper)
                    .map_err(Error::backend)?];
                // x >= 0 always holds.
                if lower > 0 {
                    let mut at_least_lower = comparator
                        .less_or_equal(backend, x, lower - 1)
                        .map_err(Error::backend)?;
                    complement(self.context, &mut at_least_lower)?;
                    bounds.push(at_least_lower);
                }
                let mut indicator = multiply_tree(self.context, bounds)?;
                self.store
                    .apply_row_mask(self.context, chunk, &mut indicator)?;
                self.check_capacity("range evaluation", &indicator)?;
                Ok(indicator)
            })
            .collect()
    }
}

/// Regroup per-shard lists of per-chunk ciphertexts into per-chunk lists.
fn transpose<C>(partials: Vec<Vec<C>>, num_chunks: usize) -> Vec<Vec<C>> {
    let mut per_chunk = (0..num_chunks)
        .map(|_| Vec::with_capacity(partials.len()))
        .collect::<Vec<_>>();
    for shard in partials {
        for (slot, ct) in per_chunk.iter_mut().zip(shard) {
            slot.push(ct);
        }
    }
    per_chunk
}
