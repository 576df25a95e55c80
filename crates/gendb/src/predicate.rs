//! Filters over genotype columns and their homomorphic evaluation.

use std::fmt;

use gendb_traits::HomomorphicBackend;

use crate::aggregate::multiply_tree;
use crate::{EncryptedStore, Error, Result, SchemeContext};

/// A `column = value` filter, with `value` in `{0, 1, 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Filter {
    /// Index of the filtered column.
    pub column: usize,
    /// Genotype the column must hold.
    pub value: u64,
}

impl Filter {
    /// Create a new filter.
    pub const fn new(column: usize, value: u64) -> Self {
        Self { column, value }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.column, self.value)
    }
}

/// How the filters of a query are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Composition {
    /// All the filters must hold.
    Conjunctive,
    /// At least one filter must hold.
    Disjunctive,
}

impl Composition {
    /// Conjunctive when `conjunctive` is true.
    pub const fn from_flag(conjunctive: bool) -> Self {
        if conjunctive {
            Composition::Conjunctive
        } else {
            Composition::Disjunctive
        }
    }
}

/// A set of filters and the way they are combined.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryDescriptor {
    /// How the filters are combined.
    pub composition: Composition,
    /// The filters.
    pub filters: Vec<Filter>,
}

impl QueryDescriptor {
    /// Create a new descriptor.
    pub fn new(composition: Composition, filters: Vec<Filter>) -> Self {
        Self {
            composition,
            filters,
        }
    }

    /// Parse filters written as `[(column,value),(column,value),...]`.
    /// Whitespace is ignored.
    pub fn parse(composition: Composition, text: &str) -> Result<Self> {
        let compact = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>();
        let inner = compact
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| Error::MalformedQuery(format!("expected a bracketed list: {text}")))?;

        let mut filters = vec![];
        let mut rest = inner;
        while !rest.is_empty() {
            let tuple_end = rest
                .find(')')
                .ok_or_else(|| Error::MalformedQuery(format!("unterminated filter: {rest}")))?;
            let tuple = rest[..tuple_end]
                .strip_prefix('(')
                .ok_or_else(|| Error::MalformedQuery(format!("expected a filter: {rest}")))?;
            let (column, value) = tuple
                .split_once(',')
                .ok_or_else(|| Error::MalformedQuery(format!("expected a pair: ({tuple})")))?;
            let column = column
                .parse::<usize>()
                .map_err(|_| Error::MalformedQuery(format!("invalid column: {column}")))?;
            let value = value
                .parse::<u64>()
                .map_err(|_| Error::MalformedQuery(format!("invalid value: {value}")))?;
            filters.push(Filter::new(column, value));

            rest = &rest[tuple_end + 1..];
            if let Some(next) = rest.strip_prefix(',') {
                if next.is_empty() {
                    return Err(Error::MalformedQuery("trailing comma".to_string()));
                }
                rest = next;
            } else if !rest.is_empty() {
                return Err(Error::MalformedQuery(format!("unexpected input: {rest}")));
            }
        }
        Ok(Self::new(composition, filters))
    }

    /// Check the descriptor against a table with `num_columns` columns.
    pub fn validate(&self, num_columns: usize) -> Result<()> {
        validate_filters(&self.filters, num_columns)
    }
}

pub(crate) fn validate_filters(filters: &[Filter], num_columns: usize) -> Result<()> {
    if filters.is_empty() {
        return Err(Error::EmptyFilterSet);
    }
    for filter in filters {
        if filter.value > 2 {
            return Err(Error::InvalidTargetValue(filter.value));
        }
        if filter.column >= num_columns {
            return Err(Error::ColumnOutOfRange(filter.column, num_columns));
        }
    }
    Ok(())
}

/// Evaluate the equality test `x == value` slot-wise, for `x` and `value` in
/// `{0, 1, 2}`, with the unique degree-2 polynomial taking value 1 at `value`
/// and 0 at the two other points.
pub fn equality_test<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    x: &B::Ciphertext,
    value: u64,
) -> Result<B::Ciphertext> {
    let constants = context.constants();
    let mut result = x.clone();
    context.square_assign(&mut result)?;
    match value {
        // x^2 / 2 - 3x / 2 + 1
        0 => {
            let mut linear = x.clone();
            let minus_three_halves = context.constant(constants.minus_three_halves)?;
            context.multiply_plain_assign(&mut linear, &minus_three_halves)?;
            let one_half = context.constant(constants.one_half)?;
            context.multiply_plain_assign(&mut result, &one_half)?;
            context.add_assign(&mut result, &linear)?;
            context.add_plain_assign(&mut result, &context.constant(1)?)?;
        }
        // -x^2 + 2x
        1 => {
            let mut linear = x.clone();
            context.multiply_plain_assign(&mut linear, &context.constant(2)?)?;
            context.negate_assign(&mut result)?;
            context.add_assign(&mut result, &linear)?;
        }
        // (x^2 - x) / 2
        2 => {
            context.sub_assign(&mut result, x)?;
            let one_half = context.constant(constants.one_half)?;
            context.multiply_plain_assign(&mut result, &one_half)?;
        }
        _ => return Err(Error::InvalidTargetValue(value)),
    }
    Ok(result)
}

/// Replace an encrypted bit `x` by `1 - x`.
pub fn complement<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    x: &mut B::Ciphertext,
) -> Result<()> {
    context.negate_assign(x)?;
    context.add_plain_assign(x, &context.constant(1)?)
}

/// Indicator of the rows of one chunk satisfying the filters.
///
/// When `partial` is set, disjunctive filters are left complemented: the
/// result is the product of the complemented indicators, which combines with
/// other partial products before the final complement.
pub(crate) fn chunk_indicator<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    store: &EncryptedStore<B>,
    composition: Composition,
    filters: &[Filter],
    chunk: usize,
    partial: bool,
) -> Result<B::Ciphertext> {
    let mut indicators = Vec::with_capacity(filters.len());
    for filter in filters {
        let mut indicator =
            equality_test(context, store.chunk(filter.column, chunk)?, filter.value)?;
        if composition == Composition::Disjunctive {
            complement(context, &mut indicator)?;
        }
        indicators.push(indicator);
    }
    let mut combined = multiply_tree(context, indicators)?;
    if composition == Composition::Disjunctive && !partial {
        complement(context, &mut combined)?;
    }
    Ok(combined)
}

/// Indicator of the rows of every chunk satisfying the filters.
pub fn evaluate_filters<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    store: &EncryptedStore<B>,
    descriptor: &QueryDescriptor,
) -> Result<Vec<B::Ciphertext>> {
    descriptor.validate(store.num_columns())?;
    (0..store.num_chunks())
        .map(|chunk| {
            chunk_indicator(
                context,
                store,
                descriptor.composition,
                &descriptor.filters,
                chunk,
                false,
            )
        })
        .collect()
}
