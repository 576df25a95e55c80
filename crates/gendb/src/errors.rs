use thiserror::Error;

/// The Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum encapsulating all the possible errors from this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Indicates an error reported by the homomorphic backend.
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Indicates a parameter error.
    #[error("{0}")]
    ParametersError(ParametersError),

    /// Indicates that too many values were provided.
    #[error("Too many values provided: {0} exceeds limit {1}")]
    TooManyValues(usize, usize),

    /// Indicates that the table has no column or no row.
    #[error("The table must contain at least one column and one row")]
    EmptyTable,

    /// Indicates that the columns of the table do not have the same length.
    #[error("Column {column} has {found} rows, expected {expected}")]
    RaggedTable {
        /// Index of the offending column.
        column: usize,
        /// Number of rows of the offending column.
        found: usize,
        /// Number of rows of the first column.
        expected: usize,
    },

    /// Indicates that a value is not smaller than the plaintext modulus.
    #[error("Value {0} is not smaller than the plaintext modulus {1}")]
    ValueOutOfRange(u64, u64),

    /// Indicates that a value exceeds the bound of the column it is written to.
    #[error("Value {value} does not fit column {column}, whose values are below {bound}")]
    ValueOutOfBounds {
        /// Index of the column.
        column: usize,
        /// Offending value.
        value: u64,
        /// Exclusive bound on the values of the column.
        bound: u64,
    },

    /// Indicates that no data was loaded in the store.
    #[error("No data was loaded")]
    DataNotSet,

    /// Indicates that a column index is out of range.
    #[error("Column {0} is out of range: the table has {1} columns")]
    ColumnOutOfRange(usize, usize),

    /// Indicates that a row index is out of range.
    #[error("Row {0} is out of range: the table has room for {1} rows")]
    RowOutOfRange(usize, usize),

    /// Indicates that the column headers do not match the table.
    #[error("Expected {1} column headers, found {0}")]
    HeaderMismatch(usize, usize),

    /// Indicates that a query could not be parsed or is inconsistent.
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Indicates that a query carries no filter.
    #[error("The query must contain at least one filter")]
    EmptyFilterSet,

    /// Indicates that a filter targets a value outside of {0, 1, 2}.
    #[error("Invalid target value {0}: expected 0, 1 or 2")]
    InvalidTargetValue(u64),

    /// Indicates that the client holds no switching key.
    #[error("Client {0} is not authorized")]
    Unauthorized(String),

    /// Indicates that the API key is not accepted by the server.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Indicates that too many multiplicative deletes were performed for the
    /// query to produce a meaningful result.
    #[error("Too many deletes: {performed} multiplicative deletes exceed the limit of {max}")]
    TooManyDeletes {
        /// Number of multiplicative deletes performed so far.
        performed: usize,
        /// Maximum number of multiplicative deletes tolerated.
        max: usize,
    },

    /// Indicates that the capacity of an intermediate ciphertext is too low
    /// for its decryption to be trusted.
    #[error("Noise budget exhausted after {stage}: {remaining} bits left, {required} required")]
    NoiseBudgetExhausted {
        /// Name of the stage after which the capacity was measured.
        stage: &'static str,
        /// Remaining capacity, in bits.
        remaining: usize,
        /// Minimal capacity required, in bits.
        required: usize,
    },

    /// Indicates that a query requires a comparator but none is configured.
    #[error("No comparator is configured")]
    ComparatorUnavailable,

    /// Indicates that the comparator cannot handle the inputs of a query.
    #[error("Comparator inputs are bounded by {bound}, the query may produce {required}")]
    ComparatorDomain {
        /// Exclusive bound on the comparator inputs.
        bound: u64,
        /// Largest value the query may feed to the comparator.
        required: u64,
    },

    /// Indicates a worker pool failure.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl From<ParametersError> for Error {
    fn from(e: ParametersError) -> Self {
        Error::ParametersError(e)
    }
}

impl Error {
    /// Wrap an error produced by a homomorphic backend.
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Error::Backend(Box::new(e))
    }
}

/// Separate enum to indicate parameters-related errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParametersError {
    /// Indicates that the degree is invalid.
    #[error("Invalid degree: {0} is not a power of 2 larger than 16")]
    InvalidDegree(usize),

    /// Indicates that the moduli sizes are invalid.
    #[error("Invalid modulus size: {0}, expected an integer between {1} and {2}")]
    InvalidModulusSize(usize, usize, usize),

    /// Indicates that the plaintext is invalid.
    #[error("{0}")]
    InvalidPlaintext(String),

    /// Indicates that the comparator bit width is invalid.
    #[error("Invalid comparator width: {0} bits, expected an integer between 1 and 16")]
    InvalidComparatorBits(usize),

    /// Indicates that the lifting exponent cannot be represented.
    #[error("Unsupported lifting exponent {0}: only 1 is supported")]
    UnsupportedLifting(usize),

    /// Indicates that too few parameters were specified.
    #[error("{0}")]
    TooFewSpecified(String),
}
