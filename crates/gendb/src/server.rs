//! The query server: the encrypted table, the query engines, and the
//! delegation of the results to authorized clients.

use dashmap::DashSet;
use gendb_traits::{CiphertextCodec, Comparator, KeySwitching};
use log::{info, warn};

use crate::{
    DelegationRegistry, EncryptedStore, EngineConfig, Error, InterpolationComparator,
    MutationEngine, QueryDescriptor, QueryEngine, Result, SchemeContext, WorkerPool,
};

/// A query submitted to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueryRequest {
    /// Count the rows matching the filters.
    Count {
        /// The filters.
        descriptor: QueryDescriptor,
        /// Whether the filters are evaluated on the worker pool.
        parallel: bool,
    },
    /// Minor allele frequency among the rows matching the filters.
    Maf {
        /// The column whose frequency is computed.
        snp_column: usize,
        /// The filters.
        descriptor: QueryDescriptor,
        /// Whether the filters are evaluated on the worker pool.
        parallel: bool,
    },
    /// Polygenic risk score of every row.
    Prs {
        /// Pairs of column and weight.
        weights: Vec<(usize, i64)>,
        /// Whether the weighted columns are summed on the worker pool.
        parallel: bool,
    },
    /// Count the rows close to a query vector, with and without a target.
    Similarity {
        /// The target column.
        target_column: usize,
        /// The serialized encryptions of the query vector, over the first
        /// columns; see [`SchemeContext::encrypt_query`].
        query: Vec<Vec<u8>>,
        /// Maximal squared distance.
        threshold: u64,
        /// Whether the distances are computed on the worker pool.
        parallel: bool,
    },
    /// Count the rows whose value lies in an inclusive range.
    CountingRange {
        /// The filtered column.
        column: usize,
        /// Lower bound.
        lower: u64,
        /// Upper bound.
        upper: u64,
    },
    /// Minor allele frequency among the rows whose value lies in an
    /// inclusive range.
    MafRange {
        /// The column whose frequency is computed.
        snp_column: usize,
        /// The filtered column.
        column: usize,
        /// Lower bound.
        lower: u64,
        /// Upper bound.
        upper: u64,
    },
}

/// A ciphertext of a query result together with its name.
#[derive(Debug, Clone)]
pub struct NamedResult<C> {
    /// Name of the result, such as `count` or `with_target`.
    pub name: String,
    /// The result, encrypted under the client key.
    pub ciphertext: C,
}

impl<C> NamedResult<C> {
    fn new(name: impl Into<String>, ciphertext: C) -> Self {
        Self {
            name: name.into(),
            ciphertext,
        }
    }

    /// Serialize the ciphertext.
    pub fn to_bytes<B: CiphertextCodec<Ciphertext = C>>(&self, backend: &B) -> Vec<u8> {
        backend.serialize(&self.ciphertext)
    }
}

/// Outcome of a query.
#[derive(Debug, Clone)]
pub enum QueryResponse<C> {
    /// The results, re-encrypted towards the client.
    Completed(Vec<NamedResult<C>>),
    /// The query was refused or failed.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

impl<C> QueryResponse<C> {
    /// Returns the results, or the failure reason.
    pub fn into_results(self) -> std::result::Result<Vec<NamedResult<C>>, String> {
        match self {
            QueryResponse::Completed(results) => Ok(results),
            QueryResponse::Failed { reason } => Err(reason),
        }
    }
}

/// A server holding one encrypted table and answering queries of
/// authorized clients.
pub struct Server<B: KeySwitching + CiphertextCodec> {
    context: SchemeContext<B>,
    store: Option<EncryptedStore<B>>,
    config: EngineConfig,
    comparator: Option<Box<dyn Comparator<B>>>,
    pool: WorkerPool,
    registry: DelegationRegistry<B>,
    api_keys: DashSet<String>,
}

impl<B: KeySwitching + CiphertextCodec> Server<B> {
    /// Create a server accepting `master_key` as API key. An interpolation
    /// comparator of `config.comparator_bits` bits is installed when the
    /// plaintext modulus supports it.
    pub fn new(backend: B, config: EngineConfig, master_key: &str) -> Result<Self> {
        let context = SchemeContext::new(backend)?;
        let pool = WorkerPool::new(config.threads)?;
        let p = context.plaintext_modulus();
        let comparator = match InterpolationComparator::new(config.comparator_bits, p) {
            Ok(comparator) => Some(Box::new(comparator) as Box<dyn Comparator<B>>),
            Err(e) => {
                warn!("No comparator, similarity and range queries are unavailable: {e}");
                None
            }
        };

        let api_keys = DashSet::new();
        api_keys.insert(master_key.to_string());
        info!(
            "Server started with {} workers: {}",
            pool.threads(),
            context.describe()?
        );
        Ok(Self {
            context,
            store: None,
            config,
            comparator,
            pool,
            registry: DelegationRegistry::new(),
            api_keys,
        })
    }

    /// Replace the comparator.
    pub fn with_comparator(mut self, comparator: Box<dyn Comparator<B>>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Returns the scheme context.
    pub fn context(&self) -> &SchemeContext<B> {
        &self.context
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Encrypt and load a table given column by column, replacing the
    /// current one.
    pub fn set_data(&mut self, columns: &[Vec<u64>]) -> Result<()> {
        self.store = Some(EncryptedStore::set_data(&self.context, columns)?);
        Ok(())
    }

    /// Load a table of encryptions of zero, replacing the current one.
    pub fn gen_data(&mut self, num_rows: usize, num_columns: usize) -> Result<()> {
        self.store = Some(EncryptedStore::gen_data(&self.context, num_rows, num_columns)?);
        Ok(())
    }

    /// Load a table of values drawn uniformly in `[low, high]`, replacing
    /// the current one.
    pub fn gen_continuous_data(
        &mut self,
        num_rows: usize,
        num_columns: usize,
        low: u64,
        high: u64,
    ) -> Result<()> {
        self.store = Some(EncryptedStore::gen_continuous_data(
            &self.context,
            num_rows,
            num_columns,
            low,
            high,
        )?);
        Ok(())
    }

    /// Returns the table.
    pub fn store(&self) -> Result<&EncryptedStore<B>> {
        self.store.as_ref().ok_or(Error::DataNotSet)
    }

    /// Annotate the columns of the table with headers.
    pub fn set_column_headers(&mut self, headers: Vec<String>) -> Result<()> {
        self.store
            .as_mut()
            .ok_or(Error::DataNotSet)?
            .set_column_headers(headers)
    }

    /// Returns an engine mutating the table.
    pub fn mutations(&mut self) -> Result<MutationEngine<'_, B>> {
        let store = self.store.as_mut().ok_or(Error::DataNotSet)?;
        Ok(MutationEngine::new(&self.context, store))
    }

    /// Returns a query engine over the table, without delegation.
    pub fn queries(&self) -> Result<QueryEngine<'_, B>> {
        let engine = QueryEngine::new(&self.context, self.store()?, &self.config);
        Ok(match self.comparator.as_deref() {
            Some(comparator) => engine.with_comparator(comparator),
            None => engine,
        })
    }

    /// Returns the worker pool of the parallel queries.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Authorize `client_id`, whose results are re-encrypted towards
    /// `client_key`, and accept `new_api_key` from now on. Requires a valid
    /// API key.
    pub fn authorize(
        &self,
        api_key: &str,
        client_id: &str,
        client_key: &B::ClientKey,
        new_api_key: &str,
    ) -> Result<()> {
        self.check_api_key(api_key)?;
        self.registry
            .authorize(self.context.backend(), client_id, client_key)?;
        self.api_keys.insert(new_api_key.to_string());
        Ok(())
    }

    /// Reports whether `client_id` was authorized.
    pub fn is_authorized(&self, client_id: &str) -> bool {
        self.registry.is_authorized(client_id)
    }

    /// Run a query for `client_id` and re-encrypt its results towards the
    /// client. The credentials are checked before any homomorphic work.
    pub fn execute(
        &self,
        api_key: &str,
        client_id: &str,
        request: &QueryRequest,
    ) -> QueryResponse<B::Ciphertext> {
        match self.try_execute(api_key, client_id, request) {
            Ok(results) => QueryResponse::Completed(results),
            Err(e) => {
                warn!("Query of {client_id} failed: {e}");
                QueryResponse::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn check_api_key(&self, api_key: &str) -> Result<()> {
        if !self.api_keys.contains(api_key) {
            return Err(Error::InvalidApiKey);
        }
        Ok(())
    }

    fn try_execute(
        &self,
        api_key: &str,
        client_id: &str,
        request: &QueryRequest,
    ) -> Result<Vec<NamedResult<B::Ciphertext>>> {
        self.check_api_key(api_key)?;
        if !self.registry.is_authorized(client_id) {
            return Err(Error::Unauthorized(client_id.to_string()));
        }
        self.run(request)?
            .into_iter()
            .map(|result| {
                let ciphertext =
                    self.registry
                        .delegate(self.context.backend(), client_id, &result.ciphertext)?;
                Ok(NamedResult::new(result.name, ciphertext))
            })
            .collect()
    }

    fn run(&self, request: &QueryRequest) -> Result<Vec<NamedResult<B::Ciphertext>>> {
        let engine = self.queries()?;
        let pool = &self.pool;
        Ok(match request {
            QueryRequest::Count {
                descriptor,
                parallel,
            } => {
                let count = if *parallel {
                    engine.count_p(pool, descriptor)?
                } else {
                    engine.count(descriptor)?
                };
                vec![NamedResult::new("count", count)]
            }
            QueryRequest::Maf {
                snp_column,
                descriptor,
                parallel,
            } => {
                let maf = if *parallel {
                    engine.maf_p(pool, *snp_column, descriptor)?
                } else {
                    engine.maf(*snp_column, descriptor)?
                };
                vec![NamedResult::new("maf", maf)]
            }
            QueryRequest::Prs { weights, parallel } => {
                let scores = if *parallel {
                    engine.prs_p(pool, weights)?
                } else {
                    engine.prs(weights)?
                };
                scores
                    .into_iter()
                    .enumerate()
                    .map(|(chunk, score)| NamedResult::new(format!("score_{chunk}"), score))
                    .collect()
            }
            QueryRequest::Similarity {
                target_column,
                query,
                threshold,
                parallel,
            } => {
                let backend = self.context.backend();
                let query = query
                    .iter()
                    .map(|bytes| backend.deserialize(bytes).map_err(Error::backend))
                    .collect::<Result<Vec<_>>>()?;
                let result = if *parallel {
                    engine.similarity_p(pool, *target_column, &query, *threshold)?
                } else {
                    engine.similarity(*target_column, &query, *threshold)?
                };
                vec![
                    NamedResult::new("with_target", result.with_target),
                    NamedResult::new("without_target", result.without_target),
                ]
            }
            QueryRequest::CountingRange {
                column,
                lower,
                upper,
            } => vec![NamedResult::new(
                "count",
                engine.counting_range(*column, *lower, *upper)?,
            )],
            QueryRequest::MafRange {
                snp_column,
                column,
                lower,
                upper,
            } => vec![NamedResult::new(
                "maf",
                engine.maf_range(*snp_column, *column, *lower, *upper)?,
            )],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{QueryRequest, QueryResponse, Server};
    use crate::backend::{SimulatedBackend, SimulatedClient};
    use crate::{Composition, EngineConfig, Error, Filter, MafCounts, QueryDescriptor};
    use gendb_traits::CiphertextCodec;
    use std::error::Error as StdError;

    const MASTER: &str = "master";

    fn server() -> Result<Server<SimulatedBackend>, Box<dyn StdError>> {
        let mut server = Server::new(
            SimulatedBackend::new(4, 65537)?,
            EngineConfig::default().with_threads(2),
            MASTER,
        )?;
        server.set_data(&[
            vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 0],
            vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 1],
            vec![0, 0, 0, 0, 1, 1, 0, 1, 0, 0],
        ])?;
        Ok(server)
    }

    #[test]
    fn data_must_be_set() -> Result<(), Box<dyn StdError>> {
        let backend = SimulatedBackend::new(4, 65537)?;
        let mut server = Server::new(backend, EngineConfig::default(), MASTER)?;
        assert!(matches!(server.store(), Err(Error::DataNotSet)));
        assert!(server.mutations().is_err());
        server.gen_data(5, 2)?;
        assert_eq!(server.store()?.num_rows(), 5);
        server.gen_continuous_data(6, 1, 0, 9)?;
        assert_eq!(server.store()?.value_bound(0)?, 10);
        Ok(())
    }

    #[test]
    fn credentials_are_checked_first() -> Result<(), Box<dyn StdError>> {
        let server = server()?;
        let client = SimulatedClient::new(server.context().backend());
        let request = QueryRequest::Count {
            descriptor: QueryDescriptor::new(Composition::Conjunctive, vec![Filter::new(0, 0)]),
            parallel: false,
        };

        assert!(server
            .authorize("wrong", "alice", &client.public_key(), "alice-key")
            .is_err());
        assert!(!server.is_authorized("alice"));
        assert!(matches!(
            server.execute(MASTER, "alice", &request),
            QueryResponse::Failed { .. }
        ));

        server.authorize(MASTER, "alice", &client.public_key(), "alice-key")?;
        assert!(matches!(
            server.execute("wrong", "alice", &request),
            QueryResponse::Failed { .. }
        ));
        let results = server.execute("alice-key", "alice", &request).into_results()?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "count");
        assert_eq!(client.decrypt(&results[0].ciphertext)?[0], 4);
        Ok(())
    }

    #[test]
    fn requests() -> Result<(), Box<dyn StdError>> {
        let server = server()?;
        let client = SimulatedClient::new(server.context().backend());
        server.authorize(MASTER, "bob", &client.public_key(), "bob-key")?;
        let run = |request: QueryRequest| -> Result<Vec<Vec<u64>>, Box<dyn StdError>> {
            server
                .execute("bob-key", "bob", &request)
                .into_results()?
                .iter()
                .map(|r| Ok(client.decrypt(&r.ciphertext)?))
                .collect()
        };
        let or = QueryDescriptor::new(
            Composition::Disjunctive,
            vec![Filter::new(0, 1), Filter::new(1, 2)],
        );
        let backend = server.context().backend();
        let encrypted_query = server
            .context()
            .encrypt_query(&[1, 1])?
            .iter()
            .map(|ct| backend.serialize(ct))
            .collect::<Vec<_>>();

        for parallel in [false, true] {
            let count = run(QueryRequest::Count {
                descriptor: or.clone(),
                parallel,
            })?;
            assert_eq!(count[0][0], 5);

            let maf = run(QueryRequest::Maf {
                snp_column: 1,
                descriptor: or.clone(),
                parallel,
            })?;
            assert_eq!(MafCounts::from_slots(&maf[0]).and_then(|c| c.frequency()), Some(0.3));

            let scores = run(QueryRequest::Prs {
                weights: vec![(0, 2), (1, -1)],
                parallel,
            })?;
            assert_eq!(scores.len(), 3);
            assert_eq!(scores[0], vec![0, 65536, 65535, 2]);

            let similarity = run(QueryRequest::Similarity {
                target_column: 2,
                query: encrypted_query.clone(),
                threshold: 1,
                parallel,
            })?;
            // Rows 1, 3, 4, 5, 7 and 9 lie within distance 1 of (1, 1).
            assert_eq!(similarity[0][0], 3);
            assert_eq!(similarity[1][0], 3);
        }

        let count = run(QueryRequest::CountingRange {
            column: 1,
            lower: 1,
            upper: 2,
        })?;
        assert_eq!(count[0][0], 7);
        let maf = run(QueryRequest::MafRange {
            snp_column: 0,
            column: 1,
            lower: 2,
            upper: 2,
        })?;
        let expected = MafCounts {
            numerator: 3,
            denominator: 6,
        };
        assert_eq!(MafCounts::from_slots(&maf[0]), Some(expected));

        let failed = server.execute(
            "bob-key",
            "bob",
            &QueryRequest::Prs {
                weights: vec![(7, 1)],
                parallel: false,
            },
        );
        assert!(failed.into_results().is_err_and(|reason| reason.contains("column")));

        // The query vector arrives encrypted and must deserialize.
        let malformed = server.execute(
            "bob-key",
            "bob",
            &QueryRequest::Similarity {
                target_column: 2,
                query: vec![vec![0; 3]],
                threshold: 1,
                parallel: false,
            },
        );
        assert!(matches!(malformed, QueryResponse::Failed { .. }));
        Ok(())
    }

    #[test]
    fn results_serialize() -> Result<(), Box<dyn StdError>> {
        let server = server()?;
        let client = SimulatedClient::new(server.context().backend());
        server.authorize(MASTER, "carol", &client.public_key(), "carol-key")?;
        let request = QueryRequest::CountingRange {
            column: 0,
            lower: 0,
            upper: 0,
        };
        let results = server.execute(MASTER, "carol", &request).into_results()?;
        let backend = server.context().backend();
        let bytes = results[0].to_bytes(backend);
        let ct = backend.deserialize(&bytes)?;
        assert_eq!(client.decrypt(&ct)?[0], 4);
        Ok(())
    }
}
