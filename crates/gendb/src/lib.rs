#![crate_name = "gendb"]
#![crate_type = "lib"]
#![warn(missing_docs, unused_imports)]
#![doc = include_str!("../README.md")]

mod errors;

pub mod aggregate;
pub mod backend;
pub mod predicate;

mod comparator;
mod config;
mod context;
mod delegation;
mod mutation;
mod parallel;
mod parameters;
mod query;
mod server;
mod store;

pub use comparator::InterpolationComparator;
pub use config::{EngineConfig, DEFAULT_MAX_DELETES};
pub use context::SchemeContext;
pub use delegation::DelegationRegistry;
pub use errors::{Error, ParametersError, Result};
pub use mutation::MutationEngine;
pub use parallel::{shard, WorkerPool};
pub use parameters::{SchemeParameters, SchemeParametersBuilder};
pub use predicate::{Composition, Filter, QueryDescriptor};
pub use query::{MafCounts, QueryEngine, SimilarityResult};
pub use server::{NamedResult, QueryRequest, QueryResponse, Server};
pub use store::{EncryptedColumn, EncryptedStore, GENOTYPE_BOUND};

pub use gendb_traits::{CiphertextCodec, Comparator, HomomorphicBackend, KeySwitching};
