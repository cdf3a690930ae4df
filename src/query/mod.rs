//! Query engine: cached range reads and on-demand analysis

pub mod cache;
pub mod engine;
pub mod request;

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::store::StoreError;

pub use cache::{CacheStats, QueryCache, QueryCacheConfig};
pub use engine::{QueryEngine, QueryResult};
pub use request::{QueryKey, QueryRequest, Resolution};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}
