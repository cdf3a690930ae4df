//! Domain types for the chat analytics pipeline
//!
//! Events as they arrive from the host application, their enriched form,
//! and the time-series types the store aggregates them into.

pub mod enrichment;
pub mod events;
pub mod metrics;
pub mod validation_constants;

pub use enrichment::{
    CostModel, DerivedFields, EngagementModel, EnrichedEvent, Enricher, RateTable, TokenRate,
    WeightedEngagement,
};
pub use events::*;
pub use metrics::*;
