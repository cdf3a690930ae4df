//! Real-time distribution of aggregate deltas to channel subscribers

pub mod buffer;
pub mod delta;
pub mod service;

use thiserror::Error;

pub use buffer::{BufferState, DeltaBuffer};
pub use delta::{ChannelName, ChannelNameError, Delta, DeltaBatch};
pub use service::{
    BatchHandler, PublisherConfig, PublisherStats, RealTimePublisher, SubscriptionId,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublisherError {
    #[error("Invalid channel name: {0}")]
    InvalidChannel(#[from] ChannelNameError),

    #[error("No subscription with id {id}")]
    UnknownSubscription { id: SubscriptionId },
}

/// Receives one delta per processed event
///
/// Implementations must not block: the processor calls this on its hot path.
pub trait DeltaSink: Send + Sync {
    fn publish(&self, delta: Delta);
}
