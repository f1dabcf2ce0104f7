//! Error types for the core library.

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node {0} is already registered in the ring")]
    NodeAlreadyRegistered(crate::node::NodeId),

    #[error("node {0} is not registered in the ring")]
    NodeNotRegistered(crate::node::NodeId),

    #[error("ring is empty")]
    RingEmpty,
}
