//! Core library for the Trinity cluster runtime.
//!
//! This crate provides the fundamental abstractions shared by every other
//! crate in the workspace:
//! - Node identity and network-node records
//! - Ring positions and the consistent-hash ring
//! - The in-memory key/value store and its expiry sweeper

pub mod error;
pub mod kv;
pub mod node;
pub mod position;
pub mod ring;
mod rng;

pub use error::{Error, Result};
pub use kv::{hash_key, KvStore};
pub use node::{NetworkNode, NodeId, DISTRIBUTION_SIZE};
pub use position::Position;
pub use ring::Ring;
