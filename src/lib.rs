//! Client-side sharding over a fleet of independent key-value nodes.
//!
//! Keys are placed with a consistent hash ring ([`HashRing`]) so that adding or
//! removing a node only remaps the keys on the arcs it gains or loses.
//! [`ShardRouter`] extracts `{hash tags}`, resolves the owning node and
//! forwards each command to that node's [`KeyValueStore`] handle.

pub mod config;
pub mod error;
pub mod hash;
pub mod hash_ring;
pub mod opt;
pub mod router;
pub mod store;

pub use crate::config::{ServerConfig, ShardConfig};
pub use crate::error::{Result, ShardError};
pub use crate::hash::{HashMethod, Position};
pub use crate::hash_ring::{HashRing, RingSpec, SharedRing};
pub use crate::router::{route_key, ShardRouter};
pub use crate::store::{KeyValueStore, MemoryStore, StoreError, Value};
