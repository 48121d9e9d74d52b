use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while building the ring, resolving keys or dispatching commands.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("unknown hash method: {0:?}")]
    UnknownHashMethod(String),

    #[error("invalid replica count {0}: each node needs at least one virtual node")]
    InvalidReplicaCount(i64),

    #[error("hash ring has no nodes")]
    EmptyRing,

    #[error("node {0:?} is not a member of the ring")]
    NodeNotFound(String),

    #[error("node {0:?} is already a member of the ring")]
    DuplicateNode(String),

    #[error("no store registered for node {node:?} (key {key:?})")]
    NoNodeForKey { key: String, node: String },

    #[error("keys map to different nodes: {first:?} -> {first_node:?}, {other:?} -> {other_node:?}")]
    CrossNodeKeys {
        first: String,
        first_node: String,
        other: String,
        other_node: String,
    },

    #[error("no keys given")]
    NoKeys,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("ring snapshot error: {0}")]
    Snapshot(String),
}

impl ShardError {
    pub fn from_snapshot_error<E: std::fmt::Display>(error: E) -> ShardError {
        ShardError::Snapshot(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
