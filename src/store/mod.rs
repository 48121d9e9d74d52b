use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use self::memory::MemoryStore;

/// A value stored in or returned by a backend node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    /// Decodes a raw reply: an integer when the text parses as one, text otherwise.
    ///
    /// For network-backed [`KeyValueStore`] implementations that receive bulk
    /// replies as bytes; [`MemoryStore`] keeps typed values and never needs it.
    pub fn from_reply(reply: &[u8]) -> Value {
        let text = String::from_utf8_lossy(reply);
        match text.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Text(text.into_owned()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Int(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Failures reported by a backend node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(String),

    #[error("key not found: {0:?}")]
    NotFound(String),

    #[error("timed out waiting on blocking pop")]
    Timeout,

    #[error("operation against a key holding the wrong kind of value: {0:?}")]
    WrongType(String),
}

/// Command surface of a single backend key-value node.
///
/// The router resolves a node and then calls exactly one of these on its
/// handle. Implementations must be shareable across threads.
pub trait KeyValueStore: Send + Sync {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Value, StoreError>;

    fn lpush(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn rpush(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn lpop(&self, key: &str) -> Result<Value, StoreError>;

    fn rpop(&self, key: &str) -> Result<Value, StoreError>;

    /// Pops the head of the first non-empty list among `keys`, waiting up to
    /// `timeout` for one to be pushed. A zero timeout waits indefinitely.
    fn blpop(&self, keys: &[&str], timeout: Duration) -> Result<Value, StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn get(&self, key: &str) -> Result<Value, StoreError> {
        (**self).get(key)
    }

    fn lpush(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).lpush(key, value)
    }

    fn rpush(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).rpush(key, value)
    }

    fn lpop(&self, key: &str) -> Result<Value, StoreError> {
        (**self).lpop(key)
    }

    fn rpop(&self, key: &str) -> Result<Value, StoreError> {
        (**self).rpop(key)
    }

    fn blpop(&self, keys: &[&str], timeout: Duration) -> Result<Value, StoreError> {
        (**self).blpop(keys, timeout)
    }
}
