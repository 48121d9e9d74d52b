use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace};

use super::{KeyValueStore, StoreError, Value};

#[derive(Debug)]
enum Entry {
    Scalar(Value),
    List(VecDeque<Value>),
}

/// An in-process `KeyValueStore`.
///
/// Used by tests and the demo binary in place of a networked node. Strings and
/// lists share one keyspace, as on a real node; `blpop` parks on a condition
/// variable that every push signals.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    data: Mutex<HashMap<String, Entry>>,
    pushed: Condvar,
}

impl MemoryStore {
    pub fn new<S: Into<String>>(name: S) -> Self {
        MemoryStore {
            name: name.into(),
            data: Mutex::new(HashMap::new()),
            pushed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys currently held, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, key: &str, value: Value, front: bool) -> Result<(), StoreError> {
        let mut data = self.lock();
        let entry = data
            .entry(key.to_owned())
            .or_insert_with(|| Entry::List(VecDeque::new()));

        match entry {
            Entry::List(list) if front => list.push_front(value),
            Entry::List(list) => list.push_back(value),
            Entry::Scalar(_) => return Err(StoreError::WrongType(key.to_owned())),
        }

        trace!("{}: pushed onto {:?}", self.name, key);
        self.pushed.notify_all();
        Ok(())
    }

    fn pop(data: &mut HashMap<String, Entry>, key: &str, front: bool) -> Result<Option<Value>, StoreError> {
        let (value, drained) = match data.get_mut(key) {
            None => return Ok(None),
            Some(Entry::Scalar(_)) => return Err(StoreError::WrongType(key.to_owned())),
            Some(Entry::List(list)) => {
                let value = if front { list.pop_front() } else { list.pop_back() };
                (value, list.is_empty())
            }
        };

        // an emptied list no longer exists
        if drained {
            data.remove(key);
        }
        Ok(value)
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.lock().insert(key.to_owned(), Entry::Scalar(value));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Value, StoreError> {
        match self.lock().get(key) {
            Some(Entry::Scalar(value)) => Ok(value.clone()),
            Some(Entry::List(_)) => Err(StoreError::WrongType(key.to_owned())),
            None => Err(StoreError::NotFound(key.to_owned())),
        }
    }

    fn lpush(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.push(key, value, true)
    }

    fn rpush(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.push(key, value, false)
    }

    fn lpop(&self, key: &str) -> Result<Value, StoreError> {
        Self::pop(&mut self.lock(), key, true)?.ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    fn rpop(&self, key: &str) -> Result<Value, StoreError> {
        Self::pop(&mut self.lock(), key, false)?.ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    fn blpop(&self, keys: &[&str], timeout: Duration) -> Result<Value, StoreError> {
        let deadline = if timeout == Duration::from_secs(0) {
            None
        } else {
            Some(Instant::now() + timeout)
        };

        let mut data = self.lock();
        loop {
            for key in keys {
                if let Some(value) = Self::pop(&mut data, key, true)? {
                    debug!("{}: blpop served from {:?}", self.name, key);
                    return Ok(value);
                }
            }

            data = match deadline {
                None => self.pushed.wait(data).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::Timeout);
                    }
                    let (guard, _) = self
                        .pushed
                        .wait_timeout(data, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
            };
        }
    }
}
