use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};
use crate::hash::{DigestFn, HashMethod, Position};

pub type SharedRing = Arc<HashRing>;

/// Mutable part of the ring. The ordered map is both the sorted sequence of
/// virtual positions and the position -> node mapping.
#[derive(Debug, Default)]
struct RingState {
    nodes: Vec<String>,
    positions: BTreeMap<Position, String>,
}

/// Consistent hash ring over a set of named nodes.
///
/// Each node is placed on the ring `replicas` times, at `hash("{node}:{i}")`.
/// A key belongs to the node owning the first position at or after
/// `hash(key)`, wrapping around past the largest position.
///
/// Lookups take a read lock and never block each other; `add_node` and
/// `remove_node` take the write lock.
pub struct HashRing {
    method: HashMethod,
    digest: DigestFn,
    replicas: usize,
    state: RwLock<RingState>,
}

impl HashRing {
    /// Creates a ring over `nodes` using the hash method registered under `hash_method`.
    pub fn new<I, S>(nodes: I, hash_method: &str, replicas: i64) -> Result<HashRing>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let method = HashMethod::lookup(hash_method)?;
        Self::with_method(nodes, method, replicas)
    }

    pub fn with_method<I, S>(nodes: I, method: HashMethod, replicas: i64) -> Result<HashRing>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if replicas <= 0 {
            return Err(ShardError::InvalidReplicaCount(replicas));
        }

        let ring = HashRing {
            method,
            digest: method.digest_fn(),
            replicas: replicas as usize,
            state: RwLock::new(RingState::default()),
        };

        {
            let mut state = ring.write();
            for node in nodes {
                ring.insert(&mut state, node.into())?;
            }
        }

        Ok(ring)
    }

    /// Rebuilds a ring from a previously captured [`RingSpec`].
    pub fn from_spec(spec: &RingSpec) -> Result<HashRing> {
        Self::with_method(spec.nodes.iter().cloned(), spec.hash_method, spec.replicas)
    }

    /// Captures the inputs needed to rebuild an equivalent ring.
    pub fn spec(&self) -> RingSpec {
        RingSpec {
            nodes: self.nodes(),
            hash_method: self.method,
            replicas: self.replicas as i64,
        }
    }

    pub fn hash_method(&self) -> HashMethod {
        self.method
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Member nodes, in insertion order.
    pub fn nodes(&self) -> Vec<String> {
        self.read().nodes.clone()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.read().nodes.iter().any(|n| n == node)
    }

    /// Number of virtual positions on the ring.
    pub fn len(&self) -> usize {
        self.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Ring positions currently owned by `node`, ascending.
    pub fn positions_of(&self, node: &str) -> Vec<Position> {
        self.read()
            .positions
            .iter()
            .filter(|(_, owner)| owner.as_str() == node)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn add_node<S: Into<String>>(&self, node: S) -> Result<()> {
        let node = node.into();
        let mut state = self.write();
        self.insert(&mut state, node.clone())?;
        info!(
            "added node {:?} to ring: {} nodes, {} positions",
            node,
            state.nodes.len(),
            state.positions.len()
        );
        Ok(())
    }

    pub fn remove_node(&self, node: &str) -> Result<()> {
        let mut state = self.write();
        let idx = match state.nodes.iter().position(|n| n == node) {
            Some(idx) => idx,
            None => {
                warn!("cannot remove node {:?}: not a member of the ring", node);
                return Err(ShardError::NodeNotFound(node.to_owned()));
            }
        };
        state.nodes.remove(idx);

        let mut freed = BTreeSet::new();
        for position in self.virtual_positions(node) {
            // a colliding position may have been taken over by a later node
            let owned = state.positions.get(&position).map_or(false, |owner| owner == node);
            if owned {
                state.positions.remove(&position);
                freed.insert(position);
            }
        }
        self.reclaim(&mut state, &freed);

        info!(
            "removed node {:?} from ring: {} nodes, {} positions",
            node,
            state.nodes.len(),
            state.positions.len()
        );
        Ok(())
    }

    /// Returns the node owning `key`.
    pub fn resolve(&self, key: &str) -> Result<String> {
        self.resolve_with_position(key).map(|(node, _)| node)
    }

    /// Returns the node owning `key` together with the ring position that matched.
    pub fn resolve_with_position(&self, key: &str) -> Result<(String, Position)> {
        let target = (self.digest)(key.as_bytes());
        let state = self.read();

        let (position, node) = state
            .positions
            .range((Bound::Included(&target), Bound::Unbounded))
            .next()
            .or_else(|| state.positions.iter().next())
            .ok_or(ShardError::EmptyRing)?;

        debug!("resolved key {:?} ({}) to node {:?} at {}", key, target, node, position);
        Ok((node.clone(), position.clone()))
    }

    /// Share of the ring's keyspace owned by each node, summing to 1.0.
    pub fn distribution(&self) -> BTreeMap<String, f64> {
        let state = self.read();
        let mut shares: BTreeMap<String, f64> =
            state.nodes.iter().map(|n| (n.clone(), 0.0)).collect();

        let (first, last) = match (state.positions.keys().next(), state.positions.keys().next_back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return shares,
        };

        let total = 2f64.powi(first.leading_bits() as i32);
        let mut previous: Option<u64> = None;
        for (position, owner) in state.positions.iter() {
            let value = position.leading_u64();
            let arc = match previous {
                Some(prev) => (value - prev) as f64,
                // the smallest position also owns the wrap-around arc
                None => total - (last.leading_u64() - first.leading_u64()) as f64,
            };
            *shares.entry(owner.clone()).or_insert(0.0) += arc / total;
            previous = Some(value);
        }

        shares
    }

    fn insert(&self, state: &mut RingState, node: String) -> Result<()> {
        if state.nodes.iter().any(|n| *n == node) {
            warn!("rejecting duplicate node {:?}", node);
            return Err(ShardError::DuplicateNode(node));
        }

        for position in self.virtual_positions(&node) {
            if let Some(previous) = state.positions.insert(position.clone(), node.clone()) {
                warn!("ring position {} collided: {:?} replaced by {:?}", position, previous, node);
            }
        }
        state.nodes.push(node);
        Ok(())
    }

    /// Hands freed positions back to remaining nodes that also hash there.
    /// Members are replayed in insertion order, so the last inserted wins as it
    /// would in a ring rebuilt from the same node list.
    fn reclaim(&self, state: &mut RingState, freed: &BTreeSet<Position>) {
        if freed.is_empty() {
            return;
        }

        let RingState { nodes, positions } = state;
        for member in nodes.iter() {
            for position in self.virtual_positions(member) {
                if freed.contains(&position) {
                    debug!("ring position {} returns to {:?}", position, member);
                    positions.insert(position, member.clone());
                }
            }
        }
    }

    fn virtual_positions<'a>(&'a self, node: &'a str) -> impl Iterator<Item = Position> + 'a {
        (0..self.replicas).map(move |i| (self.digest)(format!("{}:{}", node, i).as_bytes()))
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("HashRing")
            .field("method", &self.method)
            .field("replicas", &self.replicas)
            .field("nodes", &state.nodes)
            .field("positions", &state.positions.len())
            .finish()
    }
}

/// The `(nodes, hash method, replicas)` triple a ring is built from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RingSpec {
    pub nodes: Vec<String>,
    pub hash_method: HashMethod,
    pub replicas: i64,
}

impl RingSpec {
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(ShardError::from_snapshot_error)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<RingSpec> {
        rmp_serde::from_slice(bytes).map_err(ShardError::from_snapshot_error)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ShardError::from_snapshot_error)
    }

    pub fn from_json(json: &str) -> Result<RingSpec> {
        serde_json::from_str(json).map_err(ShardError::from_snapshot_error)
    }
}
