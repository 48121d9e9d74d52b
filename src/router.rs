use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{ServerConfig, ShardConfig};
use crate::error::{Result, ShardError};
use crate::hash_ring::{HashRing, SharedRing};
use crate::store::{KeyValueStore, StoreError, Value};

/// Returns the part of `key` used for placement.
///
/// When the key holds a `{...}` pair, only the text between the first `{` and
/// the nearest `}` after it is hashed, so `"profile{user:1}"` and
/// `"orders{user:1}"` land on the same node. Otherwise the whole key is used.
pub fn route_key(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        let rest = &key[open + 1..];
        if let Some(close) = rest.find('}') {
            return &rest[..close];
        }
    }
    key
}

/// Routes commands to the backend node owning each key.
///
/// Holds one ring and one store handle per ring node. Every command is
/// forwarded to exactly one handle, without retry or fallback.
pub struct ShardRouter<S> {
    ring: SharedRing,
    stores: HashMap<String, S>,
    block_timeouts: HashMap<String, Duration>,
}

impl<S: KeyValueStore> ShardRouter<S> {
    pub fn new<I>(stores: I, ring: SharedRing) -> Self
    where
        I: IntoIterator<Item = (String, S)>,
    {
        let mut handles = HashMap::new();
        for (node, store) in stores {
            if handles.insert(node.clone(), store).is_some() {
                warn!("node {:?} given more than one store handle; keeping the last", node);
            }
        }
        let stores = handles;
        for node in ring.nodes() {
            if !stores.contains_key(&node) {
                warn!("ring node {:?} has no store handle; its keys cannot be served", node);
            }
        }

        ShardRouter {
            ring,
            stores,
            block_timeouts: HashMap::new(),
        }
    }

    /// Builds the ring from `conf` and obtains one handle per server from `connect`.
    pub fn from_config<F>(conf: &ShardConfig, mut connect: F) -> Result<Self>
    where
        F: FnMut(&ServerConfig) -> std::result::Result<S, StoreError>,
    {
        conf.validate()?;
        let ring = Arc::new(conf.build_ring()?);

        let mut stores = Vec::with_capacity(conf.servers.len());
        for server in &conf.servers {
            info!("connecting shard node {:?} at {}", server.name, server.host);
            stores.push((server.name.clone(), connect(server)?));
        }

        let mut router = Self::new(stores, ring);
        router.block_timeouts = conf
            .servers
            .iter()
            .map(|s| (s.name.clone(), s.block_timeout()))
            .collect();
        Ok(router)
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn shared_ring(&self) -> SharedRing {
        Arc::clone(&self.ring)
    }

    /// Name of the node `key` routes to.
    pub fn node_for(&self, key: &str) -> Result<String> {
        let tag = route_key(key);
        let node = self.ring.resolve(tag)?;
        debug!("key {:?} (tag {:?}) -> node {:?}", key, tag, node);
        Ok(node)
    }

    /// Handle of the node `key` routes to.
    pub fn store_for(&self, key: &str) -> Result<&S> {
        let node = self.node_for(key)?;
        self.handle(key, node).map(|(_, store)| store)
    }

    /// Resolves `key` and runs `op` against the owning node's handle.
    pub fn dispatch<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce(&S) -> std::result::Result<T, StoreError>,
    {
        let store = self.store_for(key)?;
        Ok(op(store)?)
    }

    pub fn set<V: Into<Value>>(&self, key: &str, value: V) -> Result<()> {
        self.dispatch(key, |store| store.set(key, value.into()))
    }

    pub fn get(&self, key: &str) -> Result<Value> {
        self.dispatch(key, |store| store.get(key))
    }

    pub fn lpush<V: Into<Value>>(&self, key: &str, value: V) -> Result<()> {
        self.dispatch(key, |store| store.lpush(key, value.into()))
    }

    pub fn rpush<V: Into<Value>>(&self, key: &str, value: V) -> Result<()> {
        self.dispatch(key, |store| store.rpush(key, value.into()))
    }

    pub fn lpop(&self, key: &str) -> Result<Value> {
        self.dispatch(key, |store| store.lpop(key))
    }

    pub fn rpop(&self, key: &str) -> Result<Value> {
        self.dispatch(key, |store| store.rpop(key))
    }

    /// Blocking pop across `keys`, which must all live on one node.
    pub fn blpop(&self, keys: &[&str], timeout: Duration) -> Result<Value> {
        let (_, store) = self.blpop_target(keys)?;
        Ok(store.blpop(keys, timeout)?)
    }

    /// Blocking pop using the owning server's configured `block_timeout`.
    pub fn blpop_default(&self, keys: &[&str]) -> Result<Value> {
        let (node, store) = self.blpop_target(keys)?;
        let timeout = self
            .block_timeouts
            .get(&node)
            .copied()
            .unwrap_or_else(|| Duration::from_secs(0));
        Ok(store.blpop(keys, timeout)?)
    }

    /// Adds `node` to the ring and registers its handle and blocking-pop timeout.
    pub fn add_node<N: Into<String>>(&mut self, node: N, store: S, block_timeout: Duration) -> Result<()> {
        let node = node.into();
        self.ring.add_node(node.clone())?;
        self.block_timeouts.insert(node.clone(), block_timeout);
        self.stores.insert(node, store);
        Ok(())
    }

    /// Adds the node described by `server` with its configured `block_timeout`.
    pub fn add_server(&mut self, server: &ServerConfig, store: S) -> Result<()> {
        self.add_node(server.name.clone(), store, server.block_timeout())
    }

    /// Removes `node` from the ring and returns its handle.
    pub fn remove_node(&mut self, node: &str) -> Result<Option<S>> {
        self.ring.remove_node(node)?;
        self.block_timeouts.remove(node);
        Ok(self.stores.remove(node))
    }

    fn blpop_target(&self, keys: &[&str]) -> Result<(String, &S)> {
        let (first, rest) = keys.split_first().ok_or(ShardError::NoKeys)?;
        let node = self.node_for(first)?;
        for other in rest {
            let other_node = self.node_for(other)?;
            if other_node != node {
                return Err(ShardError::CrossNodeKeys {
                    first: (*first).to_owned(),
                    first_node: node,
                    other: (*other).to_owned(),
                    other_node,
                });
            }
        }
        self.handle(first, node)
    }

    fn handle(&self, key: &str, node: String) -> Result<(String, &S)> {
        match self.stores.get(&node) {
            Some(store) => Ok((node, store)),
            None => {
                warn!("key {:?} resolved to node {:?} which has no store", key, node);
                Err(ShardError::NoNodeForKey {
                    key: key.to_owned(),
                    node,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn router(nodes: &[&str]) -> ShardRouter<Arc<MemoryStore>> {
        let ring = Arc::new(HashRing::new(nodes.iter().copied(), "md5", 10).unwrap());
        let stores = nodes
            .iter()
            .map(|n| (n.to_string(), Arc::new(MemoryStore::new(*n))))
            .collect::<Vec<_>>();
        ShardRouter::new(stores, ring)
    }

    #[test]
    fn route_key_extracts_first_tag() {
        assert_eq!(route_key("foo{bar}baz"), "bar");
        assert_eq!(route_key("foo"), "foo");
        assert_eq!(route_key("a{x}b{y}c"), "x");
        assert_eq!(route_key("abcd{name2:9}efg"), "name2:9");
        assert_eq!(route_key("{user:1}"), "user:1");
        assert_eq!(route_key("{}"), "");
    }

    #[test]
    fn route_key_without_a_closed_pair() {
        assert_eq!(route_key("foo{bar"), "foo{bar");
        assert_eq!(route_key("foo}bar{"), "foo}bar{");
        assert_eq!(route_key("x}y{z}w"), "z");
        assert_eq!(route_key("{{a}}"), "{a");
        assert_eq!(route_key(""), "");
    }

    #[test]
    fn tagged_keys_share_a_node() {
        let router = router(&["n1", "n2", "n3", "n4"]);
        let node = router.node_for("profile{user:1}").unwrap();
        assert_eq!(router.node_for("orders{user:1}").unwrap(), node);
        assert_eq!(router.node_for("user:1").unwrap(), node);
    }

    #[test]
    fn commands_land_on_owning_node() {
        let router = router(&["n1", "n2", "n3"]);
        router.set("major{name1:1}", "cs").unwrap();
        router.set("year{name1:1}", 4).unwrap();

        assert_eq!(router.get("major{name1:1}").unwrap(), Value::from("cs"));
        assert_eq!(router.get("year{name1:1}").unwrap(), Value::Int(4));

        let owner = router.store_for("name1:1").unwrap();
        assert_eq!(owner.keys(), vec!["major{name1:1}".to_owned(), "year{name1:1}".to_owned()]);
    }

    #[test]
    fn list_commands_are_forwarded() {
        let router = router(&["n1", "n2"]);
        router.rpush("upvotes{post:1}", 400).unwrap();
        router.rpush("upvotes{post:1}", "upvotes").unwrap();
        router.lpush("upvotes{post:1}", 1).unwrap();

        assert_eq!(router.lpop("upvotes{post:1}").unwrap(), Value::Int(1));
        assert_eq!(router.rpop("upvotes{post:1}").unwrap(), Value::from("upvotes"));
        assert_eq!(router.lpop("upvotes{post:1}").unwrap(), Value::Int(400));
    }

    #[test]
    fn store_errors_pass_through() {
        let router = router(&["n1", "n2"]);
        match router.get("missing") {
            Err(ShardError::Store(StoreError::NotFound(key))) => assert_eq!(key, "missing"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn missing_handle_is_no_node_for_key() {
        let ring = Arc::new(HashRing::new(vec!["n1", "ghost"], "md5", 10).unwrap());
        let router = ShardRouter::new(vec![("n1".to_owned(), MemoryStore::new("n1"))], ring);

        let ghost_key = (0..1000)
            .map(|i| format!("k{}", i))
            .find(|k| router.node_for(k).unwrap() == "ghost")
            .unwrap();
        match router.set(&ghost_key, 1) {
            Err(ShardError::NoNodeForKey { key, node }) => {
                assert_eq!(key, ghost_key);
                assert_eq!(node, "ghost");
            }
            other => panic!("expected NoNodeForKey, got {:?}", other),
        }
    }

    #[test]
    fn empty_ring_fails_dispatch() {
        let ring = Arc::new(HashRing::new(Vec::<String>::new(), "md5", 10).unwrap());
        let router: ShardRouter<MemoryStore> = ShardRouter::new(Vec::new(), ring);
        assert!(matches!(router.get("k"), Err(ShardError::EmptyRing)));
    }

    #[test]
    fn blpop_requires_one_node() {
        let router = router(&["n1", "n2", "n3"]);
        assert!(matches!(router.blpop(&[], Duration::from_millis(1)), Err(ShardError::NoKeys)));

        router.rpush("q2{jobs}", "work").unwrap();
        let value = router.blpop(&["q1{jobs}", "q2{jobs}"], Duration::from_millis(10)).unwrap();
        assert_eq!(value, Value::from("work"));

        let first = "k0".to_owned();
        let first_node = router.node_for(&first).unwrap();
        let other = (1..1000)
            .map(|i| format!("k{}", i))
            .find(|k| router.node_for(k).unwrap() != first_node)
            .unwrap();
        assert!(matches!(
            router.blpop(&[first.as_str(), other.as_str()], Duration::from_millis(1)),
            Err(ShardError::CrossNodeKeys { .. })
        ));
    }

    #[test]
    fn blpop_timeout_propagates() {
        let router = router(&["n1"]);
        assert!(matches!(
            router.blpop(&["empty"], Duration::from_millis(20)),
            Err(ShardError::Store(StoreError::Timeout))
        ));
    }

    #[test]
    fn from_config_uses_block_timeout() {
        let conf = ShardConfig::from_json_str(
            r#"{"servers": [{"name": "solo", "host": "mem", "block_timeout": 1}], "hash": "crc32", "replicas": 4}"#,
        )
        .unwrap();
        let router = ShardRouter::from_config(&conf, |s| Ok(MemoryStore::new(s.name.clone()))).unwrap();
        assert_eq!(router.ring().nodes(), vec!["solo".to_owned()]);

        let started = std::time::Instant::now();
        assert!(matches!(
            router.blpop_default(&["nothing"]),
            Err(ShardError::Store(StoreError::Timeout))
        ));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn from_config_surfaces_connect_failure() {
        let conf = ShardConfig::from_json_str(
            r#"{"servers": [{"name": "a", "host": "10.0.0.1:6379"}], "hash": "md5", "replicas": 2}"#,
        )
        .unwrap();
        let result = ShardRouter::<MemoryStore>::from_config(&conf, |s| {
            Err(StoreError::Backend(format!("dial {} refused", s.host)))
        });
        assert!(matches!(result, Err(ShardError::Store(StoreError::Backend(_)))));
    }

    #[test]
    fn topology_changes_keep_handles_in_step() {
        let mut router = router(&["n1", "n2"]);
        router
            .add_node("n3", Arc::new(MemoryStore::new("n3")), Duration::from_secs(1))
            .unwrap();
        assert_eq!(router.ring().len(), 30);
        assert!(matches!(
            router.add_node("n3", Arc::new(MemoryStore::new("n3")), Duration::from_secs(1)),
            Err(ShardError::DuplicateNode(_))
        ));

        let removed = router.remove_node("n1").unwrap();
        assert_eq!(removed.map(|s| s.name().to_owned()), Some("n1".to_owned()));
        for i in 0..200 {
            let node = router.node_for(&format!("key-{}", i)).unwrap();
            assert_ne!(node, "n1");
        }
        assert!(matches!(router.remove_node("n1"), Err(ShardError::NodeNotFound(_))));
    }

    #[test]
    fn added_node_uses_its_block_timeout() {
        let conf = ShardConfig::from_json_str(
            r#"{"servers": [{"name": "n1", "host": "mem", "block_timeout": 1}], "hash": "md5", "replicas": 10}"#,
        )
        .unwrap();
        let mut router = ShardRouter::from_config(&conf, |s| Ok(MemoryStore::new(s.name.clone()))).unwrap();

        let added = ServerConfig {
            name: "n2".to_owned(),
            host: "mem".to_owned(),
            password: None,
            block_timeout: 1,
        };
        router.add_server(&added, MemoryStore::new("n2")).unwrap();

        let key = (0..1000)
            .map(|i| format!("queue-{}", i))
            .find(|k| router.node_for(k).unwrap() == "n2")
            .unwrap();
        let started = std::time::Instant::now();
        assert!(matches!(
            router.blpop_default(&[key.as_str()]),
            Err(ShardError::Store(StoreError::Timeout))
        ));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn duplicate_handles_keep_the_last() {
        let ring = Arc::new(HashRing::new(vec!["n1"], "md5", 4).unwrap());
        let router = ShardRouter::new(
            vec![
                ("n1".to_owned(), MemoryStore::new("first")),
                ("n1".to_owned(), MemoryStore::new("second")),
            ],
            ring,
        );
        assert_eq!(router.store_for("k").unwrap().name(), "second");
    }
}
