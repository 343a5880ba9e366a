//! Capacity-bounded resource pools.
//!
//! Generators never touch pool storage directly: they go through the
//! [`ResourcePools`] trait so the host can supply its own vessel-wide pool
//! model. [`PoolSet`] is the in-crate implementation used by [`crate::vessel::Vessel`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::ConfigNode;

/// Vessel-scoped pools addressed by resource name.
pub trait ResourcePools {
    /// Amount currently stored. Zero for unknown resources.
    fn amount(&self, resource: &str) -> f64;

    /// Maximum storable amount. Zero for unknown resources.
    fn capacity(&self, resource: &str) -> f64;

    /// Withdraw `amount` (positive) or deposit `-amount` (negative).
    ///
    /// Returns what actually moved, with the same sign as the request. The
    /// pool never goes below zero or above its capacity.
    fn request(&mut self, resource: &str, amount: f64) -> f64;
}

/// A single pool: `0 <= amount <= capacity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub amount: f64,
    pub capacity: f64,
}

impl Pool {
    /// Create a pool, clamping `amount` into `[0, capacity]`.
    pub fn new(amount: f64, capacity: f64) -> Self {
        let capacity = if capacity.is_finite() { capacity.max(0.0) } else { 0.0 };
        let amount = if amount.is_finite() { amount.clamp(0.0, capacity) } else { 0.0 };
        Self { amount, capacity }
    }

    /// Free space left in the pool.
    pub fn headroom(&self) -> f64 {
        (self.capacity - self.amount).max(0.0)
    }

    /// Same contract as [`ResourcePools::request`].
    pub fn request(&mut self, amount: f64) -> f64 {
        if !amount.is_finite() || amount == 0.0 {
            return 0.0;
        }
        if amount > 0.0 {
            let taken = amount.min(self.amount);
            self.amount = (self.amount - taken).max(0.0);
            taken
        } else {
            let stored = (-amount).min(self.headroom());
            self.amount = (self.amount + stored).min(self.capacity);
            -stored
        }
    }
}

/// Named pools, ordered by name so iteration and snapshots are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSet {
    pools: BTreeMap<String, Pool>,
}

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pool.
    pub fn insert(&mut self, resource: impl Into<String>, pool: Pool) {
        self.pools.insert(resource.into(), pool);
    }

    /// Grow an existing pool's capacity (and contents), creating it if needed.
    pub fn add_capacity(&mut self, resource: &str, amount: f64, capacity: f64) {
        let pool = self.pools.entry(resource.to_string()).or_default();
        *pool = Pool::new(pool.amount + amount, pool.capacity + capacity);
    }

    pub fn get(&self, resource: &str) -> Option<&Pool> {
        self.pools.get(resource)
    }

    pub fn remove(&mut self, resource: &str) -> Option<Pool> {
        self.pools.remove(resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pool)> {
        self.pools.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Write every pool as a `RESOURCE {name, amount, maxAmount}` node.
    pub fn save_into(&self, parent: &mut ConfigNode) {
        for (name, pool) in &self.pools {
            parent.add_node(save_pool(name, pool));
        }
    }

    /// Read back every `RESOURCE` child of `parent`.
    pub fn load_from(parent: &ConfigNode) -> Self {
        let mut set = Self::new();
        for node in parent.nodes_named("RESOURCE") {
            let (name, pool) = load_pool(node);
            if name.is_empty() {
                tracing::warn!("skipping resource node without a name");
                continue;
            }
            set.insert(name, pool);
        }
        set
    }
}

impl ResourcePools for PoolSet {
    fn amount(&self, resource: &str) -> f64 {
        self.pools.get(resource).map_or(0.0, |p| p.amount)
    }

    fn capacity(&self, resource: &str) -> f64 {
        self.pools.get(resource).map_or(0.0, |p| p.capacity)
    }

    fn request(&mut self, resource: &str, amount: f64) -> f64 {
        self.pools
            .get_mut(resource)
            .map_or(0.0, |p| p.request(amount))
    }
}

pub(crate) fn save_pool(name: &str, pool: &Pool) -> ConfigNode {
    let mut node = ConfigNode::new("RESOURCE");
    node.add_value("name", name);
    node.add_value("amount", pool.amount);
    node.add_value("maxAmount", pool.capacity);
    node
}

pub(crate) fn load_pool(node: &ConfigNode) -> (String, Pool) {
    (
        node.get_str("name").to_string(),
        Pool::new(node.get_f64("amount"), node.get_f64("maxAmount")),
    )
}
