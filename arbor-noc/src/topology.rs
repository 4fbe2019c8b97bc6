// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The read-only description of the tree shared by all routers.
//!
//! Node ids are dense in `[0, num_nodes)`. The topology is built once and
//! handed to every router inside an [`Rc`](std::rc::Rc); nothing mutates it
//! afterwards.

use std::collections::HashMap;

use arbor_engine::sim_error;
use arbor_engine::types::SimError;

use crate::flit::NodeId;

#[derive(Debug, Clone)]
pub struct TreeTopology {
    parents: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    levels: Vec<usize>,
    fanout: Vec<usize>,
    root: NodeId,
    relays: HashMap<NodeId, NodeId>,
    level_names: Vec<String>,
}

impl TreeTopology {
    /// Build a tree in which every node of level `l` has `fanout[l]`
    /// children. Ids are handed out breadth first starting from the root.
    ///
    /// The last level must have a fan-out of zero and all others must be
    /// non-zero.
    pub fn from_fanout(fanout: &[usize]) -> Result<Self, SimError> {
        let Some((&last, inner)) = fanout.split_last() else {
            return sim_error!("tree fan-out must list at least one level");
        };
        if last != 0 {
            return sim_error!(format!(
                "fan-out of the last level must be 0, got {last}"
            ));
        }
        if let Some(level) = inner.iter().position(|&f| f == 0) {
            return sim_error!(format!(
                "fan-out of level {level} is 0 but it is not the last level"
            ));
        }

        let mut parents = vec![None];
        let mut level_nodes = vec![0];
        for &level_fanout in inner {
            let mut next_level = Vec::with_capacity(level_nodes.len() * level_fanout);
            for &node in &level_nodes {
                for _ in 0..level_fanout {
                    next_level.push(parents.len());
                    parents.push(Some(node));
                }
            }
            level_nodes = next_level;
        }
        Self::from_parents(parents)
    }

    /// Build a tree from the parent of each node. Exactly one node (the root)
    /// has no parent. Children are ordered by increasing id.
    pub fn from_parents(parents: Vec<Option<NodeId>>) -> Result<Self, SimError> {
        let num_nodes = parents.len();
        let mut roots = parents
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(n, _)| n);
        let Some(root) = roots.next() else {
            return sim_error!("tree has no root");
        };
        if let Some(other) = roots.next() {
            return sim_error!(format!("tree has more than one root ({root} and {other})"));
        }

        let mut children = vec![Vec::new(); num_nodes];
        for (node, parent) in parents.iter().enumerate() {
            if let Some(parent) = *parent {
                if parent >= num_nodes {
                    return sim_error!(format!(
                        "parent {parent} of node {node} is out of range"
                    ));
                }
                children[parent].push(node);
            }
        }

        // Walking up from every node must reach the root within `num_nodes`
        // steps, otherwise there is a cycle.
        let mut levels = vec![0; num_nodes];
        for (node, level) in levels.iter_mut().enumerate() {
            let mut current = node;
            let mut depth = 0;
            while let Some(parent) = parents[current] {
                depth += 1;
                if depth > num_nodes {
                    return sim_error!(format!("node {node} is part of a cycle"));
                }
                current = parent;
            }
            *level = depth;
        }

        let num_levels = levels.iter().max().map_or(0, |l| l + 1);
        let mut fanout = vec![0; num_levels];
        for (node, node_children) in children.iter().enumerate() {
            let level = levels[node];
            fanout[level] = fanout[level].max(node_children.len());
        }

        Ok(Self {
            parents,
            children,
            levels,
            fanout,
            root,
            relays: HashMap::new(),
            level_names: Vec::new(),
        })
    }

    /// Register that flits for `destination` must first visit `relay`.
    pub fn with_relays(mut self, relays: &[(NodeId, NodeId)]) -> Result<Self, SimError> {
        for &(destination, relay) in relays {
            if destination >= self.num_nodes() || relay >= self.num_nodes() {
                return sim_error!(format!(
                    "relay {relay} for destination {destination} is out of range"
                ));
            }
            if destination == relay {
                return sim_error!(format!("node {destination} cannot be its own relay"));
            }
            self.relays.insert(destination, relay);
        }
        Ok(self)
    }

    /// Names used to label the nodes of each level (e.g. `dram`, `glb`).
    #[must_use]
    pub fn with_level_names(mut self, names: &[String]) -> Self {
        self.level_names = names.to_vec();
        self
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.parents.len()
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.fanout.len()
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(node).copied().flatten()
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn level(&self, node: NodeId) -> usize {
        self.levels[node]
    }

    /// Largest number of children of any node in `level`.
    #[must_use]
    pub fn fanout(&self, level: usize) -> usize {
        self.fanout.get(level).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        node < self.num_nodes()
    }

    /// Nodes without children.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.num_nodes()).filter(|&n| self.children[n].is_empty())
    }

    /// Whether `dst` is a strict descendant of `node`.
    #[must_use]
    pub fn is_descendant(&self, node: NodeId, dst: NodeId) -> bool {
        let mut current = self.parent(dst);
        while let Some(ancestor) = current {
            if ancestor == node {
                return true;
            }
            current = self.parent(ancestor);
        }
        false
    }

    /// The child of `node` whose subtree contains `dst`.
    pub fn next_hop_child(&self, node: NodeId, dst: NodeId) -> Result<NodeId, SimError> {
        let mut current = dst;
        loop {
            match self.parent(current) {
                Some(parent) if parent == node => return Ok(current),
                Some(parent) => current = parent,
                None => {
                    return sim_error!(format!(
                        "node {dst} is not a descendant of node {node}"
                    ));
                }
            }
        }
    }

    /// The relay registered for `dst`, if any.
    #[must_use]
    pub fn relay_for(&self, dst: NodeId) -> Option<NodeId> {
        self.relays.get(&dst).copied()
    }

    #[must_use]
    pub fn level_name(&self, level: usize) -> String {
        self.level_names
            .get(level)
            .cloned()
            .unwrap_or_else(|| format!("level{level}"))
    }

    /// Name given to the router and endpoint of `node`.
    #[must_use]
    pub fn node_name(&self, node: NodeId) -> String {
        format!("{}{node}", self.level_name(self.level(node)))
    }
}
