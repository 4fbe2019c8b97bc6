// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Routing on a tree: go down towards a descendant, otherwise go up.

use std::fmt;
use std::rc::Rc;

use arbor_engine::sim_error;
use arbor_engine::types::SimError;

use crate::flit::NodeId;
use crate::topology::TreeTopology;

/// Port of a router named by its role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalPort {
    /// The processing element attached to this node.
    Local,
    /// Towards the parent.
    Up,
    /// Towards the child with the given position in the children list.
    Down(usize),
}

impl fmt::Display for LogicalPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalPort::Local => write!(f, "local"),
            LogicalPort::Up => write!(f, "up"),
            LogicalPort::Down(k) => write!(f, "down{k}"),
        }
    }
}

/// Stable mapping between logical ports and port indices.
///
/// Index 0 is always `Local`, followed by `Up` (except at the root) and then
/// one `Down` per child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMap {
    ports: Vec<LogicalPort>,
}

impl PortMap {
    #[must_use]
    pub fn new(has_parent: bool, num_children: usize) -> Self {
        let mut ports = vec![LogicalPort::Local];
        if has_parent {
            ports.push(LogicalPort::Up);
        }
        ports.extend((0..num_children).map(LogicalPort::Down));
        Self { ports }
    }

    #[must_use]
    pub fn for_node(topology: &TreeTopology, node: NodeId) -> Self {
        Self::new(
            topology.parent(node).is_some(),
            topology.children(node).len(),
        )
    }

    #[must_use]
    pub fn index_of(&self, port: LogicalPort) -> Option<usize> {
        self.ports.iter().position(|&p| p == port)
    }

    #[must_use]
    pub fn port(&self, index: usize) -> Option<LogicalPort> {
        self.ports.get(index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LogicalPort> + '_ {
        self.ports.iter().copied()
    }
}

/// Outcome of routing a unicast HEAD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// Forward on this port with no change to the flit.
    Direct(LogicalPort),
    /// The destination is reached through `relay`: annotate the flit and send
    /// it towards the relay.
    ViaRelay { relay: NodeId, port: LogicalPort },
    /// This node is the relay the flit was heading for: clear the annotation
    /// and send it on towards its destination.
    RelayReached(LogicalPort),
}

impl RouteDecision {
    #[must_use]
    pub fn port(&self) -> LogicalPort {
        match self {
            RouteDecision::Direct(port)
            | RouteDecision::ViaRelay { port, .. }
            | RouteDecision::RelayReached(port) => *port,
        }
    }
}

/// Routing function of one node.
pub struct TreeRouting {
    node: NodeId,
    topology: Rc<TreeTopology>,
}

impl TreeRouting {
    #[must_use]
    pub fn new(node: NodeId, topology: Rc<TreeTopology>) -> Self {
        Self { node, topology }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    fn check_in_range(&self, dst: NodeId) -> Result<(), SimError> {
        if self.topology.contains(dst) {
            Ok(())
        } else {
            sim_error!(format!(
                "node {}: destination {dst} is not in the tree",
                self.node
            ))
        }
    }

    fn down_port(&self, dst: NodeId) -> Result<LogicalPort, SimError> {
        let child = self.topology.next_hop_child(self.node, dst)?;
        match self
            .topology
            .children(self.node)
            .iter()
            .position(|&c| c == child)
        {
            Some(k) => Ok(LogicalPort::Down(k)),
            None => sim_error!(format!(
                "node {}: child {child} missing from the children list",
                self.node
            )),
        }
    }

    /// Route towards a single destination.
    pub fn route(&self, dst: NodeId) -> Result<LogicalPort, SimError> {
        self.check_in_range(dst)?;
        if dst == self.node {
            Ok(LogicalPort::Local)
        } else if self.topology.is_descendant(self.node, dst) {
            self.down_port(dst)
        } else if self.topology.parent(self.node).is_some() {
            Ok(LogicalPort::Up)
        } else {
            sim_error!(format!(
                "node {} is the root and cannot route to {dst}",
                self.node
            ))
        }
    }

    /// Route a unicast HEAD, taking relays into account.
    ///
    /// Relays are only applied when a flit is first injected from the local
    /// port, so a flit is sent through at most one relay.
    pub fn route_unicast(
        &self,
        dst: NodeId,
        relay: Option<NodeId>,
        arrival: LogicalPort,
    ) -> Result<RouteDecision, SimError> {
        match relay {
            Some(relay) if relay == self.node => Ok(RouteDecision::RelayReached(self.route(dst)?)),
            Some(relay) => Ok(RouteDecision::Direct(self.route(relay)?)),
            None => match self.topology.relay_for(dst) {
                Some(relay)
                    if arrival == LogicalPort::Local && relay != self.node && dst != self.node =>
                {
                    Ok(RouteDecision::ViaRelay {
                        relay,
                        port: self.route(relay)?,
                    })
                }
                _ => Ok(RouteDecision::Direct(self.route(dst)?)),
            },
        }
    }

    /// Ports a multicast flit must be copied to, without duplicates, in
    /// `Local`, `Up`, `Down(k)` order.
    ///
    /// `Up` is only included if a target lies outside this subtree and the
    /// flit did not arrive from the parent. Targets below the child the flit
    /// arrived from have already been served by that child and are skipped.
    pub fn route_multicast(
        &self,
        targets: &[NodeId],
        arrival: LogicalPort,
    ) -> Result<Vec<LogicalPort>, SimError> {
        let mut ports = Vec::new();
        let mut outside_subtree = false;
        for &dst in targets {
            self.check_in_range(dst)?;
            let port = if dst == self.node {
                LogicalPort::Local
            } else if self.topology.is_descendant(self.node, dst) {
                let port = self.down_port(dst)?;
                if port == arrival {
                    continue;
                }
                port
            } else {
                outside_subtree = true;
                continue;
            };
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        if outside_subtree && arrival != LogicalPort::Up {
            if self.topology.parent(self.node).is_none() {
                return sim_error!(format!(
                    "node {} is the root and cannot reach all of {targets:?}",
                    self.node
                ));
            }
            ports.push(LogicalPort::Up);
        }

        if ports.is_empty() {
            return sim_error!(format!(
                "node {}: no viable output for multicast to {targets:?} arriving on {arrival}",
                self.node
            ));
        }
        ports.sort();
        Ok(ports)
    }
}
