// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Build a complete tree network from a [`NocConfig`].
//!
//! Every node gets a [`Router`] and an [`Endpoint`] attached to its local
//! port. Each parent's `Down(k)` port is connected to the `Up` port of its
//! `k`th child in both directions.

use std::rc::Rc;

use arbor_engine::engine::Engine;
use arbor_engine::sim_error;
use arbor_engine::time::clock::Clock;
use arbor_engine::types::{SimError, SimResult};
use arbor_model_builder::{EntityDisplay, EntityGet};
use arbor_track::entity::Entity;

use crate::config::NocConfig;
use crate::connect_port;
use crate::drain::DrainController;
use crate::endpoint::{Endpoint, PacketGenerator};
use crate::flit::NodeId;
use crate::router::Router;
use crate::routing::LogicalPort;
use crate::stats::NetworkStats;
use crate::topology::TreeTopology;

#[derive(EntityDisplay, EntityGet)]
pub struct TreeNetwork {
    pub entity: Rc<Entity>,
    topology: Rc<TreeTopology>,
    routers: Vec<Rc<Router>>,
    endpoints: Vec<Rc<Endpoint>>,
    drain: Rc<DrainController>,
}

fn port_index(router: &Router, port: LogicalPort) -> Result<usize, SimError> {
    match router.port_map().index_of(port) {
        Some(index) => Ok(index),
        None => sim_error!(format!("{router}: has no {port} port")),
    }
}

impl TreeNetwork {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        config: &NocConfig,
    ) -> Result<Self, SimError> {
        if let Err(e) = config.validate() {
            return sim_error!(e);
        }
        let topology = match config.topology() {
            Ok(topology) => Rc::new(topology),
            Err(e) => return sim_error!(e),
        };

        let entity = Rc::new(Entity::new(parent, "noc"));
        let drain = DrainController::new(&entity, "drain", config.drain_threshold);

        let num_nodes = topology.num_nodes();
        let routers = (0..num_nodes)
            .map(|node| {
                Router::new_and_register(
                    engine,
                    clock,
                    &entity,
                    node,
                    &topology,
                    config,
                    Some(drain.clone()),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let endpoints = (0..num_nodes)
            .map(|node| {
                Endpoint::new_and_register(
                    engine,
                    clock,
                    &entity,
                    &format!("{}_pe", topology.node_name(node)),
                    node,
                    config.num_vcs,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let network = Self {
            entity,
            topology,
            routers,
            endpoints,
            drain,
        };
        network.connect()?;
        Ok(network)
    }

    fn connect(&self) -> SimResult {
        for (node, (router, endpoint)) in self.routers.iter().zip(&self.endpoints).enumerate() {
            let local = port_index(router, LogicalPort::Local)?;
            connect_port!(router, tx, local => endpoint, rx)?;
            connect_port!(endpoint, tx => router, rx, local)?;

            for (k, &child) in self.topology.children(node).iter().enumerate() {
                let child_router = &self.routers[child];
                let down = port_index(router, LogicalPort::Down(k))?;
                let up = port_index(child_router, LogicalPort::Up)?;
                connect_port!(router, tx, down => child_router, rx, up)?;
                connect_port!(child_router, tx, up => router, rx, down)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn topology(&self) -> &Rc<TreeTopology> {
        &self.topology
    }

    #[must_use]
    pub fn routers(&self) -> &[Rc<Router>] {
        &self.routers
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Rc<Endpoint>] {
        &self.endpoints
    }

    #[must_use]
    pub fn router(&self, node: NodeId) -> Option<&Rc<Router>> {
        self.routers.get(node)
    }

    #[must_use]
    pub fn endpoint(&self, node: NodeId) -> Option<&Rc<Endpoint>> {
        self.endpoints.get(node)
    }

    #[must_use]
    pub fn drain(&self) -> &Rc<DrainController> {
        &self.drain
    }

    /// Give the endpoint of `node` packets to inject.
    pub fn set_generator(&self, node: NodeId, generator: PacketGenerator) -> SimResult {
        match self.endpoints.get(node) {
            Some(endpoint) => {
                endpoint.set_generator(generator);
                Ok(())
            }
            None => sim_error!(format!("{self}: no endpoint for node {node}")),
        }
    }

    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        NetworkStats::collect(&self.routers, &self.endpoints)
    }

    /// Number of flits injected that have not reached an endpoint. A
    /// multicast flit counts once per copy still to be delivered.
    #[must_use]
    pub fn flits_in_flight(&self, expected_deliveries: u64) -> u64 {
        let delivered: usize = self.endpoints.iter().map(|e| e.num_flits_received()).sum();
        expected_deliveries.saturating_sub(delivered as u64)
    }
}
