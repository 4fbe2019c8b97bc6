// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A wormhole router for one node of the tree.
//!
//! # Ports
//!
//! Ports are addressed by the index given by the router's [`PortMap`]:
//!  - `0`: the local port to the [`Endpoint`](crate::endpoint::Endpoint)
//!  - `1`: the port to the parent (absent at the root)
//!  - then one port per child
//!
//! Every port has an incoming [`Link`] owned by the router (see
//! [`port_rx`](Router::port_rx)) and an outgoing one that must be connected
//! with [`connect_port_tx`](Router::connect_port_tx).
//!
//! # Function
//!
//! Each clock tick the router runs three phases in order:
//!
//!  1. *Receive*: accept at most one flit per port into the buffer of its
//!     virtual channel and acknowledge it.
//!  2. *Route and reserve*: every HEAD at the front of a buffer is routed and
//!     tries to claim all of its outputs in the [`ReservationTable`]. A HEAD
//!     that cannot claim them stays where it is and tries again next tick.
//!  3. *Arbitrate and forward*: of the buffers whose reserved outputs can all
//!     accept a flit, one is picked at random and its front flit is copied to
//!     every reserved output. A TAIL releases the reservation.
//!
//! Finally the per-VC buffer-full status of every input is driven back to the
//! senders.
//!
//! Everything read from a [`Link`] was written during an earlier tick, so the
//! order in which routers are evaluated does not matter.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_engine::engine::Engine;
use arbor_engine::sim_error;
use arbor_engine::time::clock::Clock;
use arbor_engine::traits::Runnable;
use arbor_engine::types::{SimError, SimResult};
use arbor_model_builder::{EntityDisplay, EntityGet};
use arbor_track::entity::Entity;
use arbor_track::{connect, enter, exit, trace};
use async_trait::async_trait;
use itertools::{Itertools, iproduct};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::NocConfig;
use crate::drain::DrainController;
use crate::flit::{Destination, Flit, NodeId};
use crate::link::{FullStatus, Link};
use crate::reservation::{Reservation, ReservationStatus, ReservationTable};
use crate::routing::{LogicalPort, PortMap, RouteDecision, TreeRouting};
use crate::stats::RouterStats;
use crate::topology::TreeTopology;
use crate::vc_buffer::VcBuffer;

/// Rotate the reservation table round-robin pointers this often.
const UPDATE_INDEX_TICKS: u64 = 2;

#[derive(EntityDisplay, EntityGet)]
pub struct Router {
    pub entity: Rc<Entity>,
    clock: Clock,
    num_vcs: usize,
    routing: TreeRouting,
    port_map: PortMap,

    rx: Vec<Rc<Link>>,
    tx: RefCell<Vec<Option<Rc<Link>>>>,
    rx_expected: RefCell<Vec<bool>>,
    tx_toggle: RefCell<Vec<bool>>,
    full_driven: RefCell<Vec<FullStatus>>,

    /// Indexed by `[port][vc]`.
    buffers: RefCell<Vec<Vec<VcBuffer>>>,
    reservations: RefCell<ReservationTable>,

    start_port: Cell<usize>,
    start_vc: RefCell<Vec<usize>>,
    tick_count: Cell<u64>,
    rng: RefCell<Xoshiro256PlusPlus>,

    stats: RouterStats,
    drain: Option<Rc<DrainController>>,
}

impl Router {
    /// Create the router of `node` and register it with the `engine`.
    ///
    /// The router is named after the node (e.g. `glb1`). Every flit it
    /// delivers to its local port is reported to `drain`.
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        node: NodeId,
        topology: &Rc<TreeTopology>,
        config: &NocConfig,
        drain: Option<Rc<DrainController>>,
    ) -> Result<Rc<Self>, SimError> {
        if !topology.contains(node) {
            return sim_error!(format!(
                "cannot create a router for node {node}: the tree has {} nodes",
                topology.num_nodes()
            ));
        }
        if config.num_vcs == 0 || config.buffer_depth == 0 {
            return sim_error!(format!(
                "router {node} needs at least one VC and a buffer depth of at least one"
            ));
        }

        let entity = Rc::new(Entity::new(parent, &topology.node_name(node)));
        let port_map = PortMap::for_node(topology, node);
        let num_ports = port_map.len();
        let num_vcs = config.num_vcs;

        let rx = port_map
            .iter()
            .map(|port| Link::new(&entity, &format!("rx_{port}"), num_vcs))
            .collect();
        let buffers = (0..num_ports)
            .map(|_| {
                (0..num_vcs)
                    .map(|_| VcBuffer::new(config.buffer_depth))
                    .collect()
            })
            .collect();

        let rc_self = Rc::new(Self {
            clock: clock.clone(),
            num_vcs,
            routing: TreeRouting::new(node, topology.clone()),
            rx,
            tx: RefCell::new(vec![None; num_ports]),
            rx_expected: RefCell::new(vec![false; num_ports]),
            tx_toggle: RefCell::new(vec![false; num_ports]),
            full_driven: RefCell::new(vec![FullStatus::new(num_vcs); num_ports]),
            buffers: RefCell::new(buffers),
            reservations: RefCell::new(ReservationTable::new(num_ports)),
            start_port: Cell::new(0),
            start_vc: RefCell::new(vec![0; num_ports]),
            tick_count: Cell::new(0),
            rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(
                config.seed ^ (node as u64),
            )),
            stats: RouterStats::new(num_ports),
            drain,
            port_map,
            entity,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.routing.node()
    }

    #[must_use]
    pub fn port_map(&self) -> &PortMap {
        &self.port_map
    }

    #[must_use]
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// The link on which this router receives on `port`.
    pub fn port_rx(&self, port: usize) -> Result<Rc<Link>, SimError> {
        match self.rx.get(port) {
            Some(link) => Ok(link.clone()),
            None => sim_error!(format!("{self}: no rx port {port}")),
        }
    }

    /// Connect the link on which this router transmits on `port`.
    pub fn connect_port_tx(&self, port: usize, link: Rc<Link>) -> SimResult {
        match self.tx.borrow_mut().get_mut(port) {
            None => sim_error!(format!("{self}: no tx port {port}")),
            Some(Some(_)) => sim_error!(format!(
                "{self}: tx port {} already connected",
                self.port_name(port)
            )),
            Some(tx) => {
                connect!(self.entity ; link.entity);
                *tx = Some(link);
                Ok(())
            }
        }
    }

    /// Number of flits waiting in the buffer of `port`/`vc`.
    #[must_use]
    pub fn buffer_occupancy(&self, port: usize, vc: usize) -> usize {
        self.buffers
            .borrow()
            .get(port)
            .and_then(|vcs| vcs.get(vc))
            .map_or(0, VcBuffer::len)
    }

    /// The outputs currently reserved by `port`/`vc`.
    #[must_use]
    pub fn reserved_outputs(&self, port: usize, vc: usize) -> Vec<usize> {
        self.reservations.borrow().reservations(port, vc).to_vec()
    }

    /// Drop all reservations and restart round-robin from the first port and
    /// VC. Buffered flits are kept.
    pub fn reset(&self) {
        trace!(self.entity ; "reset");
        self.reservations.borrow_mut().reset();
        self.start_port.set(0);
        self.start_vc.borrow_mut().fill(0);
        self.tick_count.set(0);
    }

    fn port_name(&self, port: usize) -> String {
        match self.port_map.port(port) {
            Some(logical) => logical.to_string(),
            None => format!("port{port}"),
        }
    }

    fn is_local(&self, port: usize) -> bool {
        self.port_map.port(port) == Some(LogicalPort::Local)
    }

    fn port_index(&self, port: LogicalPort) -> Result<usize, SimError> {
        match self.port_map.index_of(port) {
            Some(index) => Ok(index),
            None => sim_error!(format!("{self}: routed to missing port {port}")),
        }
    }

    fn step(&self) -> SimResult {
        self.receive()?;
        self.route_and_reserve()?;
        self.arbitrate_and_forward()?;
        self.drive_full_status();

        let ticks = self.tick_count.get() + 1;
        self.tick_count.set(ticks);
        if ticks % UPDATE_INDEX_TICKS == 0 {
            self.reservations.borrow_mut().update_index();
        }
        Ok(())
    }

    fn receive(&self) -> SimResult {
        let mut buffers = self.buffers.borrow_mut();
        let mut rx_expected = self.rx_expected.borrow_mut();

        for (port, link) in self.rx.iter().enumerate() {
            if !link.has_new_flit(rx_expected[port]) {
                continue;
            }
            let Some(flit) = link.data.read() else {
                return sim_error!(format!(
                    "{self}: request on port {} without a flit",
                    self.port_name(port)
                ));
            };
            let vc = flit.vc;
            let Some(buffer) = buffers[port].get_mut(vc) else {
                return sim_error!(format!(
                    "{self}: {flit} on port {} uses vc {vc} but there are only {} VCs",
                    self.port_name(port),
                    self.num_vcs
                ));
            };

            if buffer.is_full() {
                if self.is_local(port) {
                    // Left unacknowledged so the endpoint presents it again
                    trace!(self.entity ; "local vc {vc} full, {flit} must wait");
                    self.stats.local_stalled();
                    continue;
                }
                return sim_error!(format!(
                    "{self}: {flit} received on port {} vc {vc} while its buffer is full",
                    self.port_name(port)
                ));
            }

            enter!(self.entity ; flit.id);
            trace!(self.entity ; "rx {flit} on {}", self.port_name(port));
            if buffer.push(flit).is_err() {
                return sim_error!(format!(
                    "{self}: buffer overflow on port {} vc {vc}",
                    self.port_name(port)
                ));
            }
            self.stats.buffer_write(port);

            rx_expected[port] = !rx_expected[port];
            link.ack.drive(&self.clock, rx_expected[port]);
        }
        Ok(())
    }

    /// Route a HEAD flit, updating its relay annotation, and return the
    /// output port indices it needs.
    fn route_head(&self, flit: &mut Flit, arrival: LogicalPort) -> Result<Vec<usize>, SimError> {
        let ports = match &flit.dst {
            Destination::Multicast(targets) => self.routing.route_multicast(targets, arrival)?,
            Destination::Unicast(dst) => {
                let decision = self.routing.route_unicast(*dst, flit.relay, arrival)?;
                match decision {
                    RouteDecision::ViaRelay { relay, .. } => flit.relay = Some(relay),
                    RouteDecision::RelayReached(_) => flit.relay = None,
                    RouteDecision::Direct(_) => {}
                }
                vec![decision.port()]
            }
        };
        ports.into_iter().map(|p| self.port_index(p)).collect()
    }

    fn route_and_reserve(&self) -> SimResult {
        let num_ports = self.rx.len();
        let start_port = self.start_port.get();
        let mut buffers = self.buffers.borrow_mut();
        let mut reservations = self.reservations.borrow_mut();
        let mut start_vc = self.start_vc.borrow_mut();

        for i in 0..num_ports {
            let port = (start_port + i) % num_ports;
            let Some(arrival) = self.port_map.port(port) else {
                return sim_error!(format!("{self}: port {port} has no logical port"));
            };

            for j in 0..self.num_vcs {
                let vc = (start_vc[port] + j) % self.num_vcs;
                let Some(flit) = buffers[port][vc].front_mut() else {
                    continue;
                };
                if !flit.flit_type.is_head() {
                    continue;
                }

                let outputs = self.route_head(flit, arrival)?;
                let reservation = Reservation::new(port, vc);
                match reservations.check_multi(reservation, &outputs)? {
                    ReservationStatus::Available => {
                        reservations.reserve_multi(reservation, &outputs)?;
                        self.stats.head_reserved();
                        let names = outputs.iter().map(|&o| self.port_name(o)).join(", ");
                        trace!(self.entity ; "{flit} from {} reserved [{names}]", self.port_name(port));
                    }
                    ReservationStatus::AlreadySame => {}
                    status => {
                        self.stats.reservation_stalled();
                        trace!(self.entity ; "{flit} from {} stalled: {status:?}", self.port_name(port));
                    }
                }
            }
            start_vc[port] = (start_vc[port] + 1) % self.num_vcs;
        }
        self.start_port.set((start_port + 1) % num_ports);
        Ok(())
    }

    /// All `(port, vc)` whose front flit can go to every reserved output this
    /// tick.
    fn candidates(&self) -> Vec<(usize, usize)> {
        let buffers = self.buffers.borrow();
        let reservations = self.reservations.borrow();
        let tx = self.tx.borrow();
        let tx_toggle = self.tx_toggle.borrow();

        iproduct!(0..self.rx.len(), 0..self.num_vcs)
            .filter(|&(port, vc)| {
                let outputs = reservations.reservations(port, vc);
                !buffers[port][vc].is_empty()
                    && !outputs.is_empty()
                    && outputs.iter().all(|&o| {
                        tx[o]
                            .as_ref()
                            .is_some_and(|link| link.can_send(tx_toggle[o], vc))
                    })
            })
            .collect()
    }

    fn arbitrate_and_forward(&self) -> SimResult {
        let candidates = self.candidates();
        if candidates.is_empty() {
            self.stats.idle_tick();
            return Ok(());
        }
        let winner = self.rng.borrow_mut().random_range(0..candidates.len());
        let (port, vc) = candidates[winner];

        let outputs = self.reserved_outputs(port, vc);
        let Some(mut flit) = self.buffers.borrow_mut()[port][vc].pop() else {
            return sim_error!(format!(
                "{self}: port {} vc {vc} won arbitration with an empty buffer",
                self.port_name(port)
            ));
        };
        self.stats.buffer_read(port);
        flit.hop_no += 1;

        {
            let tx = self.tx.borrow();
            let mut tx_toggle = self.tx_toggle.borrow_mut();
            for &output in &outputs {
                let Some(link) = tx[output].as_ref() else {
                    return sim_error!(format!(
                        "{self}: tx port {} is not connected",
                        self.port_name(output)
                    ));
                };
                trace!(self.entity ; "tx {flit} on {}", self.port_name(output));
                link.data.drive(&self.clock, Some(flit.clone()));
                tx_toggle[output] = !tx_toggle[output];
                link.req.drive(&self.clock, tx_toggle[output]);
                self.stats.link_traversal(output);

                if self.is_local(output) {
                    self.stats.flit_delivered();
                    if let Some(drain) = &self.drain {
                        drain.report()?;
                    }
                }
            }
        }
        self.stats.flit_routed();
        exit!(self.entity ; flit.id);

        if flit.flit_type.is_tail() {
            self.reservations
                .borrow_mut()
                .release_multi(Reservation::new(port, vc), &outputs)?;
        }
        Ok(())
    }

    fn drive_full_status(&self) {
        let buffers = self.buffers.borrow();
        let mut full_driven = self.full_driven.borrow_mut();
        for (port, link) in self.rx.iter().enumerate() {
            let status = FullStatus::from_bits(buffers[port].iter().map(VcBuffer::is_full).collect());
            if status != full_driven[port] {
                link.full.drive(&self.clock, status.clone());
                full_driven[port] = status;
            }
        }
    }

    /// Whether the router has anything left to do: buffered flits, flits
    /// arriving or flits not yet acknowledged.
    fn is_busy(&self) -> bool {
        let rx_expected = self.rx_expected.borrow();
        let tx_toggle = self.tx_toggle.borrow();

        self.buffers.borrow().iter().flatten().any(|b| !b.is_empty())
            || self
                .rx
                .iter()
                .zip(rx_expected.iter())
                .any(|(link, &expected)| link.has_new_flit(expected))
            || self
                .tx
                .borrow()
                .iter()
                .zip(tx_toggle.iter())
                .any(|(link, &toggle)| link.as_ref().is_some_and(|l| !l.is_acknowledged(toggle)))
    }
}

#[async_trait(?Send)]
impl Runnable for Router {
    async fn run(&self) -> SimResult {
        loop {
            self.step()?;
            if self.is_busy() {
                self.clock.wait_ticks(1).await;
            } else {
                self.clock.wait_ticks_or_exit(1).await;
            }
        }
    }
}
