// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The processing element attached to the local port of a router.
//!
//! An [`Endpoint`] injects the packets produced by its generator one flit at
//! a time and accepts every flit delivered to it. It starts a new flit only
//! once the previous one has been acknowledged; it does not look at the
//! buffer-full status, the router leaves a flit it cannot buffer
//! unacknowledged until there is room.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_engine::engine::Engine;
use arbor_engine::sim_error;
use arbor_engine::time::clock::Clock;
use arbor_engine::traits::Runnable;
use arbor_engine::types::{SimError, SimResult};
use arbor_model_builder::{EntityDisplay, EntityGet};
use arbor_track::entity::Entity;
use arbor_track::{connect, create_id, debug, enter, exit, trace};
use async_trait::async_trait;

use crate::flit::{Flit, NodeId, Packet};
use crate::link::Link;

pub type PacketGenerator = Box<dyn Iterator<Item = Packet>>;

#[derive(EntityDisplay, EntityGet)]
pub struct Endpoint {
    pub entity: Rc<Entity>,
    clock: Clock,
    node: NodeId,

    rx: Rc<Link>,
    tx: RefCell<Option<Rc<Link>>>,
    rx_expected: Cell<bool>,
    tx_toggle: Cell<bool>,

    generator: RefCell<Option<PacketGenerator>>,
    current: RefCell<Option<Packet>>,

    num_flits_sent: Cell<usize>,
    num_packets_sent: Cell<usize>,
    received: RefCell<Vec<Flit>>,
    num_packets_received: Cell<usize>,
    latencies: RefCell<Vec<u64>>,
}

impl Endpoint {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        name: &str,
        node: NodeId,
        num_vcs: usize,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Rc::new(Entity::new(parent, name));
        let rc_self = Rc::new(Self {
            clock: clock.clone(),
            node,
            rx: Link::new(&entity, "rx", num_vcs),
            tx: RefCell::new(None),
            rx_expected: Cell::new(false),
            tx_toggle: Cell::new(false),
            generator: RefCell::new(None),
            current: RefCell::new(None),
            num_flits_sent: Cell::new(0),
            num_packets_sent: Cell::new(0),
            received: RefCell::new(Vec::new()),
            num_packets_received: Cell::new(0),
            latencies: RefCell::new(Vec::new()),
            entity,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Use `generator` as the source of packets to inject.
    pub fn set_generator(&self, generator: PacketGenerator) {
        *self.generator.borrow_mut() = Some(generator);
    }

    #[must_use]
    pub fn port_rx(&self) -> Rc<Link> {
        self.rx.clone()
    }

    pub fn connect_port_tx(&self, link: Rc<Link>) -> SimResult {
        let mut tx = self.tx.borrow_mut();
        if tx.is_some() {
            return sim_error!(format!("{self}: tx already connected"));
        }
        connect!(self.entity ; link.entity);
        *tx = Some(link);
        Ok(())
    }

    #[must_use]
    pub fn num_flits_sent(&self) -> usize {
        self.num_flits_sent.get()
    }

    #[must_use]
    pub fn num_packets_sent(&self) -> usize {
        self.num_packets_sent.get()
    }

    #[must_use]
    pub fn num_flits_received(&self) -> usize {
        self.received.borrow().len()
    }

    /// Number of TAIL flits received.
    #[must_use]
    pub fn num_packets_received(&self) -> usize {
        self.num_packets_received.get()
    }

    /// Every flit received, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Flit> {
        self.received.borrow().clone()
    }

    /// Ticks from the creation of each received packet to the arrival of its
    /// TAIL.
    #[must_use]
    pub fn packet_latencies(&self) -> Vec<u64> {
        self.latencies.borrow().clone()
    }

    fn step(&self) -> SimResult {
        self.receive()?;
        self.transmit()
    }

    fn receive(&self) -> SimResult {
        let expected = self.rx_expected.get();
        if !self.rx.has_new_flit(expected) {
            return Ok(());
        }
        let Some(flit) = self.rx.data.read() else {
            return sim_error!(format!("{self}: request without a flit"));
        };

        enter!(self.entity ; flit.id);
        trace!(self.entity ; "received {flit} after {} hops", flit.hop_no);
        self.rx_expected.set(!expected);
        self.rx.ack.drive(&self.clock, !expected);

        if flit.flit_type.is_tail() {
            let now = self.clock.tick_now().tick();
            self.num_packets_received
                .set(self.num_packets_received.get() + 1);
            self.latencies
                .borrow_mut()
                .push(now.saturating_sub(flit.created_tick));
        }
        self.received.borrow_mut().push(flit);
        Ok(())
    }

    /// Take the next flit to inject, starting a new packet if necessary.
    fn next_flit(&self) -> Option<Flit> {
        let mut current = self.current.borrow_mut();
        if current.as_ref().is_none_or(Packet::is_done) {
            let mut generator = self.generator.borrow_mut();
            *current = generator.as_mut().and_then(|g| g.next());
            match current.as_mut() {
                Some(packet) => {
                    packet.timestamp = self.clock.tick_now().tick();
                    self.num_packets_sent.set(self.num_packets_sent.get() + 1);
                    debug!(self.entity ; "start packet {} to {}", packet.id, packet.dst);
                }
                None => {
                    // Exhausted
                    *generator = None;
                }
            }
        }
        current.as_mut()?.next_flit(create_id!(self.entity))
    }

    fn transmit(&self) -> SimResult {
        let tx = self.tx.borrow();
        let Some(tx) = tx.as_ref() else {
            if self.has_traffic() {
                return sim_error!(format!("{self}: has traffic to send but no tx link"));
            }
            return Ok(());
        };

        let toggle = self.tx_toggle.get();
        if !tx.is_acknowledged(toggle) {
            return Ok(());
        }
        let Some(flit) = self.next_flit() else {
            return Ok(());
        };

        trace!(self.entity ; "send {flit}");
        exit!(self.entity ; flit.id);
        tx.data.drive(&self.clock, Some(flit));
        self.tx_toggle.set(!toggle);
        tx.req.drive(&self.clock, !toggle);
        self.num_flits_sent.set(self.num_flits_sent.get() + 1);
        Ok(())
    }

    fn has_traffic(&self) -> bool {
        self.generator.borrow().is_some()
            || self
                .current
                .borrow()
                .as_ref()
                .is_some_and(|p| !p.is_done())
    }

    fn is_busy(&self) -> bool {
        let awaiting_ack = self
            .tx
            .borrow()
            .as_ref()
            .is_some_and(|tx| !tx.is_acknowledged(self.tx_toggle.get()));
        self.has_traffic() || awaiting_ack || self.rx.has_new_flit(self.rx_expected.get())
    }
}

#[async_trait(?Send)]
impl Runnable for Endpoint {
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
