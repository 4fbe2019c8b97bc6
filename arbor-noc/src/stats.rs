// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Activity counters.
//!
//! Routers and endpoints only ever increment these. Everything else reads
//! them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::endpoint::Endpoint;
use crate::router::Router;

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

fn bump_port(counters: &RefCell<Vec<u64>>, port: usize) {
    if let Some(count) = counters.borrow_mut().get_mut(port) {
        *count += 1;
    }
}

/// Counters of one router.
pub struct RouterStats {
    flits_routed: Cell<u64>,
    flits_delivered: Cell<u64>,
    heads_reserved: Cell<u64>,
    reservation_stalls: Cell<u64>,
    local_stalls: Cell<u64>,
    idle_ticks: Cell<u64>,
    link_traversals: RefCell<Vec<u64>>,
    buffer_writes: RefCell<Vec<u64>>,
    buffer_reads: RefCell<Vec<u64>>,
}

impl RouterStats {
    #[must_use]
    pub fn new(num_ports: usize) -> Self {
        Self {
            flits_routed: Cell::new(0),
            flits_delivered: Cell::new(0),
            heads_reserved: Cell::new(0),
            reservation_stalls: Cell::new(0),
            local_stalls: Cell::new(0),
            idle_ticks: Cell::new(0),
            link_traversals: RefCell::new(vec![0; num_ports]),
            buffer_writes: RefCell::new(vec![0; num_ports]),
            buffer_reads: RefCell::new(vec![0; num_ports]),
        }
    }

    pub(crate) fn flit_routed(&self) {
        bump(&self.flits_routed);
    }

    pub(crate) fn flit_delivered(&self) {
        bump(&self.flits_delivered);
    }

    pub(crate) fn head_reserved(&self) {
        bump(&self.heads_reserved);
    }

    pub(crate) fn reservation_stalled(&self) {
        bump(&self.reservation_stalls);
    }

    pub(crate) fn local_stalled(&self) {
        bump(&self.local_stalls);
    }

    pub(crate) fn idle_tick(&self) {
        bump(&self.idle_ticks);
    }

    pub(crate) fn link_traversal(&self, port: usize) {
        bump_port(&self.link_traversals, port);
    }

    pub(crate) fn buffer_write(&self, port: usize) {
        bump_port(&self.buffer_writes, port);
    }

    pub(crate) fn buffer_read(&self, port: usize) {
        bump_port(&self.buffer_reads, port);
    }

    /// Flits that won arbitration (a multicast flit counts once).
    #[must_use]
    pub fn flits_routed(&self) -> u64 {
        self.flits_routed.get()
    }

    /// Flits sent out of the local port.
    #[must_use]
    pub fn flits_delivered(&self) -> u64 {
        self.flits_delivered.get()
    }

    #[must_use]
    pub fn heads_reserved(&self) -> u64 {
        self.heads_reserved.get()
    }

    /// HEAD flits that could not reserve their outputs on a tick.
    #[must_use]
    pub fn reservation_stalls(&self) -> u64 {
        self.reservation_stalls.get()
    }

    /// Ticks on which an injected flit could not be buffered.
    #[must_use]
    pub fn local_stalls(&self) -> u64 {
        self.local_stalls.get()
    }

    /// Ticks on which nothing was forwarded.
    #[must_use]
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.get()
    }

    #[must_use]
    pub fn link_traversals(&self) -> Vec<u64> {
        self.link_traversals.borrow().clone()
    }

    #[must_use]
    pub fn buffer_writes(&self) -> Vec<u64> {
        self.buffer_writes.borrow().clone()
    }

    #[must_use]
    pub fn buffer_reads(&self) -> Vec<u64> {
        self.buffer_reads.borrow().clone()
    }
}

/// Totals over a whole network.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub flits_routed: u64,
    pub flits_delivered: u64,
    pub heads_reserved: u64,
    pub reservation_stalls: u64,
    pub local_stalls: u64,
    pub link_traversals: u64,
    pub flits_injected: u64,
    pub packets_received: u64,
    /// Mean number of ticks from injection to arrival of the TAIL.
    pub average_latency: Option<f64>,
}

impl NetworkStats {
    #[must_use]
    pub fn collect(routers: &[Rc<Router>], endpoints: &[Rc<Endpoint>]) -> Self {
        let mut stats = Self::default();
        for router in routers {
            let router_stats = router.stats();
            stats.flits_routed += router_stats.flits_routed();
            stats.flits_delivered += router_stats.flits_delivered();
            stats.heads_reserved += router_stats.heads_reserved();
            stats.reservation_stalls += router_stats.reservation_stalls();
            stats.local_stalls += router_stats.local_stalls();
            stats.link_traversals += router_stats.link_traversals().iter().sum::<u64>();
        }

        let mut latency_sum = 0;
        let mut latency_count = 0;
        for endpoint in endpoints {
            stats.flits_injected += endpoint.num_flits_sent() as u64;
            stats.packets_received += endpoint.num_packets_received() as u64;
            let latencies = endpoint.packet_latencies();
            latency_sum += latencies.iter().sum::<u64>();
            latency_count += latencies.len();
        }
        if latency_count > 0 {
            stats.average_latency = Some(latency_sum as f64 / latency_count as f64);
        }
        stats
    }
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "flits injected:     {}", self.flits_injected)?;
        writeln!(f, "flits routed:       {}", self.flits_routed)?;
        writeln!(f, "flits delivered:    {}", self.flits_delivered)?;
        writeln!(f, "packets received:   {}", self.packets_received)?;
        writeln!(f, "link traversals:    {}", self.link_traversals)?;
        writeln!(f, "heads reserved:     {}", self.heads_reserved)?;
        writeln!(f, "reservation stalls: {}", self.reservation_stalls)?;
        writeln!(f, "local stalls:       {}", self.local_stalls)?;
        match self.average_latency {
            Some(latency) => write!(f, "average latency:    {latency:.2} ticks"),
            None => write!(f, "average latency:    -"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_counters() {
        let stats = RouterStats::new(3);
        stats.link_traversal(2);
        stats.link_traversal(2);
        stats.buffer_write(0);
        // Out of range ports are ignored
        stats.buffer_read(9);

        assert_eq!(stats.link_traversals(), vec![0, 0, 2]);
        assert_eq!(stats.buffer_writes(), vec![1, 0, 0]);
        assert_eq!(stats.buffer_reads(), vec![0, 0, 0]);
    }

    #[test]
    fn empty_network() {
        let stats = NetworkStats::collect(&[], &[]);
        assert_eq!(stats, NetworkStats::default());
        assert!(format!("{stats}").contains("average latency:    -"));
    }
}
