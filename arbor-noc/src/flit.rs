// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Flits and the packets they are cut from.

use std::fmt;

use arbor_track::{Id, Unique};
use itertools::Itertools;

/// Identifier of a node (router + endpoint) in the tree.
pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlitType {
    Head,
    Body,
    Tail,
    /// A single-flit packet.
    HeadTail,
}

impl FlitType {
    /// Whether the flit carries the routing information of its packet.
    #[must_use]
    pub fn is_head(&self) -> bool {
        matches!(self, FlitType::Head | FlitType::HeadTail)
    }

    /// Whether the flit is the last of its packet.
    #[must_use]
    pub fn is_tail(&self) -> bool {
        matches!(self, FlitType::Tail | FlitType::HeadTail)
    }
}

impl fmt::Display for FlitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlitType::Head => write!(f, "HEAD"),
            FlitType::Body => write!(f, "BODY"),
            FlitType::Tail => write!(f, "TAIL"),
            FlitType::HeadTail => write!(f, "HEAD_TAIL"),
        }
    }
}

/// Where a packet is going.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Unicast(NodeId),
    /// An ordered set of targets.
    Multicast(Vec<NodeId>),
}

impl Destination {
    /// Build a multicast destination, removing duplicate targets while
    /// keeping the first-seen order.
    #[must_use]
    pub fn multicast(targets: &[NodeId]) -> Self {
        Destination::Multicast(targets.iter().copied().unique().collect())
    }

    #[must_use]
    pub fn is_multicast(&self) -> bool {
        matches!(self, Destination::Multicast(_))
    }

    /// Number of endpoints that should receive a copy of each flit.
    #[must_use]
    pub fn num_targets(&self) -> usize {
        match self {
            Destination::Unicast(_) => 1,
            Destination::Multicast(targets) => targets.len(),
        }
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        match self {
            Destination::Unicast(dst) => *dst == node,
            Destination::Multicast(targets) => targets.contains(&node),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Unicast(dst) => write!(f, "{dst}"),
            Destination::Multicast(targets) => write!(f, "{{{}}}", targets.iter().join(",")),
        }
    }
}

/// Flow-control digit: the unit that moves across a link in one transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct Flit {
    /// Unique tracking ID.
    pub id: Id,
    pub packet_id: u64,
    pub src: NodeId,
    pub dst: Destination,
    pub vc: usize,
    pub flit_type: FlitType,
    pub sequence_no: usize,
    pub sequence_length: usize,
    /// Number of routers this flit has passed through.
    pub hop_no: usize,
    pub payload: u64,
    /// Intermediate node the flit must visit before its destination.
    pub relay: Option<NodeId>,
    /// Tick at which the packet was handed to the network.
    pub created_tick: u64,
}

impl Unique for Flit {
    fn id(&self) -> Id {
        self.id
    }
}

impl fmt::Display for Flit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkt{}.{}/{} {} {}->{} vc{}",
            self.packet_id,
            self.sequence_no,
            self.sequence_length,
            self.flit_type,
            self.src,
            self.dst,
            self.vc
        )?;
        if let Some(relay) = self.relay {
            write!(f, " via {relay}")?;
        }
        Ok(())
    }
}

/// A packet before it has been cut into flits.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub id: u64,
    pub src: NodeId,
    pub dst: Destination,
    pub vc: usize,
    pub timestamp: u64,
    /// Total number of flits.
    pub size: usize,
    /// Flits still to be produced.
    pub flit_left: usize,
    pub payload: u64,
}

impl Packet {
    /// Create a packet of `size` flits (a zero size is treated as one flit).
    #[must_use]
    pub fn new(id: u64, src: NodeId, dst: Destination, vc: usize, size: usize) -> Self {
        let size = size.max(1);
        Self {
            id,
            src,
            dst,
            vc,
            timestamp: 0,
            size,
            flit_left: size,
            payload: id,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: u64) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.flit_left == 0
    }

    /// Cut the next flit from the packet, or `None` once the tail has been
    /// produced.
    pub fn next_flit(&mut self, id: Id) -> Option<Flit> {
        if self.flit_left == 0 {
            return None;
        }
        let sequence_no = self.size - self.flit_left;
        self.flit_left -= 1;

        let flit_type = match (sequence_no == 0, self.flit_left == 0) {
            (true, true) => FlitType::HeadTail,
            (true, false) => FlitType::Head,
            (false, true) => FlitType::Tail,
            (false, false) => FlitType::Body,
        };

        Some(Flit {
            id,
            packet_id: self.id,
            src: self.src,
            dst: self.dst.clone(),
            vc: self.vc,
            flit_type,
            sequence_no,
            sequence_length: self.size,
            hop_no: 0,
            payload: self.payload.wrapping_add(sequence_no as u64),
            relay: None,
            created_tick: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_fragments_in_order() {
        let mut packet = Packet::new(7, 1, Destination::Unicast(3), 0, 3);
        let flits: Vec<Flit> = (0..4).filter_map(|i| packet.next_flit(Id(i))).collect();

        assert_eq!(flits.len(), 3);
        assert!(packet.is_done());
        assert_eq!(
            flits.iter().map(|f| f.flit_type).collect::<Vec<_>>(),
            vec![FlitType::Head, FlitType::Body, FlitType::Tail]
        );
        for (i, flit) in flits.iter().enumerate() {
            assert_eq!(flit.sequence_no, i);
            assert_eq!(flit.sequence_length, 3);
            assert_eq!(flit.packet_id, 7);
        }
    }

    #[test]
    fn single_flit_packet() {
        let mut packet = Packet::new(1, 0, Destination::Unicast(2), 1, 1);
        let flit = packet.next_flit(Id(10)).unwrap();
        assert_eq!(flit.flit_type, FlitType::HeadTail);
        assert!(flit.flit_type.is_head());
        assert!(flit.flit_type.is_tail());
        assert!(packet.next_flit(Id(11)).is_none());
    }

    #[test]
    fn multicast_targets_are_unique() {
        let dst = Destination::multicast(&[4, 2, 4, 3, 2]);
        assert_eq!(dst, Destination::Multicast(vec![4, 2, 3]));
        assert!(dst.is_multicast());
        assert_eq!(dst.num_targets(), 3);
        assert_eq!(format!("{dst}"), "{4,2,3}");
    }
}
