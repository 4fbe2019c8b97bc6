// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Synthetic traffic for the endpoints of a tree.

use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;

use crate::flit::{Destination, NodeId, Packet};
use crate::topology::TreeTopology;

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficPattern {
    /// Every node other than the root sends to the root
    #[default]
    ToRoot,

    /// The root sends to each leaf in turn
    FromRoot,

    /// The root multicasts every packet to all leaves
    Broadcast,

    /// Every node sends to other nodes chosen at random
    Random,
}

impl TrafficPattern {
    /// Whether `source` injects anything under this pattern.
    #[must_use]
    pub fn is_source(&self, topology: &TreeTopology, source: NodeId) -> bool {
        match self {
            TrafficPattern::ToRoot => source != topology.root(),
            TrafficPattern::FromRoot | TrafficPattern::Broadcast => source == topology.root(),
            TrafficPattern::Random => true,
        }
    }

    /// Total number of flits that will be delivered to local ports when every
    /// source sends `num_packets` packets of `packet_size` flits.
    #[must_use]
    pub fn expected_flit_deliveries(
        &self,
        topology: &TreeTopology,
        num_packets: usize,
        packet_size: usize,
    ) -> u64 {
        let num_sources = (0..topology.num_nodes())
            .filter(|&n| self.is_source(topology, n))
            .count();
        let copies = match self {
            TrafficPattern::Broadcast => topology.leaves().count(),
            TrafficPattern::ToRoot | TrafficPattern::FromRoot | TrafficPattern::Random => 1,
        };
        (num_sources * num_packets * packet_size.max(1) * copies) as u64
    }
}

/// Produces the packets one endpoint injects.
pub struct PacketGen {
    topology: Rc<TreeTopology>,
    source: NodeId,
    pattern: TrafficPattern,
    num_vcs: usize,
    packet_size: usize,
    num_packets: usize,
    num_generated: usize,
    rng: Xoshiro256PlusPlus,
    leaves: Vec<NodeId>,
}

impl PacketGen {
    #[must_use]
    pub fn new(
        topology: Rc<TreeTopology>,
        source: NodeId,
        pattern: TrafficPattern,
        num_vcs: usize,
        packet_size: usize,
        num_packets: usize,
        seed: u64,
    ) -> Self {
        // Create a local RNG which is different per source
        let rng = Xoshiro256PlusPlus::seed_from_u64(seed ^ (source as u64));
        let leaves = topology.leaves().collect();
        let num_packets = if pattern.is_source(&topology, source) {
            num_packets
        } else {
            0
        };

        Self {
            topology,
            source,
            pattern,
            num_vcs: num_vcs.max(1),
            packet_size,
            num_packets,
            num_generated: 0,
            rng,
            leaves,
        }
    }

    fn destination(&mut self) -> Destination {
        let num_nodes = self.topology.num_nodes();
        match self.pattern {
            TrafficPattern::ToRoot => Destination::Unicast(self.topology.root()),
            TrafficPattern::FromRoot => {
                Destination::Unicast(self.leaves[self.num_generated % self.leaves.len()])
            }
            TrafficPattern::Broadcast => Destination::multicast(&self.leaves),
            TrafficPattern::Random => {
                if num_nodes == 1 {
                    return Destination::Unicast(self.source);
                }
                // Pick from every node except the source
                let mut dst = self.rng.random_range(0..num_nodes - 1);
                if dst >= self.source {
                    dst += 1;
                }
                Destination::Unicast(dst)
            }
        }
    }
}

impl Iterator for PacketGen {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_generated >= self.num_packets {
            return None;
        }
        let dst = self.destination();
        let id = ((self.source as u64) << 32) | self.num_generated as u64;
        let vc = self.num_generated % self.num_vcs;
        self.num_generated += 1;
        Some(Packet::new(id, self.source, dst, vc, self.packet_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Rc<TreeTopology> {
        Rc::new(TreeTopology::from_fanout(&[2, 2, 0]).unwrap())
    }

    #[test]
    fn to_root() {
        let topology = topology();
        let packets: Vec<Packet> =
            PacketGen::new(topology.clone(), 4, TrafficPattern::ToRoot, 2, 3, 4, 0).collect();
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|p| p.dst == Destination::Unicast(0)));
        assert_eq!(
            packets.iter().map(|p| p.vc).collect::<Vec<_>>(),
            vec![0, 1, 0, 1]
        );

        // The root has nothing to send to itself
        assert_eq!(
            PacketGen::new(topology, 0, TrafficPattern::ToRoot, 2, 3, 4, 0).count(),
            0
        );
    }

    #[test]
    fn from_root_cycles_through_leaves() {
        let topology = topology();
        let dsts: Vec<Destination> =
            PacketGen::new(topology, 0, TrafficPattern::FromRoot, 1, 1, 5, 0)
                .map(|p| p.dst)
                .collect();
        assert_eq!(
            dsts,
            [3, 4, 5, 6, 3].map(Destination::Unicast).to_vec()
        );
    }

    #[test]
    fn broadcast_targets_all_leaves() {
        let topology = topology();
        let packet = PacketGen::new(topology.clone(), 0, TrafficPattern::Broadcast, 1, 2, 1, 0)
            .next()
            .unwrap();
        assert_eq!(packet.dst, Destination::multicast(&[3, 4, 5, 6]));
        assert_eq!(
            TrafficPattern::Broadcast.expected_flit_deliveries(&topology, 1, 2),
            8
        );
    }

    #[test]
    fn random_never_targets_self() {
        let topology = topology();
        for source in 0..topology.num_nodes() {
            let packets = PacketGen::new(topology.clone(), source, TrafficPattern::Random, 2, 1, 50, 7);
            for packet in packets {
                assert_ne!(packet.dst, Destination::Unicast(source));
                assert!(packet.dst.num_targets() == 1);
            }
        }
    }

    #[test]
    fn random_is_reproducible() {
        let topology = topology();
        let a: Vec<Packet> =
            PacketGen::new(topology.clone(), 2, TrafficPattern::Random, 2, 1, 20, 3).collect();
        let b: Vec<Packet> =
            PacketGen::new(topology, 2, TrafficPattern::Random, 2, 1, 20, 3).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn unique_packet_ids() {
        let topology = topology();
        let a = PacketGen::new(topology.clone(), 3, TrafficPattern::ToRoot, 1, 1, 2, 0)
            .next()
            .unwrap();
        let b = PacketGen::new(topology, 4, TrafficPattern::ToRoot, 1, 1, 2, 0)
            .next()
            .unwrap();
        assert_ne!(a.id, b.id);
    }
}
