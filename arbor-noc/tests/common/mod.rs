// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::collections::HashMap;

use arbor_engine::engine::Engine;
use arbor_noc::config::NocConfig;
use arbor_noc::endpoint::Endpoint;
use arbor_noc::flit::FlitType;
use arbor_noc::network::TreeNetwork;
use arbor_noc::traffic::{PacketGen, TrafficPattern};

/// Build a network and give every endpoint traffic following `pattern`.
#[allow(dead_code)]
pub fn network_with_traffic(
    engine: &Engine,
    config: &NocConfig,
    pattern: TrafficPattern,
    num_packets: usize,
    packet_size: usize,
) -> TreeNetwork {
    let clock = engine.default_clock();
    let network = TreeNetwork::new_and_register(engine, &clock, engine.top(), config).unwrap();
    for node in 0..network.topology().num_nodes() {
        let generator = PacketGen::new(
            network.topology().clone(),
            node,
            pattern,
            config.num_vcs,
            packet_size,
            num_packets,
            config.seed,
        );
        network.set_generator(node, Box::new(generator)).unwrap();
    }
    network
}

/// Check that the flits of every packet arrived complete and in order.
#[allow(dead_code)]
pub fn check_packets_in_order(endpoint: &Endpoint) {
    let mut next_sequence_no: HashMap<u64, usize> = HashMap::new();
    for flit in endpoint.received() {
        let expected = next_sequence_no.entry(flit.packet_id).or_insert(0);
        assert_eq!(flit.sequence_no, *expected, "{flit} out of order");
        assert_eq!(flit.flit_type.is_head(), flit.sequence_no == 0);
        assert_eq!(
            flit.flit_type.is_tail(),
            flit.sequence_no + 1 == flit.sequence_length
        );
        if flit.sequence_length == 1 {
            assert_eq!(flit.flit_type, FlitType::HeadTail);
        }
        *expected += 1;
    }
    for (packet_id, received) in next_sequence_no {
        let complete = endpoint
            .received()
            .iter()
            .any(|f| f.packet_id == packet_id && f.sequence_no + 1 == f.sequence_length);
        assert!(complete, "packet {packet_id} incomplete after {received} flits");
    }
}
