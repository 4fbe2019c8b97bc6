// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use arbor_engine::run_simulation;
use arbor_engine::test_helpers::start_test;
use arbor_noc::config::{NocConfig, RelayConfig};
use arbor_noc::flit::{Destination, Packet};
use arbor_noc::network::TreeNetwork;
use arbor_noc::traffic::TrafficPattern;

mod common;
use common::{check_packets_in_order, network_with_traffic};

#[test]
fn to_root() {
    let mut engine = start_test(file!());
    let config = NocConfig::default();
    let network = network_with_traffic(&engine, &config, TrafficPattern::ToRoot, 3, 4);

    run_simulation!(engine);

    let root = network.endpoint(0).unwrap();
    assert_eq!(root.num_packets_received(), 10 * 3);
    assert_eq!(root.num_flits_received(), 10 * 3 * 4);
    check_packets_in_order(root);

    // Every router on the way, including the root, forwards the flit once
    let topology = network.topology();
    for flit in root.received() {
        assert_eq!(flit.hop_no, topology.level(flit.src) + 1);
    }

    let stats = network.stats();
    assert_eq!(stats.flits_injected, 120);
    assert_eq!(stats.flits_delivered, 120);
    assert_eq!(stats.packets_received, 30);
    assert!(stats.heads_reserved >= 30);
    assert!(stats.average_latency.unwrap() > 0.0);
}

#[test]
fn from_root() {
    let mut engine = start_test(file!());
    let config = NocConfig::default();
    let network = network_with_traffic(&engine, &config, TrafficPattern::FromRoot, 16, 3);

    run_simulation!(engine);

    let topology = network.topology();
    for node in 0..topology.num_nodes() {
        let endpoint = network.endpoint(node).unwrap();
        if topology.children(node).is_empty() {
            assert_eq!(endpoint.num_packets_received(), 2);
            assert!(
                endpoint
                    .received()
                    .iter()
                    .all(|f| f.dst == Destination::Unicast(node))
            );
            check_packets_in_order(endpoint);
        } else {
            assert_eq!(endpoint.num_flits_received(), 0);
        }
    }
}

#[test]
fn broadcast() {
    let mut engine = start_test(file!());
    let config = NocConfig {
        fanout: vec![2, 2, 0],
        ..Default::default()
    };
    let network = network_with_traffic(&engine, &config, TrafficPattern::Broadcast, 2, 3);

    run_simulation!(engine);

    let topology = network.topology();
    for node in 0..topology.num_nodes() {
        let endpoint = network.endpoint(node).unwrap();
        if topology.children(node).is_empty() {
            assert_eq!(endpoint.num_flits_received(), 6);
            check_packets_in_order(endpoint);
        } else {
            assert_eq!(endpoint.num_flits_received(), 0);
        }
    }

    // Each flit leaves the root once with copies on both children
    let root = network.router(0).unwrap();
    assert_eq!(root.stats().flits_routed(), 6);
    assert_eq!(root.stats().link_traversals(), vec![0, 6, 6]);
    assert_eq!(network.stats().flits_delivered, 4 * 6);
}

#[test]
fn multicast_from_a_leaf() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    // 0 - 1 - 3, 4
    //   \ 2 - 5, 6
    // Leaf 3 sends long packets to its sibling 4 and its cousins 5 and 6
    // through single-slot buffers.
    let config = NocConfig {
        num_vcs: 1,
        buffer_depth: 1,
        fanout: vec![2, 2, 0],
        ..Default::default()
    };
    let network = TreeNetwork::new_and_register(&engine, &clock, engine.top(), &config).unwrap();
    let packets = vec![
        Packet::new(1, 3, Destination::multicast(&[4, 5]), 0, 8),
        Packet::new(2, 3, Destination::multicast(&[4, 5, 6]), 0, 8),
    ];
    network
        .set_generator(3, Box::new(packets.into_iter()))
        .unwrap();

    run_simulation!(engine);

    let received = |node| network.endpoint(node).unwrap().num_packets_received();
    assert_eq!(
        (received(4), received(5), received(6)),
        (2, 2, 1)
    );
    for node in [0, 1, 2, 3] {
        assert_eq!(received(node), 0);
    }
    for node in [4, 5, 6] {
        check_packets_in_order(network.endpoint(node).unwrap());
    }
    assert_eq!(network.stats().flits_delivered, 5 * 8);

    // Nothing is sent back down into the subtree of router 1
    let root = network.router(0).unwrap();
    assert_eq!(root.stats().link_traversals(), vec![0, 0, 16]);
}

#[test]
fn random_traffic_is_delivered() {
    let mut engine = start_test(file!());
    let config = NocConfig {
        seed: 5,
        ..Default::default()
    };
    let network = network_with_traffic(&engine, &config, TrafficPattern::Random, 5, 2);

    run_simulation!(engine);

    let expected =
        TrafficPattern::Random.expected_flit_deliveries(network.topology(), 5, 2);
    assert_eq!(network.stats().flits_delivered, expected);
    assert_eq!(network.flits_in_flight(expected), 0);
    for endpoint in network.endpoints() {
        check_packets_in_order(endpoint);
        assert!(
            endpoint
                .received()
                .iter()
                .all(|f| f.dst == Destination::Unicast(endpoint.node()))
        );
    }
}

#[test]
fn same_seed_same_result() {
    let run = |seed| {
        let mut engine = start_test(file!());
        let config = NocConfig {
            seed,
            ..Default::default()
        };
        let network = network_with_traffic(&engine, &config, TrafficPattern::Random, 4, 3);
        run_simulation!(engine);
        (engine.time_now_ns(), network.stats())
    };
    assert_eq!(run(11), run(11));
}

#[test]
fn single_buffer_slot() {
    let mut engine = start_test(file!());
    let config = NocConfig {
        num_vcs: 1,
        buffer_depth: 1,
        ..Default::default()
    };
    let network = network_with_traffic(&engine, &config, TrafficPattern::ToRoot, 4, 5);

    run_simulation!(engine);

    let root = network.endpoint(0).unwrap();
    assert_eq!(root.num_flits_received(), 10 * 4 * 5);
    check_packets_in_order(root);
}

#[test]
fn drain_stops_early() {
    let mut engine = start_test(file!());
    let config = NocConfig {
        drain_threshold: Some(10),
        ..Default::default()
    };
    let network = network_with_traffic(&engine, &config, TrafficPattern::ToRoot, 10, 2);

    engine.run_until(network.drain().stop_event()).unwrap();

    assert!(network.drain().has_stopped());
    assert!(network.drain().drained() >= 10);
    assert!(network.endpoint(0).unwrap().num_flits_received() < 10 * 10 * 2);
}

#[test]
fn relay_detour() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    // 0 - 1 - 3
    //   \ 2 - 4
    // Traffic for node 1 goes through node 4 first.
    let config = NocConfig {
        fanout: vec![2, 1, 0],
        relays: vec![RelayConfig {
            destination: 1,
            relay: 4,
        }],
        ..Default::default()
    };
    let network = TreeNetwork::new_and_register(&engine, &clock, engine.top(), &config).unwrap();
    let packet = Packet::new(7, 3, Destination::Unicast(1), 0, 3);
    network
        .set_generator(3, Box::new(vec![packet].into_iter()))
        .unwrap();

    run_simulation!(engine);

    let endpoint = network.endpoint(1).unwrap();
    assert_eq!(endpoint.num_packets_received(), 1);
    check_packets_in_order(endpoint);
    for flit in endpoint.received() {
        // 3 -> 1 -> 0 -> 2 -> 4 -> 2 -> 0 -> 1
        assert_eq!(flit.hop_no, 8);
        assert_eq!(flit.relay, None);
    }
    assert_eq!(network.router(4).unwrap().stats().flits_routed(), 3);
    assert_eq!(network.router(2).unwrap().stats().flits_routed(), 6);
}

#[test]
fn unknown_destination() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let config = NocConfig {
        fanout: vec![1, 1, 0],
        ..Default::default()
    };
    let network = TreeNetwork::new_and_register(&engine, &clock, engine.top(), &config).unwrap();
    let packet = Packet::new(1, 2, Destination::Unicast(99), 0, 2);
    network
        .set_generator(2, Box::new(vec![packet].into_iter()))
        .unwrap();

    run_simulation!(engine, "Error: node 2: destination 99 is not in the tree");
}

#[test]
fn invalid_config() {
    let engine = start_test(file!());
    let clock = engine.default_clock();
    let config = NocConfig {
        num_vcs: 0,
        ..Default::default()
    };
    match TreeNetwork::new_and_register(&engine, &clock, engine.top(), &config) {
        Ok(_) => panic!("Expected an error!"),
        Err(e) => assert_eq!(
            format!("{e}"),
            "Error: Invalid configuration: num_vcs must be at least 1"
        ),
    }
}
