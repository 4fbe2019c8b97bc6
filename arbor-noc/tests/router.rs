// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;
use std::rc::Rc;

use arbor_engine::engine::Engine;
use arbor_engine::events::once::Once;
use arbor_engine::run_simulation;
use arbor_engine::test_helpers::start_test;
use arbor_engine::time::clock::Clock;
use arbor_noc::config::NocConfig;
use arbor_noc::flit::{Destination, Flit, NodeId, Packet};
use arbor_noc::link::Link;
use arbor_noc::router::Router;
use arbor_noc::routing::LogicalPort;
use arbor_noc::topology::TreeTopology;
use arbor_track::Id;

/// A root with a single child and one VC of one slot. Nothing is connected to
/// the outputs so every flit received stays in its buffer.
fn lonely_root(engine: &Engine, clock: &Clock) -> Rc<Router> {
    let config = NocConfig {
        num_vcs: 1,
        buffer_depth: 1,
        fanout: vec![1, 0],
        ..Default::default()
    };
    let topology = Rc::new(config.topology().unwrap());
    Router::new_and_register(engine, clock, engine.top(), 0, &topology, &config, None).unwrap()
}

fn single_flit(packet_id: u64, src: NodeId, dst: NodeId) -> Flit {
    Packet::new(packet_id, src, Destination::Unicast(dst), 0, 1)
        .next_flit(Id(1000 + packet_id))
        .unwrap()
}

/// Present `flit` on `link` and wait up to `max_ticks` for it to be
/// acknowledged. Returns whether it was.
async fn send(link: &Link, clock: &Clock, toggle: &Cell<bool>, flit: Flit, max_ticks: u64) -> bool {
    let new_toggle = !toggle.get();
    toggle.set(new_toggle);
    link.data.drive(clock, Some(flit));
    link.req.drive(clock, new_toggle);
    for _ in 0..max_ticks {
        clock.wait_ticks(1).await;
        if link.ack.read() == new_toggle {
            return true;
        }
    }
    false
}

#[test]
fn port_layout() {
    let engine = start_test(file!());
    let clock = engine.default_clock();
    let router = lonely_root(&engine, &clock);

    assert_eq!(format!("{router}"), "top::dram0");
    assert_eq!(router.node(), 0);
    assert_eq!(
        router.port_map().iter().collect::<Vec<_>>(),
        vec![LogicalPort::Local, LogicalPort::Down(0)]
    );
    assert!(router.port_rx(2).is_err());

    let link = Link::new(engine.top(), "link", 1);
    router.connect_port_tx(1, link.clone()).unwrap();
    assert_eq!(
        router.connect_port_tx(1, link).unwrap_err().to_string(),
        "Error: top::dram0: tx port down0 already connected"
    );
}

#[test]
fn full_status_is_asserted() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let router = lonely_root(&engine, &clock);
    let link = router.port_rx(1).unwrap();
    let done = Once::default();

    {
        let clock = clock.clone();
        let done = done.clone();
        engine.spawn(async move {
            assert!(!link.full.read().is_full(0));
            let toggle = Cell::new(false);
            assert!(send(&link, &clock, &toggle, single_flit(1, 1, 0), 4).await);

            // The router is now holding the flit and has said so
            clock.wait_ticks(1).await;
            assert!(link.full.read().is_full(0));
            assert!(!link.can_send(toggle.get(), 0));
            done.notify()
        });
    }

    engine.run_until(Box::new(done)).unwrap();
    assert_eq!(router.buffer_occupancy(1, 0), 1);
    assert_eq!(router.stats().buffer_writes(), vec![0, 1]);
}

#[test]
fn push_into_full_buffer_is_fatal() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let router = lonely_root(&engine, &clock);
    let link = router.port_rx(1).unwrap();

    {
        let clock = clock.clone();
        engine.spawn(async move {
            let toggle = Cell::new(false);
            assert!(send(&link, &clock, &toggle, single_flit(1, 1, 0), 4).await);
            // Ignore the buffer-full status
            send(&link, &clock, &toggle, single_flit(2, 1, 0), 4).await;
            Ok(())
        });
    }

    run_simulation!(
        engine,
        "Error: top::dram0: pkt2.0/1 HEAD_TAIL 1->0 vc0 received on port down0 vc 0 while its buffer is full"
    );
    assert_eq!(router.buffer_occupancy(1, 0), 1);
}

#[test]
fn local_port_is_not_acknowledged_when_full() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let router = lonely_root(&engine, &clock);
    let link = router.port_rx(0).unwrap();
    let done = Once::default();

    {
        let clock = clock.clone();
        let done = done.clone();
        engine.spawn(async move {
            let toggle = Cell::new(false);
            assert!(send(&link, &clock, &toggle, single_flit(1, 0, 1), 4).await);
            assert!(!send(&link, &clock, &toggle, single_flit(2, 0, 1), 5).await);
            done.notify()
        });
    }

    engine.run_until(Box::new(done)).unwrap();
    assert_eq!(router.buffer_occupancy(0, 0), 1);
    assert!(router.stats().local_stalls() >= 4);
}

#[test]
fn reset_drops_reservations() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let router = lonely_root(&engine, &clock);
    let link = router.port_rx(0).unwrap();
    let done = Once::default();

    {
        let clock = clock.clone();
        let done = done.clone();
        engine.spawn(async move {
            let toggle = Cell::new(false);
            assert!(send(&link, &clock, &toggle, single_flit(1, 0, 1), 4).await);
            done.notify()
        });
    }

    engine.run_until(Box::new(done)).unwrap();

    // Routed towards the child but never sent as the output is not connected
    assert_eq!(router.reserved_outputs(0, 0), vec![1]);
    assert_eq!(router.stats().heads_reserved(), 1);

    router.reset();
    assert!(router.reserved_outputs(0, 0).is_empty());
    assert_eq!(router.buffer_occupancy(0, 0), 1);
}

#[test]
fn multicast_waits_for_every_output() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    // Root with two children, both outputs connected to links that only this
    // test acknowledges.
    let config = NocConfig {
        num_vcs: 1,
        buffer_depth: 4,
        fanout: vec![2, 0],
        ..Default::default()
    };
    let topology = Rc::new(TreeTopology::from_fanout(&config.fanout).unwrap());
    let router =
        Router::new_and_register(&engine, &clock, engine.top(), 0, &topology, &config, None)
            .unwrap();
    let to_child1 = Link::new(engine.top(), "to_child1", 1);
    let to_child2 = Link::new(engine.top(), "to_child2", 1);
    router.connect_port_tx(1, to_child1.clone()).unwrap();
    router.connect_port_tx(2, to_child2.clone()).unwrap();

    let link = router.port_rx(0).unwrap();
    let done = Once::default();
    {
        let clock = clock.clone();
        let done = done.clone();
        let router = router.clone();
        engine.spawn(async move {
            let toggle = Cell::new(false);

            // Occupy the second child's link with a flit nobody acknowledges
            assert!(send(&link, &clock, &toggle, single_flit(1, 0, 2), 4).await);
            clock.wait_ticks(2).await;
            assert!(to_child2.req.read());

            let multicast = Packet::new(2, 0, Destination::multicast(&[1, 2]), 0, 1)
                .next_flit(Id(1002))
                .unwrap();
            assert!(send(&link, &clock, &toggle, multicast, 4).await);

            // Reserved but neither output gets a copy
            for _ in 0..5 {
                clock.wait_ticks(1).await;
                assert_eq!(router.reserved_outputs(0, 0), vec![1, 2]);
                assert!(!to_child1.req.read());
                assert!(to_child1.data.read().is_none());
                assert_eq!(to_child2.data.read().unwrap().packet_id, 1);
            }
            assert_eq!(router.buffer_occupancy(0, 0), 1);

            // Once the second child accepts, both copies go together
            to_child2.ack.drive(&clock, true);
            clock.wait_ticks(3).await;
            assert!(to_child1.req.read());
            assert!(!to_child2.req.read());
            assert_eq!(to_child1.data.read().unwrap().packet_id, 2);
            assert_eq!(to_child2.data.read().unwrap().packet_id, 2);
            assert_eq!(router.buffer_occupancy(0, 0), 0);
            done.notify()
        });
    }

    engine.run_until(Box::new(done)).unwrap();
    assert_eq!(router.stats().link_traversals(), vec![0, 1, 2]);
}

#[test]
fn wormhole_blocks_other_inputs() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    // Root with two children. Both children send a two-flit packet to the
    // root on the same VC.
    let config = NocConfig {
        num_vcs: 1,
        buffer_depth: 4,
        fanout: vec![2, 0],
        ..Default::default()
    };
    let topology = Rc::new(TreeTopology::from_fanout(&config.fanout).unwrap());
    let router =
        Router::new_and_register(&engine, &clock, engine.top(), 0, &topology, &config, None)
            .unwrap();
    let local = Link::new(engine.top(), "to_pe", 1);
    router.connect_port_tx(0, local.clone()).unwrap();

    for (port, src) in [(1, 1), (2, 2)] {
        let link = router.port_rx(port).unwrap();
        let clock = clock.clone();
        engine.spawn(async move {
            let toggle = Cell::new(false);
            let mut packet = Packet::new(src as u64, src, Destination::Unicast(0), 0, 2);
            while let Some(flit) = packet.next_flit(Id(100 * src as u64 + packet.flit_left as u64)) {
                assert!(send(&link, &clock, &toggle, flit, 20).await);
            }
            Ok(())
        });
    }

    // Stand in for the endpoint: accept everything and keep the order
    let received = Rc::new(std::cell::RefCell::new(Vec::new()));
    {
        let received = received.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            let mut expected = false;
            while received.borrow().len() < 4 {
                clock.wait_ticks(1).await;
                if local.has_new_flit(expected) {
                    let flit: Flit = local.data.read().unwrap();
                    received.borrow_mut().push((flit.packet_id, flit.sequence_no));
                    expected = !expected;
                    local.ack.drive(&clock, expected);
                }
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    // Packets are never interleaved on the output
    let received = received.borrow();
    assert_eq!(received.len(), 4);
    assert_eq!(received[0].0, received[1].0);
    assert_eq!(received[2].0, received[3].0);
    assert_ne!(received[0].0, received[2].0);
    assert_eq!(
        received.iter().map(|r| r.1).collect::<Vec<_>>(),
        vec![0, 1, 0, 1]
    );
    assert!(router.stats().reservation_stalls() > 0);
}
