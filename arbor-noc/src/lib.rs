// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A hierarchical tree network-on-chip.
//!
//! Each node of the tree has a wormhole [router](crate::router::Router) with
//! a local port to an [endpoint](crate::endpoint::Endpoint), a port towards
//! its parent and one port per child. Flits travel over
//! [links](crate::link::Link) whose wires only change at clock edges, so all
//! routers act on the state of the previous tick.
//!
//! A whole network is normally created with
//! [`TreeNetwork`](crate::network::TreeNetwork):
//!
//! ```rust
//! use arbor_engine::engine::Engine;
//! use arbor_engine::run_simulation;
//! use arbor_noc::config::NocConfig;
//! use arbor_noc::network::TreeNetwork;
//! use arbor_noc::traffic::{PacketGen, TrafficPattern};
//!
//! let mut engine = Engine::default();
//! let clock = engine.default_clock();
//! let config = NocConfig {
//!     fanout: vec![1, 1, 0],
//!     ..Default::default()
//! };
//! let network = TreeNetwork::new_and_register(&engine, &clock, engine.top(), &config).unwrap();
//! let generator = PacketGen::new(
//!     network.topology().clone(),
//!     2,
//!     TrafficPattern::ToRoot,
//!     config.num_vcs,
//!     3,
//!     2,
//!     config.seed,
//! );
//! network.set_generator(2, Box::new(generator)).unwrap();
//!
//! run_simulation!(engine);
//! assert_eq!(network.endpoint(0).unwrap().num_packets_received(), 2);
//! ```

pub mod config;
pub mod connect;
pub mod drain;
pub mod endpoint;
pub mod flit;
pub mod link;
pub mod network;
pub mod reservation;
pub mod router;
pub mod routing;
pub mod stats;
pub mod topology;
pub mod traffic;
pub mod vc_buffer;
