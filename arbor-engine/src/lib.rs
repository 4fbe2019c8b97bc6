// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! The Arbor engine executes clocked asynchronous simulation components.
//!
//! Components implement [`Runnable`](crate::traits::Runnable) and are
//! registered with the [`Engine`](crate::engine::Engine). They advance time by
//! awaiting a [`Clock`](crate::time::clock::Clock) and communicate through
//! [`Wire`](crate::wire::Wire)s whose values only change when the clock ticks.
//!
//! # Simple Application
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use arbor_engine::engine::Engine;
//! use arbor_engine::run_simulation;
//! use arbor_engine::wire::Wire;
//!
//! let mut engine = Engine::default();
//! let clock = engine.default_clock();
//! let wire = Wire::new(engine.top(), "count", 0_u64);
//! {
//!     let wire = wire.clone();
//!     engine.spawn(async move {
//!         for i in 1..=3 {
//!             wire.drive(&clock, i);
//!             clock.wait_ticks(1).await;
//!         }
//!         Ok(())
//!     });
//! }
//! run_simulation!(engine);
//! assert_eq!(wire.read(), 3);
//! ```

pub mod engine;
pub mod events;
pub mod executor;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

#[macro_export]
/// Run the simulation, panicking on error or checking the expected error.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}
