// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulation time and the clocks that advance it.

pub mod clock;
pub mod simtime;
