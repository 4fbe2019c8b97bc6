// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Connect the ports of components.
//!
//! [`connect_port!`](crate::connect_port) pairs a `connect_port_<name>()`
//! function of the sender with a `port_<name>()` function of the receiver.
//! An index may be given on either side. The expansion is a
//! [`SimResult`](arbor_engine::types::SimResult).

pub use arbor_track::debug;
pub use paste::paste;

#[macro_export]
macro_rules! connect_port {
    ($from:expr, $from_port_name:ident, $from_index:expr => $to:expr, $to_port_name:ident, $to_index:expr) => {{
        let from_index: usize = $from_index;
        let to_index: usize = $to_index;
        $crate::connect::debug!($from.entity ; "Connect {}.{}[{}] => {}.{}[{}]", $from, stringify!($from_port_name), from_index, $to, stringify!($to_port_name), to_index);
        $crate::connect::paste! {
            $to.[< port_ $to_port_name >](to_index)
                .and_then(|link| $from.[< connect_port_ $from_port_name >](from_index, link))
        }
    }};
    ($from:expr, $from_port_name:ident, $from_index:expr => $to:expr, $to_port_name:ident) => {{
        let from_index: usize = $from_index;
        $crate::connect::debug!($from.entity ; "Connect {}.{}[{}] => {}.{}", $from, stringify!($from_port_name), from_index, $to, stringify!($to_port_name));
        $crate::connect::paste! {
            $from.[< connect_port_ $from_port_name >](from_index, $to.[< port_ $to_port_name >]())
        }
    }};
    ($from:expr, $from_port_name:ident => $to:expr, $to_port_name:ident, $to_index:expr) => {{
        let to_index: usize = $to_index;
        $crate::connect::debug!($from.entity ; "Connect {}.{} => {}.{}[{}]", $from, stringify!($from_port_name), $to, stringify!($to_port_name), to_index);
        $crate::connect::paste! {
            $to.[< port_ $to_port_name >](to_index)
                .and_then(|link| $from.[< connect_port_ $from_port_name >](link))
        }
    }};
}
