// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! One direction of a physical connection between two ports.
//!
//! The sender owns the `data` and `req` wires, the receiver owns `ack` and
//! `full`. A flit is present on the link while `req` differs from the toggle
//! the receiver expects next. The receiver accepts it by flipping that toggle
//! and driving it onto `ack`. Independently, the receiver drives one
//! buffer-full bit per virtual channel every tick.
//!
//! A sender may start a new transfer on VC `v` only once `ack` has caught up
//! with its own transmit toggle and `full[v]` is clear.

use std::rc::Rc;

use arbor_engine::wire::Wire;
use arbor_track::entity::Entity;

use crate::flit::Flit;

/// Per-VC buffer-full vector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FullStatus(Vec<bool>);

impl FullStatus {
    #[must_use]
    pub fn new(num_vcs: usize) -> Self {
        Self(vec![false; num_vcs])
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// VCs outside the vector are reported as full so that they are never
    /// used.
    #[must_use]
    pub fn is_full(&self, vc: usize) -> bool {
        self.0.get(vc).copied().unwrap_or(true)
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.0
    }
}

pub struct Link {
    pub entity: Rc<Entity>,
    pub data: Rc<Wire<Option<Flit>>>,
    pub req: Rc<Wire<bool>>,
    pub ack: Rc<Wire<bool>>,
    pub full: Rc<Wire<FullStatus>>,
}

impl Link {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, num_vcs: usize) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        Rc::new(Self {
            data: Wire::new(&entity, "data", None),
            req: Wire::new(&entity, "req", false),
            ack: Wire::new(&entity, "ack", false),
            full: Wire::new(&entity, "full", FullStatus::new(num_vcs)),
            entity,
        })
    }

    /// Whether a flit is waiting for a receiver that expects `rx_expected`.
    #[must_use]
    pub fn has_new_flit(&self, rx_expected: bool) -> bool {
        self.req.read() != rx_expected
    }

    /// Whether a sender holding `tx_toggle` may send on `vc`.
    #[must_use]
    pub fn can_send(&self, tx_toggle: bool, vc: usize) -> bool {
        self.ack.read() == tx_toggle && !self.full.read().is_full(vc)
    }

    /// Whether the last flit sent by a sender holding `tx_toggle` has been
    /// accepted.
    #[must_use]
    pub fn is_acknowledged(&self, tx_toggle: bool) -> bool {
        self.ack.read() == tx_toggle
    }
}
