// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Stop the simulation once enough flits have been delivered.

use std::cell::Cell;
use std::rc::Rc;

use arbor_engine::events::once::Once;
use arbor_engine::types::{Eventable, SimResult};
use arbor_model_builder::{EntityDisplay, EntityGet};
use arbor_track::entity::Entity;
use arbor_track::info;

#[derive(EntityDisplay, EntityGet)]
pub struct DrainController {
    pub entity: Rc<Entity>,
    threshold: Option<u64>,
    drained: Cell<u64>,
    stop: Once<()>,
}

impl DrainController {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, threshold: Option<u64>) -> Rc<Self> {
        Rc::new(Self {
            entity: Rc::new(Entity::new(parent, name)),
            threshold,
            drained: Cell::new(0),
            stop: Once::default(),
        })
    }

    /// Record one flit delivered to a local port.
    pub fn report(&self) -> SimResult {
        let drained = self.drained.get() + 1;
        self.drained.set(drained);
        if let Some(threshold) = self.threshold
            && drained >= threshold
            && !self.stop.is_triggered()
        {
            info!(self.entity ; "{drained} flits drained, stopping");
            self.stop.notify()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn drained(&self) -> u64 {
        self.drained.get()
    }

    #[must_use]
    pub fn threshold(&self) -> Option<u64> {
        self.threshold
    }

    #[must_use]
    pub fn has_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Event that fires when the threshold is reached.
    #[must_use]
    pub fn stop_event(&self) -> Eventable<()> {
        Box::new(self.stop.clone())
    }
}

#[cfg(test)]
mod tests {
    use arbor_track::entity::toplevel;
    use arbor_track::tracker::dev_null_tracker;

    use super::*;

    #[test]
    fn fires_once_at_threshold() {
        let top = toplevel(&dev_null_tracker(), "top");
        let drain = DrainController::new(&top, "drain", Some(3));
        drain.report().unwrap();
        drain.report().unwrap();
        assert!(!drain.has_stopped());
        drain.report().unwrap();
        assert!(drain.has_stopped());

        // Late reports are counted but harmless
        drain.report().unwrap();
        assert_eq!(drain.drained(), 4);
    }

    #[test]
    fn no_threshold_never_fires() {
        let top = toplevel(&dev_null_tracker(), "top");
        let drain = DrainController::new(&top, "drain", None);
        for _ in 0..100 {
            drain.report().unwrap();
        }
        assert!(!drain.has_stopped());
    }
}
