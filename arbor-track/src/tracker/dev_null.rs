// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;

use crate::tracker::Track;
use crate::{Id, ROOT};

/// A tracker that does nothing.
///
/// This can be useful for benchmarks that want to have minimum overheads.
/// Unique IDs are still handed out so that entities remain distinguishable.
pub struct DevNullTracker {
    next_id: Cell<u64>,
}

impl Default for DevNullTracker {
    fn default() -> Self {
        Self {
            next_id: Cell::new(ROOT.0 + 1),
        }
    }
}

impl Track for DevNullTracker {
    fn unique_id(&self) -> Id {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Id(id)
    }
    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        false
    }
    fn add_entity(&self, _id: Id, _entity_name: &str) {}
    fn enter(&self, _id: Id, _obj: Id) {}
    fn exit(&self, _id: Id, _obj: Id) {}
    fn value(&self, _id: Id, _value: f64) {}
    fn create(&self, _id: Id, _obj: Id, _num_bytes: usize, _req_type: i8, _name: &str) {}
    fn destroy(&self, _id: Id, _obj: Id) {}
    fn connect(&self, _connect_from: Id, _connect_to: Id) {}
    fn log(&self, _id: Id, _level: log::Level, _msg: std::fmt::Arguments) {}
    fn time(&self, _set_by: Id, _time_ns: f64) {}
    fn shutdown(&self) {}
}
