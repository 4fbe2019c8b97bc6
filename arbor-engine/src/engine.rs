// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The [`Engine`] owns the executor, the clocks and the registered components.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use arbor_track::Tracker;
use arbor_track::entity::{Entity, toplevel};
use arbor_track::tracker::stdout_tracker;

use crate::executor::{self, Executor};
use crate::time::clock::Clock;
use crate::types::{Component, Eventable, SimResult};

/// Use a default clock frequency of 1GHz.
const DEFAULT_CLOCK_MHZ: f64 = 1000.0;

pub struct Engine {
    executor: Executor,
    toplevel: Rc<Entity>,
    tracker: Tracker,
    components: RefCell<Vec<Component>>,
}

impl Engine {
    /// Create a standalone engine.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let executor = executor::new_executor(&toplevel);
        Self {
            executor,
            toplevel,
            tracker: tracker.clone(),
            components: RefCell::new(Vec::new()),
        }
    }

    /// Register a component whose `run()` will be spawned when the simulation
    /// starts.
    pub fn register(&self, component: Component) {
        self.components.borrow_mut().push(component);
    }

    /// Run the simulation until there is nothing left that must complete.
    pub fn run(&mut self) -> SimResult {
        // Never set, so only stops when the tasks are done
        let finished = Rc::new(Cell::new(false));
        self.spawn_components();
        let result = self.executor.run(&finished);
        self.tracker.shutdown();
        result
    }

    /// Run the simulation until the `event` fires.
    pub fn run_until<T: Copy + 'static>(&mut self, event: Eventable<T>) -> SimResult {
        let finished = Rc::new(Cell::new(false));
        {
            let finished = finished.clone();
            self.executor.spawn(async move {
                event.listen().await;
                finished.set(true);
                Ok(())
            });
        }
        self.spawn_components();
        let result = self.executor.run(&finished);
        self.tracker.shutdown();
        result
    }

    fn spawn_components(&self) {
        for component in self.components.borrow_mut().drain(..) {
            self.executor.spawn(async move { component.run().await });
        }
    }

    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.executor.spawn(future);
    }

    #[must_use]
    pub fn default_clock(&self) -> Clock {
        self.executor.get_clock(DEFAULT_CLOCK_MHZ)
    }

    #[must_use]
    pub fn clock_mhz(&self, freq_mhz: f64) -> Clock {
        self.executor.get_clock(freq_mhz)
    }

    #[must_use]
    pub fn time_now_ns(&self) -> f64 {
        self.executor.time_now_ns()
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](arbor_track::Track) events to
/// stdout.
///
/// This is provided to keep documentation examples simple with fewer
/// concepts to have to consider at once.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
