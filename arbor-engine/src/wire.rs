// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A registered signal between two components.
//!
//! A value driven onto a [`Wire`] during one clock tick only becomes visible
//! to readers once the clock has moved on to the next tick. This means that
//! the order in which components are evaluated within a tick does not matter.
//!
//! If a wire is driven more than once in the same tick the last value driven
//! wins.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_track::entity::Entity;

use crate::traits::{Resolve, Resolver};

pub struct Wire<T>
where
    T: Clone + 'static,
{
    pub entity: Rc<Entity>,
    current: RefCell<T>,
    pending: RefCell<Option<T>>,
}

impl<T> Wire<T>
where
    T: Clone + 'static,
{
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, initial: T) -> Rc<Self> {
        Rc::new(Self {
            entity: Rc::new(Entity::new(parent, name)),
            current: RefCell::new(initial),
            pending: RefCell::new(None),
        })
    }

    /// Return the value committed at the start of this tick.
    #[must_use]
    pub fn read(&self) -> T {
        self.current.borrow().clone()
    }

    /// Drive a new value which will be committed when the `resolver` advances.
    pub fn drive(self: &Rc<Self>, resolver: &dyn Resolver, value: T) {
        let first_drive = self.pending.borrow_mut().replace(value).is_none();
        if first_drive {
            resolver.add_resolve(self.clone());
        }
    }

    /// Set the value immediately (used for reset outside of simulation time).
    pub fn force(&self, value: T) {
        self.pending.borrow_mut().take();
        *self.current.borrow_mut() = value;
    }
}

impl<T> Resolve for Wire<T>
where
    T: Clone + 'static,
{
    fn resolve(&self) {
        if let Some(value) = self.pending.borrow_mut().take() {
            *self.current.borrow_mut() = value;
        }
    }
}
