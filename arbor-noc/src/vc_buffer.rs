// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Bounded FIFO of flits for one virtual channel of one port.

use std::collections::VecDeque;

use crate::flit::Flit;

/// Returned by [`VcBuffer::push`] when the buffer is at capacity.
#[derive(Debug, PartialEq)]
pub struct BufferFull;

#[derive(Debug)]
pub struct VcBuffer {
    capacity: usize,
    flits: VecDeque<Flit>,
}

impl VcBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            flits: VecDeque::with_capacity(capacity),
        }
    }

    /// Add a flit to the back of the buffer. A full buffer is left unchanged.
    pub fn push(&mut self, flit: Flit) -> Result<(), BufferFull> {
        if self.is_full() {
            return Err(BufferFull);
        }
        self.flits.push_back(flit);
        Ok(())
    }

    /// The head-of-line flit. Callers must check [`is_empty`](Self::is_empty).
    #[must_use]
    pub fn front(&self) -> Option<&Flit> {
        self.flits.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Flit> {
        self.flits.front_mut()
    }

    pub fn pop(&mut self) -> Option<Flit> {
        self.flits.pop_front()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.flits.len() >= self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flits.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
