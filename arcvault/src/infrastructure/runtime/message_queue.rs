// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Message Queue
//!
//! Typed, capacity-bounded FIFO with an end-of-stream sentinel: the
//! channel between the entry pipeline and the worker pool, and between
//! convert workers and the storage writer.
//!
//! ## Semantics
//!
//! - `put` blocks while the queue is full and fails only once the queue is
//!   closed
//! - `get` blocks while the queue is empty and returns `None` once the
//!   queue is closed *and* drained; pending items are always delivered
//! - `try_get` is the non-blocking variant
//! - `close` is the only cancellation primitive: it wakes every waiter,
//!   further `put`s fail, and consumers run to termination cleanly
//!
//! ## Capacity
//!
//! The entry queue is bounded (256 descriptors) so a fast producer cannot
//! outrun slow workers. The storage queue is unbounded: each message is a
//! fully materialized intermediate file on disk, and backpressure comes
//! from the single writer serializing uploads.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking FIFO with close semantics.
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> MessageQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue needs capacity > 0");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity: Some(capacity),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Creates a queue without a capacity bound.
    pub fn unbounded() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: None,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueues a message, blocking while the queue is full.
    ///
    /// Returns `false` iff the queue was closed (the message is dropped).
    pub fn put(&self, message: T) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            match self.capacity {
                Some(capacity) if state.items.len() >= capacity => {
                    self.not_full.wait(&mut state);
                }
                _ => break,
            }
        }
        state.items.push_back(message);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Dequeues the next message, blocking while the queue is empty.
    ///
    /// Returns `None` iff the queue was closed and fully drained.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(message) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(message);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking dequeue.
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.state.lock();
        let message = state.items.pop_front();
        if message.is_some() {
            drop(state);
            self.not_full.notify_one();
        }
        message
    }

    /// Marks end-of-stream and wakes all waiters.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
