// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The single interface the driver uses to talk to an external entity.
//!
//! Kernel capture queues complete buffers through a blocking dequeue while
//! firmware ports call back from their own thread. Both are hidden behind
//! [`BufferPort`] so the driver does not care which discipline is in use.

use crate::{
    buffer::Buffer,
    completion::Completion,
    error::{Error, Result},
};
use std::{fmt, time::Duration};

/// How an entity reports that it is done with a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Discipline {
    /// The entity calls a handler from its own execution context.
    Callback,
    /// The application blocks in a retrieval call.
    Poll,
}

/// A submission the entity refused. The buffer comes back with the error so
/// it is never lost from the pool.
pub struct Rejected {
    pub buffer: Buffer,
    pub error: Error,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("index", &self.buffer.index())
            .field("error", &self.error)
            .finish()
    }
}

/// One direction of traffic to an external entity.
pub trait BufferPort {
    fn name(&self) -> &str;

    fn discipline(&self) -> Discipline;

    /// Starts the entity once the initial buffers are submitted.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hands `buffer` to the entity.
    fn submit(&mut self, buffer: Buffer) -> Result<(), Rejected>;

    /// Blocks until the entity hands a buffer back, or `timeout` expires.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Completion>;

    /// Number of buffers the entity currently holds.
    fn outstanding(&self) -> usize;

    /// Stops the entity and returns every buffer it still held.
    fn stop(&mut self) -> Result<Vec<Buffer>>;

    /// Gives the pool's buffers back to the entity at teardown.
    fn destroy(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        drop(buffers);
        Ok(())
    }
}
