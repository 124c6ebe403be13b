// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Fixed buffer pool and the ownership state machine behind it.
//!
//! Each buffer cycles `Free → Submitted → Completed → Free`. The
//! [`OwnershipTracker`] refuses every other transition, so protocol misuse
//! surfaces as [`Error::ContractViolation`] rather than as two parties
//! touching the same memory.

use crate::{
    buffer::{Buffer, BufferMemory},
    error::{Error, Result},
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Ownership state of one pooled buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Held by the application, not yet submitted.
    Free,
    /// Handed to the external entity.
    Submitted,
    /// Returned by the external entity, awaiting processing.
    Completed,
}

/// Which party may touch the buffer memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    Application,
    ExternalEntity,
}

impl BufferState {
    pub fn owner(self) -> Owner {
        match self {
            BufferState::Free | BufferState::Completed => Owner::Application,
            BufferState::Submitted => Owner::ExternalEntity,
        }
    }
}

/// Per-buffer state machine.
#[derive(Debug, Clone)]
pub struct OwnershipTracker {
    states: Vec<BufferState>,
}

impl OwnershipTracker {
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![BufferState::Free; count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<BufferState> {
        self.states.get(index).copied()
    }

    pub fn states(&self) -> &[BufferState] {
        &self.states
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    pub fn all_free(&self) -> bool {
        self.states.iter().all(|s| *s == BufferState::Free)
    }

    /// Moves `index` from `from` to `to`, or reports the state it was
    /// actually in.
    pub fn transition(
        &mut self,
        index: usize,
        from: BufferState,
        to: BufferState,
    ) -> Result<(), Option<BufferState>> {
        match self.states.get_mut(index) {
            Some(state) if *state == from => {
                *state = to;
                Ok(())
            }
            Some(state) => Err(Some(*state)),
            None => Err(None),
        }
    }

    fn reset(&mut self) {
        self.states.clear();
    }
}

/// A fixed set of buffers for one direction of traffic.
///
/// The pool owns every buffer while the application holds it. Submitting a
/// buffer moves the [`Buffer`] value out so it can be handed to the external
/// entity; a completion moves it back in. The pool never allocates or frees
/// buffer memory after it is created.
pub struct BufferPool {
    name: String,
    buffer_size: usize,
    tracker: OwnershipTracker,
    held: Vec<Option<Buffer>>,
    submitted_at: Vec<Option<Instant>>,
}

impl BufferPool {
    /// Builds a pool from buffers provided by the external entity (mapped
    /// driver memory, firmware headers) or allocated by the application.
    ///
    /// Buffers must be indexed `0..n` in order and share a single capacity.
    pub fn create(name: impl Into<String>, buffers: Vec<Buffer>) -> Result<Self> {
        let name = name.into();
        if buffers.is_empty() {
            return Err(Error::ResourceExhausted {
                op: "pool create",
                detail: format!("pool {name} has no buffers"),
            });
        }

        let buffer_size = buffers[0].capacity();
        for (i, buf) in buffers.iter().enumerate() {
            if buf.index() != i {
                return Err(Error::Config(format!(
                    "pool {name}: buffer at position {i} has index {}",
                    buf.index()
                )));
            }
            if buf.capacity() != buffer_size {
                return Err(Error::Config(format!(
                    "pool {name}: buffer {i} has capacity {} expected {buffer_size}",
                    buf.capacity()
                )));
            }
        }

        let count = buffers.len();
        info!(
            pool = %name,
            count,
            buffer_size,
            total_kb = count * buffer_size / 1024,
            "buffer pool created"
        );

        Ok(Self {
            name,
            buffer_size,
            tracker: OwnershipTracker::new(count),
            held: buffers.into_iter().map(Some).collect(),
            submitted_at: vec![None; count],
        })
    }

    /// Builds a pool of `count` heap buffers of `buffer_size` bytes.
    pub fn with_heap(name: impl Into<String>, count: usize, buffer_size: usize) -> Result<Self> {
        let buffers = (0..count)
            .map(|i| Buffer::new(i, BufferMemory::heap(buffer_size)))
            .collect();
        Self::create(name, buffers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn tracker(&self) -> &OwnershipTracker {
        &self.tracker
    }

    pub fn state(&self, index: usize) -> Option<BufferState> {
        self.tracker.state(index)
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.tracker.count(state)
    }

    pub fn all_free(&self) -> bool {
        self.tracker.all_free()
    }

    /// Number of buffers currently owned by the external entity.
    pub fn in_flight(&self) -> usize {
        self.tracker.count(BufferState::Submitted)
    }

    /// Returns the lowest indexed `Free` buffer, e.g. to fill it before
    /// submission.
    pub fn acquire_free(&mut self) -> Result<&mut Buffer> {
        let index = self
            .tracker
            .states()
            .iter()
            .position(|s| *s == BufferState::Free)
            .ok_or_else(|| Error::PoolExhausted {
                pool: self.name.clone(),
            })?;
        self.held[index]
            .as_mut()
            .ok_or_else(|| Error::PoolExhausted {
                pool: self.name.clone(),
            })
    }

    /// A buffer the application owns, for reading completed contents or
    /// filling a free one.
    pub fn get(&self, index: usize) -> Result<&Buffer> {
        match self.held.get(index) {
            Some(Some(buf)) => Ok(buf),
            Some(None) => Err(self.violation(index, "get")),
            None => Err(self.invalid(index)),
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Buffer> {
        if index >= self.held.len() {
            return Err(self.invalid(index));
        }
        if self.held[index].is_none() {
            return Err(self.violation(index, "get_mut"));
        }
        self.held[index]
            .as_mut()
            .ok_or_else(|| Error::PoolExhausted {
                pool: self.name.clone(),
            })
    }

    /// `Free → Submitted`. Moves the buffer out for handing to the entity.
    pub fn submit(&mut self, index: usize) -> Result<Buffer> {
        self.move_state(index, BufferState::Free, BufferState::Submitted, "submit")?;
        let buffer = self.held[index]
            .take()
            .ok_or_else(|| self.violation(index, "submit"))?;
        self.submitted_at[index] = Some(Instant::now());
        debug!(pool = %self.name, index, "submitted");
        Ok(buffer)
    }

    /// `Submitted → Completed`. Takes the buffer back from the entity and
    /// returns the submit to complete latency.
    pub fn complete(&mut self, buffer: Buffer) -> Result<Duration> {
        let index = buffer.index();
        self.move_state(
            index,
            BufferState::Submitted,
            BufferState::Completed,
            "complete",
        )?;
        self.held[index] = Some(buffer);
        let latency = self.submitted_at[index]
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        debug!(pool = %self.name, index, ?latency, "completed");
        Ok(latency)
    }

    /// `Completed → Free`. Clears the fill metadata so the previous
    /// contents are no longer reported as valid.
    pub fn release(&mut self, index: usize) -> Result<()> {
        self.move_state(index, BufferState::Completed, BufferState::Free, "release")?;
        if let Some(buf) = self.held[index].as_mut() {
            buf.clear_meta();
        }
        debug!(pool = %self.name, index, "released");
        Ok(())
    }

    /// `Submitted → Free` for a buffer the entity handed back without
    /// processing it (flush, stream off, failed submission).
    pub fn reclaim(&mut self, mut buffer: Buffer) -> Result<()> {
        let index = buffer.index();
        self.move_state(index, BufferState::Submitted, BufferState::Free, "reclaim")?;
        buffer.clear_meta();
        self.held[index] = Some(buffer);
        self.submitted_at[index] = None;
        debug!(pool = %self.name, index, "reclaimed");
        Ok(())
    }

    /// Tears the pool down and hands the buffers back for the entity to
    /// destroy. Every buffer must be `Free`.
    pub fn teardown(&mut self) -> Result<Vec<Buffer>> {
        let in_flight = self.len() - self.count(BufferState::Free);
        if in_flight > 0 {
            error!(pool = %self.name, in_flight, "teardown with buffers in flight");
            return Err(Error::ResourceBusy {
                pool: self.name.clone(),
                in_flight,
            });
        }
        let buffers: Vec<Buffer> = self.held.drain(..).flatten().collect();
        self.submitted_at.clear();
        self.tracker.reset();
        info!(pool = %self.name, count = buffers.len(), "buffer pool torn down");
        Ok(buffers)
    }

    fn move_state(
        &mut self,
        index: usize,
        from: BufferState,
        to: BufferState,
        op: &'static str,
    ) -> Result<()> {
        match self.tracker.transition(index, from, to) {
            Ok(()) => Ok(()),
            Err(Some(state)) => {
                error!(pool = %self.name, index, ?state, op, "ownership contract violation");
                Err(Error::ContractViolation {
                    pool: self.name.clone(),
                    index,
                    state,
                    op,
                })
            }
            Err(None) => Err(self.invalid(index)),
        }
    }

    fn violation(&self, index: usize, op: &'static str) -> Error {
        match self.tracker.state(index) {
            Some(state) => Error::ContractViolation {
                pool: self.name.clone(),
                index,
                state,
                op,
            },
            None => self.invalid(index),
        }
    }

    fn invalid(&self, index: usize) -> Error {
        Error::InvalidIndex {
            pool: self.name.clone(),
            index,
            count: self.len(),
        }
    }
}
