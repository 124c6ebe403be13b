// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Completion hand-off from the external entity to the driving thread.
//!
//! Entities that call back from their own execution context (firmware
//! callback threads, the simulated ISP worker) own a [`CompletionSink`]; the
//! driver waits on the matching [`CompletionReceiver`]. The channel between
//! them is the only state shared across contexts.

use crate::{
    buffer::Buffer,
    error::{Error, Result},
};
use kanal::{ReceiveErrorTimeout, Receiver, Sender};
use std::time::Duration;
use tracing::{trace, warn};

/// A buffer handed back by the external entity.
#[derive(Debug)]
pub enum Completion {
    /// Filled (capture, stage output) or consumed (stage input).
    Done(Buffer),
    /// Handed back without being processed, e.g. by a flush or stream off.
    Returned(Buffer),
    /// The entity reported an error for this buffer. The buffer still comes
    /// back so the pool can account for it.
    Failed { buffer: Buffer, error: Error },
}

impl Completion {
    pub fn buffer(&self) -> &Buffer {
        match self {
            Completion::Done(buffer) | Completion::Returned(buffer) => buffer,
            Completion::Failed { buffer, .. } => buffer,
        }
    }

    pub fn into_buffer(self) -> Buffer {
        match self {
            Completion::Done(buffer) | Completion::Returned(buffer) => buffer,
            Completion::Failed { buffer, .. } => buffer,
        }
    }
}

/// Creates a completion channel able to hold `depth` outstanding
/// completions, normally the pool size, so the entity side never blocks.
pub fn completion_channel(depth: usize) -> (CompletionSink, CompletionReceiver) {
    let (tx, rx) = kanal::bounded(depth.max(1));
    (CompletionSink { tx }, CompletionReceiver { rx })
}

/// Entity side of the channel. Cheap to clone, safe to use from any thread.
#[derive(Clone)]
pub struct CompletionSink {
    tx: Sender<Completion>,
}

impl CompletionSink {
    /// Delivers a completion. Called from the entity's context, so this only
    /// moves the buffer into the channel.
    pub fn deliver(&self, completion: Completion) {
        let index = completion.buffer().index();
        if let Err(e) = self.tx.send(completion) {
            // The receiver is gone: the driver already shut down and the
            // buffer is dropped with the message.
            warn!(index, "completion dropped: {e}");
        } else {
            trace!(index, "completion delivered");
        }
    }

    pub fn done(&self, buffer: Buffer) {
        self.deliver(Completion::Done(buffer));
    }

    pub fn returned(&self, buffer: Buffer) {
        self.deliver(Completion::Returned(buffer));
    }

    pub fn failed(&self, buffer: Buffer, error: Error) {
        self.deliver(Completion::Failed { buffer, error });
    }
}

/// Waiting side of the channel, owned by the driving thread.
pub struct CompletionReceiver {
    rx: Receiver<Completion>,
}

impl CompletionReceiver {
    /// Blocks until the next completion arrives, or until `timeout` expires.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Completion> {
        match timeout {
            None => self.rx.recv().map_err(|e| closed(e.to_string())),
            Some(after) => match self.rx.recv_timeout(after) {
                Ok(completion) => Ok(completion),
                Err(ReceiveErrorTimeout::Timeout) => Err(Error::Timeout {
                    op: "wait completion",
                    after,
                }),
                Err(e) => Err(closed(e.to_string())),
            },
        }
    }

    /// Returns a completion if one is already queued.
    pub fn try_wait(&self) -> Result<Option<Completion>> {
        self.rx.try_recv().map_err(|e| closed(e.to_string()))
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

fn closed(message: String) -> Error {
    Error::firmware("wait completion", -1, format!("channel closed: {message}"))
}
