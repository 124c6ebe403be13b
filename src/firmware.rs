// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Firmware ports driven with the callback discipline.
//!
//! A [`FirmwarePort`] is one input or output port of a processing component.
//! Completed buffers are delivered from the firmware's own thread through a
//! [`CompletionSink`]; [`CallbackPort`] owns the matching receiver and keeps
//! count of what is still in flight.

use crate::{
    buffer::Buffer,
    completion::{completion_channel, Completion, CompletionReceiver, CompletionSink},
    error::{Error, Result},
    format::FourCC,
    pool::BufferPool,
    port::{BufferPort, Discipline, Rejected},
};
use std::{fmt, time::Duration};
use tracing::{error, info, instrument, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Elementary stream format committed on a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortFormat {
    pub encoding: FourCC,
    pub width: u32,
    pub height: u32,
}

/// One port of a firmware processing component.
pub trait FirmwarePort {
    fn name(&self) -> &str;

    fn direction(&self) -> PortDirection;

    /// Commits `format` and the buffer count. Returns the buffer size the
    /// firmware asks for.
    fn configure(&mut self, format: &PortFormat, buffer_count: usize) -> Result<usize>;

    /// Creates `count` buffers of `size` bytes indexed `0..count`. The
    /// firmware may provide fewer than asked.
    fn create_pool(&mut self, count: usize, size: usize) -> Result<Vec<Buffer>>;

    /// Enables the port. Every buffer sent afterwards comes back through
    /// `sink`, including the ones still held when the port is disabled.
    fn enable(&mut self, sink: CompletionSink) -> Result<()>;

    fn send(&mut self, buffer: Buffer) -> Result<(), Rejected>;

    fn disable(&mut self) -> Result<()>;

    fn destroy_pool(&mut self, buffers: Vec<Buffer>) -> Result<()>;
}

/// [`BufferPort`] over a [`FirmwarePort`].
pub struct CallbackPort<P: FirmwarePort> {
    port: P,
    receiver: CompletionReceiver,
    outstanding: usize,
    enabled: bool,
    drain_timeout: Duration,
}

impl<P: FirmwarePort> CallbackPort<P> {
    /// Configures the port, creates its pool and enables it.
    #[instrument(skip_all, fields(port = port.name(), direction = %port.direction()))]
    pub fn open(mut port: P, format: &PortFormat, buffer_count: usize) -> Result<(Self, BufferPool)> {
        let size = port.configure(format, buffer_count)?;

        let buffers = port.create_pool(buffer_count, size)?;
        if buffers.len() < buffer_count {
            let granted = buffers.len();
            port.destroy_pool(buffers)?;
            return Err(Error::ResourceExhausted {
                op: "create pool",
                detail: format!("requested {buffer_count} buffers granted {granted}"),
            });
        }

        let mut pool = BufferPool::create(format!("{} {}", port.name(), port.direction()), buffers)?;

        let (sink, receiver) = completion_channel(buffer_count);
        if let Err(e) = port.enable(sink) {
            port.destroy_pool(pool.teardown()?)?;
            return Err(e);
        }
        info!(
            encoding = %format.encoding,
            width = format.width,
            height = format.height,
            buffer_count,
            size,
            "port enabled"
        );

        Ok((
            Self {
                port,
                receiver,
                outstanding: 0,
                enabled: true,
                drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            },
            pool,
        ))
    }

    /// How long [`BufferPort::stop`] waits for each held buffer to come back.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl<P: FirmwarePort> BufferPort for CallbackPort<P> {
    fn name(&self) -> &str {
        self.port.name()
    }

    fn discipline(&self) -> Discipline {
        Discipline::Callback
    }

    fn submit(&mut self, buffer: Buffer) -> Result<(), Rejected> {
        if !self.enabled {
            let error = Error::firmware(
                "send buffer",
                libc::EINVAL,
                format!("port {} is disabled", self.port.name()),
            );
            return Err(Rejected { buffer, error });
        }
        self.port.send(buffer)?;
        self.outstanding += 1;
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Completion> {
        let completion = self.receiver.wait(timeout)?;
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(completion)
    }

    fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn stop(&mut self) -> Result<Vec<Buffer>> {
        if self.enabled {
            self.port.disable()?;
            self.enabled = false;
            info!(port = self.port.name(), "port disabled");
        }

        let mut returned = Vec::with_capacity(self.outstanding);
        while self.outstanding > 0 {
            match self.receiver.wait(Some(self.drain_timeout)) {
                Ok(completion) => {
                    self.outstanding -= 1;
                    returned.push(completion.into_buffer());
                }
                Err(e) => {
                    error!(
                        port = self.port.name(),
                        outstanding = self.outstanding,
                        "buffers not returned after disable: {e}"
                    );
                    break;
                }
            }
        }
        Ok(returned)
    }

    fn destroy(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        self.port.destroy_pool(buffers)
    }
}

impl<P: FirmwarePort> Drop for CallbackPort<P> {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = self.port.disable() {
                warn!(port = self.port.name(), "disable on drop failed: {e}");
            }
        }
    }
}
