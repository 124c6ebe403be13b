// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture devices driven with the poll discipline.
//!
//! [`CaptureDevice`] is the narrow interface to a kernel style capture queue
//! (open, negotiate, request, map, enqueue, dequeue, stream on/off).
//! [`CapturePort`] layers the ownership protocol on top: it parks every
//! enqueued [`Buffer`] until the device dequeues its index.

use crate::{
    buffer::{Buffer, BufferFlags, BufferMemory, BufferMeta, DmaRegion},
    completion::Completion,
    config::{CaptureConfig, MemoryMode},
    error::{Error, Result},
    format::FourCC,
    pool::BufferPool,
    port::{BufferPort, Discipline, Rejected},
};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use unix_ts::Timestamp;

/// Sensor controls a capture device may expose.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Control {
    Gain,
    Exposure,
    HorizontalFlip,
    VerticalFlip,
}

/// Format the device settled on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub width: u32,
    pub height: u32,
    pub format: FourCC,
    /// Bytes per frame as reported by the device.
    pub frame_size: usize,
}

/// A dequeued frame as reported by the device.
#[derive(Copy, Clone, Debug)]
pub struct FrameInfo {
    pub index: usize,
    pub sequence: u32,
    pub bytes_used: usize,
    pub flags: BufferFlags,
    pub timestamp: Option<Timestamp>,
}

/// Kernel capture queue operations.
pub trait CaptureDevice {
    fn name(&self) -> &str;

    fn set_control(&mut self, control: Control, value: i32) -> Result<()>;

    /// Fails with [`Error::FormatUnsupported`] when the device refuses the
    /// format.
    fn negotiate_format(&mut self, width: u32, height: u32, format: FourCC) -> Result<Negotiated>;

    /// Returns the number of buffers the device actually granted, which may
    /// differ from `count`. A count of zero frees the device's buffers.
    fn request_buffers(&mut self, count: usize, memory: MemoryMode) -> Result<usize>;

    /// Maps device owned memory for buffer `index`.
    fn map_buffer(&mut self, index: usize) -> Result<Buffer>;

    fn enqueue(&mut self, buffer: &Buffer) -> Result<()>;

    /// Blocks until a filled buffer is available and reports its real index.
    fn dequeue(&mut self, timeout: Option<Duration>) -> Result<FrameInfo>;

    fn start_stream(&mut self) -> Result<()>;

    /// Stops streaming. The device gives up every queued buffer.
    fn stop_stream(&mut self) -> Result<()>;
}

/// [`BufferPort`] over a [`CaptureDevice`].
pub struct CapturePort<D> {
    device: D,
    name: String,
    memory: MemoryMode,
    parked: Vec<Option<Buffer>>,
    streaming: bool,
}

impl<D: CaptureDevice> CapturePort<D> {
    /// Runs the capture setup sequence and returns the port with its pool.
    ///
    /// Every step is fail-fast: a refused format, a short buffer grant or a
    /// mapping failure ends setup before any buffer is submitted.
    #[instrument(skip_all, fields(device = device.name()))]
    pub fn open(mut device: D, config: &CaptureConfig) -> Result<(Self, BufferPool)> {
        for (control, value) in config.controls.iter() {
            device.set_control(control, value)?;
        }

        let negotiated =
            device.negotiate_format(config.width, config.height, config.pixel_format)?;
        if negotiated.width != config.width || negotiated.height != config.height {
            warn!(
                "requested {}x{} resolution but device set {}x{}",
                config.width, config.height, negotiated.width, negotiated.height
            );
        }

        let granted = device.request_buffers(config.buffer_count, config.memory)?;
        if granted < config.buffer_count {
            return Err(Error::ResourceExhausted {
                op: "request buffers",
                detail: format!("requested {} granted {granted}", config.buffer_count),
            });
        }

        let buffers = (0..config.buffer_count)
            .map(|index| match config.memory {
                MemoryMode::Mmap => device.map_buffer(index),
                MemoryMode::DmaBuf => Ok(Buffer::new(
                    index,
                    BufferMemory::Dma(DmaRegion::allocate(negotiated.frame_size)?),
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            width = negotiated.width,
            height = negotiated.height,
            format = %negotiated.format,
            frame_size = negotiated.frame_size,
            granted,
            "capture device ready"
        );

        let pool = BufferPool::create(format!("{} capture", device.name()), buffers)?;
        Ok((Self::new(device, config.buffer_count, config.memory), pool))
    }

    pub fn new(device: D, buffer_count: usize, memory: MemoryMode) -> Self {
        let name = device.name().to_string();
        Self {
            device,
            name,
            memory,
            parked: (0..buffer_count).map(|_| None).collect(),
            streaming: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

impl<D: CaptureDevice> BufferPort for CapturePort<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn discipline(&self) -> Discipline {
        Discipline::Poll
    }

    fn start(&mut self) -> Result<()> {
        if !self.streaming {
            self.device.start_stream()?;
            self.streaming = true;
            info!(device = %self.name, "stream on");
        }
        Ok(())
    }

    fn submit(&mut self, buffer: Buffer) -> Result<(), Rejected> {
        let index = buffer.index();
        match self.parked.get(index) {
            Some(None) => {}
            _ => {
                let error = Error::Device {
                    op: "enqueue",
                    code: libc::EINVAL,
                    message: format!("buffer {index} not queueable"),
                };
                return Err(Rejected { buffer, error });
            }
        }
        if let Err(error) = self.device.enqueue(&buffer) {
            return Err(Rejected { buffer, error });
        }
        self.parked[index] = Some(buffer);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Completion> {
        let frame = self.device.dequeue(timeout)?;
        let Some(mut buffer) = self.parked.get_mut(frame.index).and_then(Option::take) else {
            return Err(Error::Device {
                op: "dequeue",
                code: libc::EINVAL,
                message: format!(
                    "invalid buffer index {} (pool size {})",
                    frame.index,
                    self.parked.len()
                ),
            });
        };
        debug!(index = frame.index, sequence = frame.sequence, bytes = frame.bytes_used, "dequeued");

        let meta = BufferMeta {
            length: frame.bytes_used,
            sequence: Some(frame.sequence),
            flags: frame.flags,
            timestamp: frame.timestamp,
        };
        if let Err(error) = buffer.record_fill(meta) {
            return Ok(Completion::Failed { buffer, error });
        }
        if frame.flags.contains(BufferFlags::ERROR) {
            let error = Error::Device {
                op: "dequeue",
                code: libc::EIO,
                message: format!("device flagged buffer {} as corrupted", frame.index),
            };
            return Ok(Completion::Failed { buffer, error });
        }
        Ok(Completion::Done(buffer))
    }

    fn outstanding(&self) -> usize {
        self.parked.iter().filter(|b| b.is_some()).count()
    }

    fn stop(&mut self) -> Result<Vec<Buffer>> {
        if self.streaming {
            self.device.stop_stream()?;
            self.streaming = false;
            info!(device = %self.name, "stream off");
        }
        Ok(self.parked.iter_mut().filter_map(Option::take).collect())
    }

    fn destroy(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        // Mappings must be gone before the device frees its buffers.
        drop(buffers);
        self.device.request_buffers(0, self.memory)?;
        Ok(())
    }
}
