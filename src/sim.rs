// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated external entities.
//!
//! [`SimCamera`] behaves like a V4L2 capture queue backed by memfd buffers
//! that both the "device" and the application map, so frames are written in
//! place exactly as a DMA engine would. [`SimIsp`] runs a converter on its
//! own thread and completes buffers through the callback discipline.

use crate::{
    buffer::{Buffer, BufferFlags, BufferMemory, MappedRegion},
    capture::{CaptureDevice, Control, FrameInfo, Negotiated},
    completion::CompletionSink,
    config::MemoryMode,
    error::{Error, Result},
    firmware::{FirmwarePort, PortDirection, PortFormat},
    format::{self, FourCC},
    port::Rejected,
};
use std::{
    collections::VecDeque,
    io,
    os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, trace, warn};
use unix_ts::Timestamp;

fn now() -> Option<Timestamp> {
    let since = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    Some(Timestamp::new(since.as_secs() as i64, since.subsec_nanos()))
}

fn einval(op: &'static str, message: impl Into<String>) -> Error {
    Error::Device {
        op,
        code: libc::EINVAL,
        message: message.into(),
    }
}

fn memfd(len: usize) -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::memfd_create(
            b"sim-camera\0".as_ptr().cast::<libc::c_char>(),
            libc::MFD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let len = libc::off_t::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer too large"))?;
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Counters shared with a [`SimCamera`], readable after the camera has been
/// moved into a port or dropped by a failed setup.
#[derive(Clone, Debug, Default)]
pub struct SimProbe {
    enqueued: Arc<AtomicU64>,
    dequeued: Arc<AtomicU64>,
    controls: Arc<Mutex<Vec<(Control, i32)>>>,
}

impl SimProbe {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Controls applied so far, in order.
    pub fn controls(&self) -> Vec<(Control, i32)> {
        self.controls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

struct Slot {
    /// Device side view of the buffer memory.
    region: Option<MappedRegion>,
    fd: Option<OwnedFd>,
    queued: bool,
}

/// A capture queue that produces a test pattern.
pub struct SimCamera {
    name: String,
    formats: Vec<FourCC>,
    max_resolution: (u32, u32),
    grant_limit: usize,
    drop_every: Option<u32>,
    fail_after: Option<u64>,
    frame_interval: Duration,
    first_sequence: u32,
    restart_sequence: bool,
    negotiated: Option<Negotiated>,
    memory: MemoryMode,
    slots: Vec<Slot>,
    queue: VecDeque<usize>,
    streaming: bool,
    sequence: u32,
    produced: u64,
    probe: SimProbe,
}

impl SimCamera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formats: vec![
                format::SRGGB12P,
                format::SRGGB10P,
                format::YUYV,
                format::NV12,
            ],
            max_resolution: (4096, 4096),
            grant_limit: 32,
            drop_every: None,
            fail_after: None,
            frame_interval: Duration::ZERO,
            first_sequence: 0,
            restart_sequence: false,
            negotiated: None,
            memory: MemoryMode::Mmap,
            slots: Vec::new(),
            queue: VecDeque::new(),
            streaming: false,
            sequence: 0,
            produced: 0,
            probe: SimProbe::default(),
        }
    }

    pub fn with_formats(mut self, formats: &[FourCC]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Larger requests are clamped, like a sensor with a fixed mode list.
    pub fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_resolution = (width, height);
        self
    }

    /// Grants at most `count` buffers.
    pub fn with_grant_limit(mut self, count: usize) -> Self {
        self.grant_limit = count;
        self
    }

    /// Skips one sequence number after every `frames` frames.
    pub fn with_drop_every(mut self, frames: u32) -> Self {
        self.drop_every = Some(frames.max(1));
        self
    }

    /// Fails every dequeue after `frames` frames.
    pub fn with_fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Starts the sequence counter at `sequence`, e.g. to cross a wrap.
    pub fn with_first_sequence(mut self, sequence: u32) -> Self {
        self.first_sequence = sequence;
        self.sequence = sequence;
        self
    }

    /// Restarts the sequence counter at every stream on, as V4L2 drivers do.
    pub fn with_sequence_restart(mut self) -> Self {
        self.restart_sequence = true;
        self
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn frame_size(&self) -> Result<usize> {
        self.negotiated
            .map(|n| n.frame_size)
            .ok_or_else(|| einval("request buffers", "format not set"))
    }

    fn produce(&mut self, index: usize) -> Result<FrameInfo> {
        let frame_size = self.frame_size()?;
        let sequence = self.sequence;
        let slot = &mut self.slots[index];
        slot.queued = false;
        let region = slot
            .region
            .as_mut()
            .ok_or_else(|| einval("dequeue", format!("buffer {index} has no memory")))?;

        let data = region.as_slice_mut();
        let seed = sequence as u8;
        for (i, byte) in data.iter_mut().enumerate().take(frame_size) {
            *byte = seed.wrapping_add(i as u8);
        }

        self.produced += 1;
        self.sequence = self.sequence.wrapping_add(1);
        if let Some(every) = self.drop_every {
            if self.produced % u64::from(every) == 0 {
                self.sequence = self.sequence.wrapping_add(1);
            }
        }

        Ok(FrameInfo {
            index,
            sequence,
            bytes_used: frame_size,
            flags: BufferFlags::NONE,
            timestamp: now(),
        })
    }
}

impl CaptureDevice for SimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_control(&mut self, control: Control, value: i32) -> Result<()> {
        debug!(?control, value, "control set");
        if let Ok(mut controls) = self.probe.controls.lock() {
            controls.push((control, value));
        }
        Ok(())
    }

    fn negotiate_format(&mut self, width: u32, height: u32, format: FourCC) -> Result<Negotiated> {
        if !self.formats.contains(&format) {
            return Err(Error::FormatUnsupported {
                op: "set format",
                detail: format!("{} does not support {format}", self.name),
            });
        }
        let width = width.min(self.max_resolution.0);
        let height = height.min(self.max_resolution.1);
        let frame_size = format::frame_size(width, height, format).ok_or_else(|| {
            Error::FormatUnsupported {
                op: "set format",
                detail: format!("unknown frame size for {format}"),
            }
        })?;
        let negotiated = Negotiated {
            width,
            height,
            format,
            frame_size,
        };
        self.negotiated = Some(negotiated);
        Ok(negotiated)
    }

    fn request_buffers(&mut self, count: usize, memory: MemoryMode) -> Result<usize> {
        if self.streaming {
            return Err(Error::Device {
                op: "request buffers",
                code: libc::EBUSY,
                message: "device is streaming".into(),
            });
        }
        self.queue.clear();
        self.slots.clear();
        if count == 0 {
            debug!(device = %self.name, "buffers freed");
            return Ok(0);
        }

        let frame_size = self.frame_size()?;
        let granted = count.min(self.grant_limit);
        for _ in 0..granted {
            let slot = match memory {
                MemoryMode::Mmap => {
                    let fd = memfd(frame_size).map_err(|e| Error::device("request buffers", e))?;
                    let region = MappedRegion::map(fd.as_fd(), frame_size, 0)
                        .map_err(|e| Error::device("request buffers", e))?;
                    Slot {
                        region: Some(region),
                        fd: Some(fd),
                        queued: false,
                    }
                }
                MemoryMode::DmaBuf => Slot {
                    region: None,
                    fd: None,
                    queued: false,
                },
            };
            self.slots.push(slot);
        }
        self.memory = memory;
        debug!(device = %self.name, count, granted, ?memory, "buffers requested");
        Ok(granted)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Buffer> {
        let frame_size = self.frame_size()?;
        let fd = self
            .slots
            .get(index)
            .and_then(|slot| slot.fd.as_ref())
            .ok_or_else(|| einval("query buffer", format!("no mappable buffer {index}")))?;
        let region = MappedRegion::map(fd.as_fd(), frame_size, 0)
            .map_err(|e| Error::device("mmap", e))?;
        Ok(Buffer::new(index, BufferMemory::Mapped(region)))
    }

    fn enqueue(&mut self, buffer: &Buffer) -> Result<()> {
        let index = buffer.index();
        let frame_size = self.frame_size()?;
        let memory = self.memory;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| einval("enqueue", format!("invalid buffer index {index}")))?;
        if slot.queued {
            return Err(einval("enqueue", format!("buffer {index} already queued")));
        }
        if memory == MemoryMode::DmaBuf && slot.region.is_none() {
            let fd = buffer
                .memory()
                .dma_fd()
                .ok_or_else(|| einval("enqueue", format!("buffer {index} has no dma fd")))?;
            let region =
                MappedRegion::map(fd, frame_size, 0).map_err(|e| Error::device("enqueue", e))?;
            slot.region = Some(region);
        }
        slot.queued = true;
        self.queue.push_back(index);
        self.probe.enqueued.fetch_add(1, Ordering::Relaxed);
        trace!(index, "enqueued");
        Ok(())
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> Result<FrameInfo> {
        if !self.streaming {
            return Err(einval("dequeue", "device is not streaming"));
        }
        if self.fail_after.is_some_and(|n| self.produced >= n) {
            return Err(Error::Device {
                op: "dequeue",
                code: libc::EIO,
                message: "simulated device failure".into(),
            });
        }
        let Some(index) = self.queue.pop_front() else {
            let after = timeout.unwrap_or_default();
            thread::sleep(after);
            return Err(Error::Timeout {
                op: "dequeue",
                after,
            });
        };
        if !self.frame_interval.is_zero() {
            thread::sleep(self.frame_interval);
        }
        let frame = self.produce(index)?;
        self.probe.dequeued.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    fn start_stream(&mut self) -> Result<()> {
        if self.slots.is_empty() {
            return Err(einval("stream on", "no buffers requested"));
        }
        if self.restart_sequence {
            self.sequence = self.first_sequence;
            self.produced = 0;
        }
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        for index in self.queue.drain(..) {
            self.slots[index].queued = false;
        }
        Ok(())
    }
}

enum Job {
    Enable(PortDirection, CompletionSink),
    Buffer(PortDirection, Buffer),
    Disable(PortDirection),
}

fn slot_of(direction: PortDirection) -> usize {
    match direction {
        PortDirection::Input => 0,
        PortDirection::Output => 1,
    }
}

/// A converter component with one input and one output port.
///
/// Each input frame is paired with the next queued output buffer. The output
/// is filled by repeating the input bytes, stamped with the input timestamp
/// and flagged as a complete frame. Both buffers complete through their
/// port's sink from the worker thread.
pub struct SimIsp {
    name: String,
    latency: Duration,
    pool_limit: usize,
}

impl SimIsp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            pool_limit: 16,
        }
    }

    /// Processing time per frame.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Maximum buffers created per port.
    pub fn with_pool_limit(mut self, count: usize) -> Self {
        self.pool_limit = count;
        self
    }

    /// Starts the worker and returns the input and output ports. The worker
    /// exits once both ports are dropped.
    pub fn spawn(self) -> Result<(SimIspPort, SimIspPort)> {
        let (tx, rx) = mpsc::channel();
        let latency = self.latency;
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || isp_worker(rx, latency))
            .map_err(|e| Error::device("spawn isp", e))?;
        info!(component = %self.name, "simulated isp started");

        let port = |direction| SimIspPort {
            name: self.name.clone(),
            direction,
            pool_limit: self.pool_limit,
            enabled: false,
            jobs: tx.clone(),
        };
        Ok((port(PortDirection::Input), port(PortDirection::Output)))
    }
}

fn isp_worker(jobs: Receiver<Job>, latency: Duration) {
    let mut sinks: [Option<CompletionSink>; 2] = [None, None];
    let mut queues: [VecDeque<Buffer>; 2] = [VecDeque::new(), VecDeque::new()];

    while let Ok(job) = jobs.recv() {
        match job {
            Job::Enable(direction, sink) => sinks[slot_of(direction)] = Some(sink),
            Job::Disable(direction) => {
                let slot = slot_of(direction);
                if let Some(sink) = sinks[slot].take() {
                    for buffer in queues[slot].drain(..) {
                        sink.returned(buffer);
                    }
                }
            }
            Job::Buffer(direction, buffer) => queues[slot_of(direction)].push_back(buffer),
        }

        while !queues[0].is_empty() && !queues[1].is_empty() {
            let (Some(input), Some(mut output)) = (queues[0].pop_front(), queues[1].pop_front())
            else {
                break;
            };
            let (Some(input_sink), Some(output_sink)) = (&sinks[0], &sinks[1]) else {
                warn!("pair formed on a disabled port, returning unprocessed");
                for (slot, buffer) in [(0, input), (1, output)] {
                    match &sinks[slot] {
                        Some(sink) => sink.returned(buffer),
                        None => error!(index = buffer.index(), "no sink to return buffer to"),
                    }
                }
                continue;
            };
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            match convert(&input, &mut output) {
                Ok(()) => output_sink.done(output),
                Err(e) => output_sink.failed(output, e),
            }
            input_sink.done(input);
        }
    }
    debug!("simulated isp stopped");
}

fn convert(input: &Buffer, output: &mut Buffer) -> Result<()> {
    let capacity = output.capacity();
    let src = input.data();
    let dst = output.data_mut();
    if src.is_empty() {
        dst.fill(0);
    } else {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = src[i % src.len()];
        }
    }
    output.set_length(capacity)?;
    output.set_flags(BufferFlags::FRAME_END);
    output.set_timestamp(input.timestamp());
    Ok(())
}

/// One port of a [`SimIsp`].
pub struct SimIspPort {
    name: String,
    direction: PortDirection,
    pool_limit: usize,
    enabled: bool,
    jobs: Sender<Job>,
}

impl SimIspPort {
    fn post(&self, job: Job, op: &'static str) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::firmware(op, -1, "isp worker stopped"))
    }
}

impl FirmwarePort for SimIspPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> PortDirection {
        self.direction
    }

    fn configure(&mut self, format: &PortFormat, buffer_count: usize) -> Result<usize> {
        let size = format::frame_size(format.width, format.height, format.encoding).ok_or_else(
            || Error::FormatUnsupported {
                op: "port format commit",
                detail: format!("{} port cannot carry {}", self.direction, format.encoding),
            },
        )?;
        debug!(direction = %self.direction, buffer_count, size, "port configured");
        Ok(size)
    }

    fn create_pool(&mut self, count: usize, size: usize) -> Result<Vec<Buffer>> {
        let granted = count.min(self.pool_limit);
        if granted < count {
            warn!(direction = %self.direction, count, granted, "pool limited");
        }
        Ok((0..granted)
            .map(|i| Buffer::new(i, BufferMemory::heap(size)))
            .collect())
    }

    fn enable(&mut self, sink: CompletionSink) -> Result<()> {
        self.post(Job::Enable(self.direction, sink), "port enable")?;
        self.enabled = true;
        Ok(())
    }

    fn send(&mut self, buffer: Buffer) -> Result<(), Rejected> {
        if !self.enabled {
            let error = Error::firmware("send buffer", libc::EINVAL, "port not enabled");
            return Err(Rejected { buffer, error });
        }
        if let Err(mpsc::SendError(Job::Buffer(_, buffer))) =
            self.jobs.send(Job::Buffer(self.direction, buffer))
        {
            let error = Error::firmware("send buffer", -1, "isp worker stopped");
            return Err(Rejected { buffer, error });
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        if self.enabled {
            self.enabled = false;
            self.post(Job::Disable(self.direction), "port disable")?;
        }
        Ok(())
    }

    fn destroy_pool(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        debug!(direction = %self.direction, count = buffers.len(), "pool destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{completion_channel, Completion};

    #[test]
    fn pair_without_input_sink_is_returned() {
        let (jobs, rx) = mpsc::channel();
        let worker = thread::spawn(move || isp_worker(rx, Duration::ZERO));
        let (sink, receiver) = completion_channel(2);

        jobs.send(Job::Enable(PortDirection::Output, sink)).unwrap();
        jobs.send(Job::Buffer(PortDirection::Input, Buffer::new(0, BufferMemory::heap(8))))
            .unwrap();
        jobs.send(Job::Buffer(PortDirection::Output, Buffer::new(3, BufferMemory::heap(8))))
            .unwrap();

        match receiver.wait(Some(Duration::from_secs(1))).unwrap() {
            Completion::Returned(buffer) => assert_eq!(buffer.index(), 3),
            other => panic!("expected the output buffer back, got {other:?}"),
        }
        drop(jobs);
        worker.join().unwrap();
    }
}
