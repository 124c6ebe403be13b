// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Single-shot and continuous pipeline drivers.

use crate::{
    buffer::Buffer,
    completion::Completion,
    error::{Error, Result},
    pool::{BufferPool, BufferState},
    port::{BufferPort, Rejected},
    sequence::{Observation, SequenceMonitor},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// A pool paired with the port its buffers travel through.
pub struct Stage<P> {
    pool: BufferPool,
    port: P,
}

/// A buffer the entity handed back, now `Completed` in the pool.
#[derive(Debug)]
pub struct Completed {
    pub index: usize,
    pub latency: Duration,
    /// Set when the entity reported a failure for this buffer.
    pub error: Option<Error>,
}

impl<P: BufferPort> Stage<P> {
    pub fn new(pool: BufferPool, port: P) -> Self {
        Self { pool, port }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Submits buffer `index`. A buffer the port refuses goes straight back
    /// to `Free`.
    pub fn submit(&mut self, index: usize) -> Result<()> {
        let buffer = self.pool.submit(index)?;
        if let Err(Rejected { buffer, error }) = self.port.submit(buffer) {
            self.pool.reclaim(buffer)?;
            return Err(error);
        }
        Ok(())
    }

    /// Submits the lowest indexed free buffer and returns its index.
    pub fn submit_free(&mut self) -> Result<usize> {
        let index = self.pool.acquire_free()?.index();
        self.submit(index)?;
        Ok(index)
    }

    /// Submits every free buffer.
    pub fn prime(&mut self) -> Result<usize> {
        let mut submitted = 0;
        while self.pool.count(BufferState::Free) > 0 {
            self.submit_free()?;
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Blocks for the next completion and moves the buffer to `Completed`.
    /// Buffers returned unprocessed are reclaimed and the wait continues.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Completed> {
        loop {
            if self.port.outstanding() == 0 {
                return Err(Error::PoolExhausted {
                    pool: self.pool.name().to_string(),
                });
            }
            let (buffer, error) = match self.port.wait(timeout)? {
                Completion::Done(buffer) => (buffer, None),
                Completion::Failed { buffer, error } => (buffer, Some(error)),
                Completion::Returned(buffer) => {
                    debug!(pool = self.pool.name(), index = buffer.index(), "returned unprocessed");
                    self.pool.reclaim(buffer)?;
                    continue;
                }
            };
            let index = buffer.index();
            let latency = self.pool.complete(buffer)?;
            return Ok(Completed {
                index,
                latency,
                error,
            });
        }
    }

    pub fn release(&mut self, index: usize) -> Result<()> {
        self.pool.release(index)
    }

    /// Releases a completed buffer and submits it again.
    pub fn recycle(&mut self, index: usize) -> Result<()> {
        self.pool.release(index)?;
        self.submit(index)
    }

    /// Stops the port and reclaims every buffer it held.
    pub fn drain(&mut self) -> Result<usize> {
        let returned = self.port.stop()?;
        let count = returned.len();
        for buffer in returned {
            self.pool.reclaim(buffer)?;
        }
        let in_flight = self.pool.in_flight();
        if in_flight > 0 {
            warn!(pool = self.pool.name(), in_flight, "buffers still held after drain");
        }
        debug!(pool = self.pool.name(), count, "drained");
        Ok(count)
    }

    /// Drains, frees the pool and hands the buffers back to the entity.
    pub fn shutdown(mut self) -> Result<()> {
        self.drain()?;
        for index in 0..self.pool.len() {
            if self.pool.state(index) == Some(BufferState::Completed) {
                self.pool.release(index)?;
            }
        }
        let buffers = self.pool.teardown()?;
        self.port.destroy(buffers)
    }
}

/// Requests a running driver to stop after the current cycle.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Summary of a continuous run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub cycles: u64,
    pub dropped: u64,
    pub reorders: u64,
    pub processing_errors: u64,
    pub failed_completions: u64,
    pub stalls: u64,
    pub mean_latency: Duration,
    pub max_latency: Duration,
}

const DEFAULT_MAX_STALLS: u64 = 5;

/// Keeps the ring full: every completed buffer is processed, released and
/// submitted again.
pub struct PipelineDriver<P> {
    stage: Stage<P>,
    monitor: SequenceMonitor,
    frame_timeout: Option<Duration>,
    max_stalls: u64,
    stop: StopHandle,
}

impl<P: BufferPort> PipelineDriver<P> {
    pub fn new(stage: Stage<P>) -> Self {
        Self {
            stage,
            monitor: SequenceMonitor::new(),
            frame_timeout: None,
            max_stalls: DEFAULT_MAX_STALLS,
            stop: StopHandle::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: SequenceMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Wait at most `timeout` for each frame. An expired wait counts as a
    /// stall and the loop keeps going.
    pub fn with_frame_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Consecutive stalls that end the session.
    pub fn with_max_stalls(mut self, stalls: u64) -> Self {
        self.max_stalls = stalls.max(1);
        self
    }

    /// Shares `stop` with whoever else may end the run, e.g. a device
    /// that wakes from its wait on a signal.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stage(&self) -> &Stage<P> {
        &self.stage
    }

    pub fn monitor(&self) -> &SequenceMonitor {
        &self.monitor
    }

    pub fn shutdown(self) -> Result<()> {
        self.stage.shutdown()
    }

    /// Runs `cycles` completions, or until stopped when `None`.
    ///
    /// Every call is a new stream session: the ring is primed, the port
    /// started and the sequence monitor reset.
    ///
    /// `process` sees every successfully filled buffer together with the
    /// cycle number. Its failures are counted and the buffer is recycled
    /// anyway. Any entity failure other than a stall ends the session with
    /// [`Error::Session`] once every buffer has been reclaimed.
    #[instrument(skip_all, fields(port = self.stage.port.name()))]
    pub fn run<F>(&mut self, cycles: Option<u64>, mut process: F) -> Result<RunReport>
    where
        F: FnMut(u64, &Buffer) -> Result<()>,
    {
        let mut report = RunReport::default();

        let started = self.stage.prime().and_then(|primed| {
            self.stage.port.start()?;
            Ok(primed)
        });
        let primed = match started {
            Ok(primed) => primed,
            Err(e) => {
                self.stage.drain()?;
                return Err(e);
            }
        };
        // Devices restart their sequence counter on every stream on.
        self.monitor.reset();
        info!(primed, ?cycles, "ring started");

        let mut total_latency = Duration::ZERO;
        let mut consecutive_stalls = 0;
        while cycles.map_or(true, |n| report.cycles < n) && !self.stop.is_stopped() {
            let completed = match self.stage.wait(self.frame_timeout) {
                Ok(completed) => completed,
                Err(e) if e.is_timeout() && self.stop.is_stopped() => {
                    debug!(cycle = report.cycles, "wait interrupted by stop");
                    break;
                }
                Err(e) if e.is_timeout() && consecutive_stalls + 1 < self.max_stalls => {
                    consecutive_stalls += 1;
                    report.stalls += 1;
                    warn!(cycle = report.cycles, "stalled: {e}");
                    continue;
                }
                Err(e) => return Err(self.end_session(report.cycles, e)),
            };
            consecutive_stalls = 0;

            total_latency += completed.latency;
            report.max_latency = report.max_latency.max(completed.latency);

            if let Some(error) = completed.error {
                report.failed_completions += 1;
                warn!(cycle = report.cycles, index = completed.index, "completion failed: {error}");
            } else {
                let buffer = self.stage.pool.get(completed.index)?;
                if let Some(sequence) = buffer.sequence() {
                    match self.monitor.observe(u64::from(sequence)) {
                        Observation::Dropped(dropped) => report.dropped += dropped,
                        Observation::ReorderOrDuplicate { .. } => report.reorders += 1,
                        Observation::Seeded => {}
                    }
                }
                if let Err(e) = process(report.cycles, buffer) {
                    report.processing_errors += 1;
                    warn!(cycle = report.cycles, index = completed.index, "processing failed: {e}");
                }
            }
            report.cycles += 1;

            if let Err(e) = self.stage.recycle(completed.index) {
                return Err(self.end_session(report.cycles, e));
            }
        }

        self.stage.drain()?;
        if report.cycles > 0 {
            report.mean_latency =
                Duration::from_nanos((total_latency.as_nanos() / u128::from(report.cycles)) as u64);
        }
        info!(
            cycles = report.cycles,
            dropped = report.dropped,
            reorders = report.reorders,
            stalls = report.stalls,
            "ring stopped"
        );
        Ok(report)
    }

    fn end_session(&mut self, cycle: u64, source: Error) -> Error {
        warn!(cycle, "ending session: {source}");
        if let Err(e) = self.stage.drain() {
            warn!("drain after failure: {e}");
        }
        Error::Session {
            cycle,
            source: Box::new(source),
        }
    }
}

/// Outcome of a single-shot conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleShotReport {
    /// Valid bytes in the converted frame.
    pub output_len: usize,
    pub latency: Duration,
}

/// Pushes one frame through a processing entity.
///
/// The output buffer is queued first so the entity has somewhere to write
/// as soon as the input arrives. `fill` prepares the input buffer, `persist`
/// receives the completed output. Both pools are `Free` again on success.
#[instrument(skip_all, fields(input = input.port.name(), output = output.port.name()))]
pub fn run_single_shot<I, O, F, S>(
    input: &mut Stage<I>,
    output: &mut Stage<O>,
    timeout: Duration,
    fill: F,
    persist: S,
) -> Result<SingleShotReport>
where
    I: BufferPort,
    O: BufferPort,
    F: FnOnce(&mut Buffer) -> Result<()>,
    S: FnOnce(&Buffer) -> Result<()>,
{
    output.submit_free()?;

    let input_index = {
        let buffer = input.pool.acquire_free()?;
        let index = buffer.index();
        fill(buffer)?;
        index
    };
    input.submit(input_index)?;

    let converted = output.wait(Some(timeout)).map_err(|e| match e {
        Error::Timeout { after, .. } => Error::Timeout {
            op: "single-shot output",
            after,
        },
        e => e,
    })?;
    if let Some(error) = converted.error {
        output.release(converted.index)?;
        return Err(error);
    }

    let buffer = output.pool.get(converted.index)?;
    let report = SingleShotReport {
        output_len: buffer.len(),
        latency: converted.latency,
    };
    let persisted = persist(buffer);
    output.release(converted.index)?;
    persisted?;

    let consumed = input.wait(Some(timeout))?;
    input.release(consumed.index)?;
    if let Some(error) = consumed.error {
        return Err(error);
    }

    info!(bytes = report.output_len, latency = ?report.latency, "frame converted");
    Ok(report)
}
