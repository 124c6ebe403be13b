// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_bufring::{
    capture::{CaptureDevice, CapturePort, Control, FrameInfo, Negotiated},
    config::{CaptureConfig, MemoryMode, SensorControls},
    driver::{PipelineDriver, Stage, StopHandle},
    format::{self, frame_size, FourCC},
    port::BufferPort,
    sim::SimCamera,
    Buffer, BufferState, Error,
};
use std::{error::Error as _, time::Duration};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn sim_config(buffers: usize, cycles: u64) -> CaptureConfig {
    CaptureConfig {
        width: WIDTH,
        height: HEIGHT,
        buffer_count: buffers,
        cycle_count: Some(cycles),
        frame_timeout_ms: Some(100),
        ..Default::default()
    }
}

fn open_driver(
    camera: SimCamera,
    config: &CaptureConfig,
) -> Result<PipelineDriver<CapturePort<SimCamera>>, Error> {
    let (port, pool) = CapturePort::open(camera, config)?;
    Ok(PipelineDriver::new(Stage::new(pool, port)).with_frame_timeout(config.frame_timeout()))
}

#[test]
fn test_continuous_capture() -> TestResult {
    let config = sim_config(5, 300);
    let camera = SimCamera::new("sim");
    let probe = camera.probe();
    let mut driver = open_driver(camera, &config)?;
    let expected_size = frame_size(WIDTH, HEIGHT, format::SRGGB12P).unwrap();

    let mut indices = Vec::new();
    let report = driver.run(config.cycle_count, |_, buffer| {
        assert!(buffer.index() < 5);
        assert_eq!(buffer.len(), expected_size);
        // Frames are written in place by the device side mapping.
        assert_eq!(buffer.data()[0], buffer.sequence().unwrap() as u8);
        indices.push(buffer.index());
        Ok(())
    })?;

    assert_eq!(report.cycles, 300);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.reorders, 0);
    assert_eq!(report.processing_errors, 0);
    assert!(report.max_latency >= report.mean_latency);
    assert!(indices.iter().enumerate().all(|(i, index)| *index == i % 5));

    let pool = driver.stage().pool();
    assert!(pool.all_free());
    assert_eq!(pool.count(BufferState::Submitted), 0);
    assert!(!driver.stage().port().is_streaming());
    assert_eq!(driver.stage().port().outstanding(), 0);

    assert_eq!(probe.dequeued(), 300);
    assert_eq!(probe.enqueued(), 305);
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_dropped_frames_counted() -> TestResult {
    let config = sim_config(3, 100);
    let mut driver = open_driver(SimCamera::new("sim").with_drop_every(10), &config)?;
    let report = driver.run(config.cycle_count, |_, _| Ok(()))?;

    // A number is skipped after every 10th frame; the last skip is never seen.
    assert_eq!(report.cycles, 100);
    assert_eq!(report.dropped, 9);
    assert_eq!(driver.monitor().total_dropped(), 9);
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_sequence_wrap_is_not_a_drop() -> TestResult {
    let config = sim_config(2, 10);
    let camera = SimCamera::new("sim").with_first_sequence(u32::MAX - 4);
    let mut driver = open_driver(camera, &config)?;
    let report = driver.run(config.cycle_count, |_, _| Ok(()))?;
    assert_eq!(report.dropped, 0);
    assert_eq!(report.reorders, 0);
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_short_grant_fails_before_submit() -> TestResult {
    let camera = SimCamera::new("sim").with_grant_limit(3);
    let probe = camera.probe();

    let Err(err) = CapturePort::open(camera, &sim_config(5, 300)) else {
        panic!("setup succeeded with 3 of 5 buffers");
    };
    assert!(matches!(err, Error::ResourceExhausted { .. }));
    assert_eq!(probe.enqueued(), 0);
    Ok(())
}

#[test]
fn test_format_unsupported() -> TestResult {
    let camera = SimCamera::new("sim").with_formats(&[format::YUYV]);
    let Err(err) = CapturePort::open(camera, &sim_config(5, 1)) else {
        panic!("setup succeeded with an unsupported format");
    };
    assert!(matches!(err, Error::FormatUnsupported { .. }));
    Ok(())
}

#[test]
fn test_resolution_clamped() -> TestResult {
    let camera = SimCamera::new("sim").with_max_resolution(32, 16);
    let (_port, pool) = CapturePort::open(camera, &sim_config(2, 1))?;
    assert_eq!(
        pool.buffer_size(),
        frame_size(32, 16, format::SRGGB12P).unwrap()
    );
    Ok(())
}

#[test]
fn test_controls_applied() -> TestResult {
    let camera = SimCamera::new("sim");
    let probe = camera.probe();
    let config = CaptureConfig {
        controls: SensorControls {
            gain: Some(4),
            hflip: Some(true),
            ..Default::default()
        },
        ..sim_config(2, 1)
    };
    let _ = CapturePort::open(camera, &config)?;
    assert_eq!(
        probe.controls(),
        vec![(Control::Gain, 4), (Control::HorizontalFlip, 1)]
    );
    Ok(())
}

#[test]
fn test_dequeue_failure_ends_session() -> TestResult {
    let config = sim_config(5, 300);
    let mut driver = open_driver(SimCamera::new("sim").with_fail_after(20), &config)?;

    let err = driver.run(config.cycle_count, |_, _| Ok(())).unwrap_err();
    let Error::Session { cycle, source } = &err else {
        panic!("expected a session error, got {err}");
    };
    assert_eq!(*cycle, 20);
    assert!(matches!(
        **source,
        Error::Device {
            op: "dequeue",
            code: libc::EIO,
            ..
        }
    ));
    assert!(err.source().is_some());

    // Every in-flight buffer was reclaimed before the error surfaced.
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_processing_failure_recycles() -> TestResult {
    let config = sim_config(3, 10);
    let mut driver = open_driver(SimCamera::new("sim"), &config)?;
    let report = driver.run(config.cycle_count, |cycle, _| {
        if cycle % 2 == 0 {
            Err(Error::Config("rejected by test".into()))
        } else {
            Ok(())
        }
    })?;
    assert_eq!(report.cycles, 10);
    assert_eq!(report.processing_errors, 5);
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_stop_handle() -> TestResult {
    let config = sim_config(4, 0);
    let mut driver = open_driver(SimCamera::new("sim"), &config)?;
    let stop = driver.stop_handle();
    let report = driver.run(None, |cycle, _| {
        if cycle == 9 {
            stop.stop();
        }
        Ok(())
    })?;
    assert_eq!(report.cycles, 10);
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_teardown_refused_while_streaming() -> TestResult {
    let config = sim_config(2, 1);
    let (port, pool) = CapturePort::open(SimCamera::new("sim"), &config)?;
    let mut stage = Stage::new(pool, port);
    stage.prime()?;

    let err = stage.pool_mut().teardown().unwrap_err();
    assert!(matches!(err, Error::ResourceBusy { in_flight: 2, .. }));

    stage.shutdown()?;
    Ok(())
}

#[test]
fn test_sequence_restart_between_runs() -> TestResult {
    let config = sim_config(3, 50);
    let camera = SimCamera::new("sim")
        .with_sequence_restart()
        .with_drop_every(10);
    let mut driver = open_driver(camera, &config)?;

    let first = driver.run(config.cycle_count, |_, _| Ok(()))?;
    assert_eq!(first.dropped, 4);
    assert_eq!(first.reorders, 0);

    // The counter starts over at 0; only the gaps of this session count.
    let second = driver.run(Some(30), |_, _| Ok(()))?;
    assert_eq!(second.cycles, 30);
    assert_eq!(second.reorders, 0);
    assert_eq!(second.dropped, 2);
    assert_eq!(driver.monitor().total_dropped(), 2);
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

/// Misbehaves on one chosen dequeue, otherwise defers to the camera.
struct FaultyCamera {
    inner: SimCamera,
    dequeued: u64,
    fault_at: u64,
    fault: Fault,
}

enum Fault {
    /// Reports an index outside the pool.
    Index(usize),
    /// Reports a wait cut short by a signal after a stop was requested.
    Interrupted(StopHandle),
}

impl CaptureDevice for FaultyCamera {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_control(&mut self, control: Control, value: i32) -> Result<(), Error> {
        self.inner.set_control(control, value)
    }

    fn negotiate_format(
        &mut self,
        width: u32,
        height: u32,
        format: FourCC,
    ) -> Result<Negotiated, Error> {
        self.inner.negotiate_format(width, height, format)
    }

    fn request_buffers(&mut self, count: usize, memory: MemoryMode) -> Result<usize, Error> {
        self.inner.request_buffers(count, memory)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Buffer, Error> {
        self.inner.map_buffer(index)
    }

    fn enqueue(&mut self, buffer: &Buffer) -> Result<(), Error> {
        self.inner.enqueue(buffer)
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> Result<FrameInfo, Error> {
        if self.dequeued == self.fault_at {
            self.dequeued += 1;
            match &self.fault {
                Fault::Index(index) => {
                    let frame = self.inner.dequeue(timeout)?;
                    return Ok(FrameInfo {
                        index: *index,
                        ..frame
                    });
                }
                Fault::Interrupted(stop) => {
                    stop.stop();
                    return Err(Error::Timeout {
                        op: "dequeue",
                        after: Duration::ZERO,
                    });
                }
            }
        }
        self.dequeued += 1;
        self.inner.dequeue(timeout)
    }

    fn start_stream(&mut self) -> Result<(), Error> {
        self.inner.start_stream()
    }

    fn stop_stream(&mut self) -> Result<(), Error> {
        self.inner.stop_stream()
    }
}

#[test]
fn test_out_of_range_index_ends_session() -> TestResult {
    let config = sim_config(5, 300);
    let camera = FaultyCamera {
        inner: SimCamera::new("sim"),
        dequeued: 0,
        fault_at: 12,
        fault: Fault::Index(7),
    };
    let (port, pool) = CapturePort::open(camera, &config)?;
    let mut driver = PipelineDriver::new(Stage::new(pool, port));

    let mut indices = Vec::new();
    let err = driver
        .run(config.cycle_count, |_, buffer| {
            indices.push(buffer.index());
            Ok(())
        })
        .unwrap_err();
    let Error::Session { cycle, source } = &err else {
        panic!("expected a session error, got {err}");
    };
    assert_eq!(*cycle, 12);
    assert!(matches!(
        **source,
        Error::Device {
            op: "dequeue",
            code: libc::EINVAL,
            ..
        }
    ));
    assert!(indices.iter().all(|index| *index < 5));

    // The buffer behind the bogus index is reclaimed by the drain.
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

#[test]
fn test_interrupted_wait_stops_cleanly() -> TestResult {
    let config = CaptureConfig {
        frame_timeout_ms: None,
        ..sim_config(3, 0)
    };
    let stop = StopHandle::new();
    let camera = FaultyCamera {
        inner: SimCamera::new("sim"),
        dequeued: 0,
        fault_at: 6,
        fault: Fault::Interrupted(stop.clone()),
    };
    let (port, pool) = CapturePort::open(camera, &config)?;
    let mut driver = PipelineDriver::new(Stage::new(pool, port))
        .with_stop_handle(stop)
        .with_max_stalls(1);

    // A wait cut short after a stop request is not a stall.
    let report = driver.run(None, |_, _| Ok(()))?;
    assert_eq!(report.cycles, 6);
    assert_eq!(report.stalls, 0);
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}
