// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Buffer Ring
//!
//! This library moves frame buffers between the application and an external
//! producer or consumer (a V4L2 capture driver, a VideoCore MMAL component)
//! without copying them. A fixed pool of buffers cycles through a strict
//! ownership protocol so that the CPU and the device never touch the same
//! memory at the same time.
//!
//! ## Features
//!
//! - **Ownership Tracking**: Every buffer is `Free`, `Submitted` or
//!   `Completed`; illegal transitions are reported, never silently ignored.
//! - **Two Completion Disciplines**: Kernel queues are polled with a blocking
//!   dequeue, firmware ports call back from their own thread. Both sit behind
//!   [`port::BufferPort`].
//! - **Zero-Copy Memory**: Driver mapped `MMAP` buffers, CMA `DMABUF`
//!   allocations or firmware owned payloads.
//! - **Drop Detection**: Sequence numbers are checked with wraparound aware
//!   serial arithmetic.
//! - **Simulation**: [`sim`] provides a camera and an ISP that follow the
//!   same contracts, for tests and development hosts.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_bufring::{
//!     capture::CapturePort, config::CaptureConfig, driver::{PipelineDriver, Stage},
//!     v4l2::V4l2Device,
//! };
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaptureConfig::default();
//! let device = V4l2Device::open(Path::new(&config.device_path))?;
//! let (port, pool) = CapturePort::open(device, &config)?;
//!
//! let mut driver = PipelineDriver::new(Stage::new(pool, port));
//! let report = driver.run(config.cycle_count, |cycle, buffer| {
//!     println!("frame {cycle}: {} bytes", buffer.len());
//!     Ok(())
//! })?;
//! println!("dropped {} frames", report.dropped);
//! driver.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Device memory is reached through `mmap` and MMAL buffer headers. The
//! library's unsafe code lives in [`buffer`], [`v4l2`], [`mmal`] and [`sim`]
//! (memfd backed buffers); the binary only uses it to install its signal
//! handlers. The [`buffer::Buffer`] value is the ownership token that keeps
//! accesses apart.

pub mod buffer;
pub mod capture;
pub mod completion;
pub mod config;
pub mod driver;
pub mod error;
pub mod firmware;
pub mod format;
pub mod io;
pub mod mmal;
pub mod pool;
pub mod port;
pub mod sequence;
pub mod sim;
pub mod v4l2;

pub use buffer::{Buffer, BufferFlags, BufferMemory, BufferMeta};
pub use error::{Error, Result};
pub use format::FourCC;
pub use pool::{BufferPool, BufferState};
