// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use edgefirst_bufring::{
    config::{CaptureConfig, ConvertConfig, MemoryMode, SensorControls},
    format::FourCC,
};
use std::path::PathBuf;

/// Which implementation of the external entities to drive.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Backend {
    /// V4L2 for capture, MMAL for conversion
    #[value(name = "hw")]
    Hardware,
    /// Simulated camera and ISP
    Sim,
}

/// Work done on every captured frame before it is recycled.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum WorkMode {
    /// Sum every 8th byte of the frame
    Checksum,
    /// Write each frame to `<output-dir>/%05d.raw`
    Save,
    /// Recycle the frame untouched
    Discard,
}

/// Command-line arguments for the EdgeFirst buffer ring tools.
///
/// Every option can also be given through the environment variable named
/// in its help text.
///
/// # Example
///
/// ```bash
/// # Capture 300 frames from the default camera
/// edgefirst-bufring capture
///
/// # Convert one Bayer frame to I420 through the firmware ISP
/// edgefirst-bufring convert frame.raw frame.yuv
///
/// # Same, without hardware
/// edgefirst-bufring --backend sim convert frame.raw frame.yuv
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Entity implementation (hw or sim)
    #[arg(long, env = "BACKEND", default_value = "hw", global = true)]
    pub backend: Backend,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY", global = true)]
    pub tracy: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Continuously capture frames through a ring of buffers
    Capture(CaptureArgs),
    /// Convert a single frame through an ISP component
    Convert(ConvertArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CaptureArgs {
    /// Camera capture device path
    #[arg(short, long, env = "DEVICE", default_value = "/dev/video0")]
    pub device: String,

    /// Capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAPTURE_SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Pixel format fourcc
    #[arg(long, env = "PIXEL_FORMAT", default_value = "pRCC")]
    pub format: FourCC,

    /// Number of buffers in the ring
    #[arg(short, long, env = "BUFFERS", default_value = "5")]
    pub buffers: usize,

    /// Frames to capture, 0 runs until interrupted
    #[arg(short, long, env = "CYCLES", default_value = "300")]
    pub cycles: u64,

    /// Buffer memory (mmap or dmabuf)
    #[arg(long, env = "MEMORY", default_value = "mmap")]
    pub memory: MemoryMode,

    /// Sensor analogue gain
    #[arg(long, env = "GAIN")]
    pub gain: Option<i32>,

    /// Sensor exposure
    #[arg(long, env = "EXPOSURE")]
    pub exposure: Option<i32>,

    /// Flip the sensor image horizontally
    #[arg(long, env = "HFLIP")]
    pub hflip: bool,

    /// Flip the sensor image vertically
    #[arg(long, env = "VFLIP")]
    pub vflip: bool,

    /// Milliseconds to wait for a frame before reporting a stall
    #[arg(long, env = "FRAME_TIMEOUT", default_value = "2000")]
    pub frame_timeout: u64,

    /// Single gap in frames reported as a starved pool
    #[arg(long, env = "STARVATION_THRESHOLD", default_value = "5")]
    pub starvation_threshold: u64,

    /// Per-frame work
    #[arg(long, env = "WORK", default_value = "checksum")]
    pub work: WorkMode,

    /// Directory for saved frames
    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Load the capture configuration from a JSON file instead of the flags
    #[arg(long, env = "CAPTURE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Raw input frame
    pub input: PathBuf,

    /// Converted output frame
    pub output: PathBuf,

    /// Frame resolution in pixels (width height)
    #[arg(
        long,
        env = "CONVERT_SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Input encoding fourcc
    #[arg(long, env = "INPUT_FORMAT", default_value = "RG12")]
    pub input_format: FourCC,

    /// Output encoding fourcc
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "I420")]
    pub output_format: FourCC,

    /// Firmware component name
    #[arg(long, env = "COMPONENT", default_value = "vc.ril.isp")]
    pub component: String,

    /// Milliseconds to wait for the converted frame
    #[arg(long, env = "CONVERT_TIMEOUT", default_value = "5000")]
    pub timeout: u64,
}

impl From<&CaptureArgs> for CaptureConfig {
    fn from(args: &CaptureArgs) -> Self {
        CaptureConfig {
            device_path: args.device.clone(),
            width: args.size[0],
            height: args.size[1],
            pixel_format: args.format,
            buffer_count: args.buffers,
            cycle_count: (args.cycles > 0).then_some(args.cycles),
            memory: args.memory,
            controls: SensorControls {
                gain: args.gain,
                exposure: args.exposure,
                hflip: args.hflip.then_some(true),
                vflip: args.vflip.then_some(true),
            },
            frame_timeout_ms: Some(args.frame_timeout),
            starvation_threshold: args.starvation_threshold,
        }
    }
}

impl From<&ConvertArgs> for ConvertConfig {
    fn from(args: &ConvertArgs) -> Self {
        ConvertConfig {
            component: args.component.clone(),
            width: args.size[0],
            height: args.size[1],
            input_format: args.input_format,
            output_format: args.output_format,
            timeout_ms: args.timeout,
        }
    }
}
