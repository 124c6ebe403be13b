// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, Backend, CaptureArgs, Command, ConvertArgs, WorkMode};
use clap::Parser;
use edgefirst_bufring::{
    buffer::BufferFlags,
    capture::{CaptureDevice, CapturePort},
    config::{CaptureConfig, ConvertConfig},
    driver::{run_single_shot, PipelineDriver, RunReport, Stage, StopHandle},
    firmware::{CallbackPort, FirmwarePort, PortFormat},
    io, mmal,
    sequence::SequenceMonitor,
    sim::{SimCamera, SimIsp},
    v4l2::V4l2Device,
    Buffer, Result,
};
use std::{
    error::Error as _,
    path::Path,
    process::ExitCode,
    sync::OnceLock,
    time::Duration,
};
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};
use unix_ts::Timestamp;

/// Presentation timestamp stamped on converted input frames, in
/// microseconds.
const CONVERT_PTS_US: u32 = 37;

static STOP: OnceLock<StopHandle> = OnceLock::new();

extern "C" fn on_signal(_: libc::c_int) {
    if let Some(stop) = STOP.get() {
        stop.stop();
    }
}

/// Stops the ring after the current frame on SIGINT or SIGTERM.
fn install_stop_handler(stop: StopHandle) {
    if STOP.set(stop).is_ok() {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let journald = match tracing_journald::layer() {
        Ok(layer) => Some(layer.with_filter(level)),
        Err(_) => None,
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout)
        .with(journald)
        .with(tracy);

    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge not installed: {e}");
    }
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("logging not installed: {e}");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let result = match &args.command {
        Command::Capture(capture_args) => capture(args.backend, capture_args),
        Command::Convert(convert_args) => convert(args.backend, convert_args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("ERROR: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn capture(backend: Backend, args: &CaptureArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::from(args),
    };
    config.validate()?;
    info!(
        device = %config.device_path,
        width = config.width,
        height = config.height,
        format = %config.pixel_format,
        buffers = config.buffer_count,
        cycles = ?config.cycle_count,
        memory = ?config.memory,
        "starting capture"
    );

    let report = match backend {
        Backend::Hardware => {
            let device = V4l2Device::open(Path::new(&config.device_path))?;
            run_capture(device, &config, args.work, &args.output_dir)?
        }
        Backend::Sim => {
            let device = SimCamera::new("sim-camera").with_frame_interval(Duration::from_millis(33));
            run_capture(device, &config, args.work, &args.output_dir)?
        }
    };

    println!(
        "captured {} frames: dropped {} reordered {} stalls {} failed {} processing errors {}",
        report.cycles,
        report.dropped,
        report.reorders,
        report.stalls,
        report.failed_completions,
        report.processing_errors
    );
    println!(
        "latency: mean {:.3}ms max {:.3}ms",
        report.mean_latency.as_secs_f64() * 1000.0,
        report.max_latency.as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Sums every 8th byte, enough to touch each cache line of the frame.
fn checksum(data: &[u8]) -> u64 {
    data.iter().step_by(8).map(|b| u64::from(*b)).sum()
}

fn run_capture<D: CaptureDevice>(
    device: D,
    config: &CaptureConfig,
    work: WorkMode,
    output_dir: &Path,
) -> Result<RunReport> {
    let (port, pool) = CapturePort::open(device, config)?;
    let monitor = SequenceMonitor::new().with_starvation_threshold(config.starvation_threshold);
    let mut driver = PipelineDriver::new(Stage::new(pool, port))
        .with_monitor(monitor)
        .with_frame_timeout(config.frame_timeout());
    install_stop_handler(driver.stop_handle());

    let result = driver.run(config.cycle_count, |cycle, buffer| match work {
        WorkMode::Checksum => {
            let sum = checksum(buffer.data());
            debug!(cycle, index = buffer.index(), sum, "frame checksum");
            Ok(())
        }
        WorkMode::Save => {
            let path = output_dir.join(format!("{cycle:05}.raw"));
            io::write_exact(&path, buffer.data())
        }
        WorkMode::Discard => Ok(()),
    });

    let shutdown = driver.shutdown();
    let report = result?;
    shutdown?;
    Ok(report)
}

fn convert(backend: Backend, args: &ConvertArgs) -> Result<()> {
    let config = ConvertConfig::from(args);
    info!(
        component = %config.component,
        width = config.width,
        height = config.height,
        from = %config.input_format,
        to = %config.output_format,
        "starting conversion"
    );

    match backend {
        Backend::Hardware => {
            let (input, output) = mmal::create_component(&config.component)?;
            run_convert(input, output, &config, &args.input, &args.output)
        }
        Backend::Sim => {
            let (input, output) = SimIsp::new("sim-isp").spawn()?;
            run_convert(input, output, &config, &args.input, &args.output)
        }
    }
}

fn run_convert<P: FirmwarePort>(
    input: P,
    output: P,
    config: &ConvertConfig,
    input_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let input_format = PortFormat {
        encoding: config.input_format,
        width: config.width,
        height: config.height,
    };
    let output_format = PortFormat {
        encoding: config.output_format,
        ..input_format
    };

    let (input_port, input_pool) = CallbackPort::open(input, &input_format, 1)?;
    let mut input_stage = Stage::new(input_pool, input_port);
    let (output_port, output_pool) = CallbackPort::open(output, &output_format, 1)?;
    let mut output_stage = Stage::new(output_pool, output_port);

    let fill = |buffer: &mut Buffer| -> Result<()> {
        let len = io::read_exact(input_path, buffer.data_mut())?;
        buffer.set_length(len)?;
        buffer.set_flags(BufferFlags::FRAME_END);
        buffer.set_timestamp(Some(Timestamp::new(0, CONVERT_PTS_US * 1000)));
        Ok(())
    };
    let persist = |buffer: &Buffer| io::write_exact(output_path, buffer.data());

    let result = run_single_shot(
        &mut input_stage,
        &mut output_stage,
        config.timeout(),
        fill,
        persist,
    );

    // Output first: the component stops producing before its input goes.
    let output_shutdown = output_stage.shutdown();
    let input_shutdown = input_stage.shutdown();
    let report = result?;
    output_shutdown?;
    input_shutdown?;

    println!(
        "converted {} -> {}: {} bytes in {:.3}ms",
        input_path.display(),
        output_path.display(),
        report.output_len,
        report.latency.as_secs_f64() * 1000.0
    );
    Ok(())
}
