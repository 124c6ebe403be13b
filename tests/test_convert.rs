// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_bufring::{
    driver::{run_single_shot, Stage},
    firmware::{CallbackPort, PortFormat},
    format::{self, FourCC},
    io,
    port::{BufferPort, Discipline},
    sim::{SimIsp, SimIspPort},
    BufferFlags, Error,
};
use std::time::Duration;
use unix_ts::Timestamp;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const INPUT: PortFormat = PortFormat {
    encoding: format::BAYER_SRGGB12P,
    width: 64,
    height: 32,
};

const OUTPUT: PortFormat = PortFormat {
    encoding: format::I420,
    ..INPUT
};

type IspStage = Stage<CallbackPort<SimIspPort>>;

fn open_stages(isp: SimIsp) -> Result<(IspStage, IspStage), Error> {
    let (input, output) = isp.spawn()?;
    let (input_port, input_pool) = CallbackPort::open(input, &INPUT, 1)?;
    let (output_port, output_pool) = CallbackPort::open(output, &OUTPUT, 1)?;
    Ok((
        Stage::new(input_pool, input_port),
        Stage::new(output_pool, output_port),
    ))
}

#[test]
fn test_single_shot_file_to_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("frame.raw");
    let output_path = dir.path().join("frame.yuv");
    let frame: Vec<u8> = (0..3072).map(|i| i as u8).collect();
    std::fs::write(&input_path, &frame)?;

    let (mut input, mut output) = open_stages(SimIsp::new("isp"))?;
    assert_eq!(input.port().discipline(), Discipline::Callback);
    assert_eq!(input.pool().buffer_size(), 3072);
    assert_eq!(output.pool().buffer_size(), 3072);

    let report = run_single_shot(
        &mut input,
        &mut output,
        Duration::from_secs(2),
        |buffer| {
            let len = io::read_exact(&input_path, buffer.data_mut())?;
            buffer.set_length(len)?;
            buffer.set_flags(BufferFlags::FRAME_END);
            buffer.set_timestamp(Some(Timestamp::new(0, 37_000)));
            Ok(())
        },
        |buffer| {
            assert!(buffer.flags().contains(BufferFlags::FRAME_END));
            assert_eq!(buffer.timestamp().map(|t| t.subsec(6)), Some(37));
            io::write_exact(&output_path, buffer.data())
        },
    )?;
    assert_eq!(report.output_len, 3072);

    let saved = std::fs::read(&output_path)?;
    assert_eq!(saved.len(), 3072);
    assert!(saved.iter().enumerate().all(|(i, b)| *b == i as u8));

    assert!(input.pool().all_free());
    assert!(output.pool().all_free());
    output.shutdown()?;
    input.shutdown()?;
    Ok(())
}

#[test]
fn test_short_input_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("short.raw");
    std::fs::write(&input_path, [0u8; 100])?;

    let (mut input, mut output) = open_stages(SimIsp::new("isp"))?;
    let err = run_single_shot(
        &mut input,
        &mut output,
        Duration::from_secs(1),
        |buffer| io::read_exact(&input_path, buffer.data_mut()).map(|_| ()),
        |_| Ok(()),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::ShortRead {
            expected: 3072,
            actual: 100,
            ..
        }
    ));

    // The queued output comes back when its port is disabled.
    output.shutdown()?;
    input.shutdown()?;
    Ok(())
}

#[test]
fn test_output_timeout() -> TestResult {
    let isp = SimIsp::new("slow-isp").with_latency(Duration::from_millis(200));
    let (mut input, mut output) = open_stages(isp)?;

    let err = run_single_shot(
        &mut input,
        &mut output,
        Duration::from_millis(20),
        |buffer| buffer.set_length(16),
        |_| Ok(()),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            op: "single-shot output",
            ..
        }
    ));

    // Late completions are collected during shutdown.
    output.shutdown()?;
    input.shutdown()?;
    Ok(())
}

#[test]
fn test_short_pool_rejected() -> TestResult {
    let (input, _output) = SimIsp::new("isp").with_pool_limit(1).spawn()?;
    let Err(err) = CallbackPort::open(input, &INPUT, 2) else {
        panic!("pool of 1 accepted for 2 buffers");
    };
    assert!(matches!(err, Error::ResourceExhausted { .. }));
    Ok(())
}

#[test]
fn test_unknown_encoding_rejected() -> TestResult {
    let (input, _output) = SimIsp::new("isp").spawn()?;
    let format = PortFormat {
        encoding: "H264".parse::<FourCC>()?,
        ..INPUT
    };
    let Err(err) = CallbackPort::open(input, &format, 1) else {
        panic!("opaque encoding accepted");
    };
    assert!(matches!(
        err,
        Error::FormatUnsupported {
            op: "port format commit",
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_submit_after_drain_rejected() -> TestResult {
    let (mut input, output) = open_stages(SimIsp::new("isp"))?;
    input.drain()?;
    assert!(!input.port().is_enabled());

    assert!(input.submit(0).is_err());
    assert!(input.pool().all_free());
    assert_eq!(input.port().outstanding(), 0);

    input.shutdown()?;
    output.shutdown()?;
    Ok(())
}
