// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Runs against the real camera and ISP. Ignored by default, run on target
//! with `cargo test -- --ignored`.

use edgefirst_bufring::{
    capture::CapturePort,
    config::{CaptureConfig, MemoryMode},
    driver::{run_single_shot, PipelineDriver, Stage},
    firmware::{CallbackPort, PortFormat},
    format, mmal,
    v4l2::V4l2Device,
    BufferFlags,
};
use serial_test::serial;
use std::{error::Error, path::Path, time::Duration};

fn capture(memory: MemoryMode) -> Result<(), Box<dyn Error>> {
    let config = CaptureConfig {
        cycle_count: Some(60),
        memory,
        ..Default::default()
    };
    let device = V4l2Device::open(Path::new(&config.device_path))?;
    let (port, pool) = CapturePort::open(device, &config)?;
    let mut driver =
        PipelineDriver::new(Stage::new(pool, port)).with_frame_timeout(config.frame_timeout());

    let report = driver.run(config.cycle_count, |_, buffer| {
        assert!(!buffer.is_empty());
        Ok(())
    })?;
    println!("{report:?}");
    assert_eq!(report.cycles, 60);
    assert!(driver.stage().pool().all_free());
    driver.shutdown()?;
    Ok(())
}

#[test]
#[serial]
#[ignore]
fn test_v4l2_capture_mmap() -> Result<(), Box<dyn Error>> {
    capture(MemoryMode::Mmap)
}

#[test]
#[serial]
#[ignore]
fn test_v4l2_capture_dmabuf() -> Result<(), Box<dyn Error>> {
    capture(MemoryMode::DmaBuf)
}

#[test]
#[serial]
#[ignore]
fn test_mmal_isp_convert() -> Result<(), Box<dyn Error>> {
    let input_format = PortFormat {
        encoding: format::BAYER_SRGGB12P,
        width: 1920,
        height: 1080,
    };
    let output_format = PortFormat {
        encoding: format::I420,
        ..input_format
    };

    let (input, output) = mmal::create_component("vc.ril.isp")?;
    let (input_port, input_pool) = CallbackPort::open(input, &input_format, 1)?;
    let mut input_stage = Stage::new(input_pool, input_port);
    let (output_port, output_pool) = CallbackPort::open(output, &output_format, 1)?;
    let mut output_stage = Stage::new(output_pool, output_port);

    let report = run_single_shot(
        &mut input_stage,
        &mut output_stage,
        Duration::from_secs(5),
        |buffer| {
            let capacity = buffer.capacity();
            buffer.data_mut().fill(0x80);
            buffer.set_length(capacity)?;
            buffer.set_flags(BufferFlags::FRAME_END);
            Ok(())
        },
        |buffer| {
            assert!(buffer.flags().contains(BufferFlags::FRAME_END));
            Ok(())
        },
    )?;
    println!("{report:?}");
    assert!(report.output_len >= format::frame_size(1920, 1080, format::I420).unwrap_or(0));

    output_stage.shutdown()?;
    input_stage.shutdown()?;
    Ok(())
}
