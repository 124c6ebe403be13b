// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_bufring::{
    config::{CaptureConfig, MemoryMode},
    format, io, Error,
};
use std::time::Duration;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_write_then_read() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("00000.raw");
    let frame: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();

    io::write_exact(&path, &frame)?;
    let mut buffer = vec![0u8; frame.len()];
    assert_eq!(io::read_exact(&path, &mut buffer)?, frame.len());
    assert_eq!(buffer, frame);

    // Rewriting truncates the old contents.
    io::write_exact(&path, &frame[..10])?;
    assert_eq!(std::fs::metadata(&path)?.len(), 10);
    Ok(())
}

#[test]
fn test_short_read() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("short.raw");
    std::fs::write(&path, [1u8; 10])?;

    let mut buffer = [0u8; 16];
    let err = io::read_exact(&path, &mut buffer).unwrap_err();
    assert!(matches!(
        err,
        Error::ShortRead {
            expected: 16,
            actual: 10,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_longer_file_fills_buffer() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("long.raw");
    std::fs::write(&path, [9u8; 32])?;

    let mut buffer = [0u8; 8];
    assert_eq!(io::read_exact(&path, &mut buffer)?, 8);
    assert_eq!(buffer, [9u8; 8]);
    Ok(())
}

#[test]
fn test_missing_file() {
    let mut buffer = [0u8; 4];
    let err = io::read_exact(std::path::Path::new("/nonexistent/frame.raw"), &mut buffer)
        .unwrap_err();
    assert!(matches!(err, Error::Io { op: "open", .. }));
}

#[test]
fn test_partial_config() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("capture.json");
    std::fs::write(
        &path,
        r#"{
            "width": 640,
            "height": 480,
            "pixel_format": "YUYV",
            "memory": "dmabuf",
            "cycle_count": null,
            "controls": { "gain": 8 }
        }"#,
    )?;

    let config = CaptureConfig::from_json_file(&path)?;
    assert_eq!((config.width, config.height), (640, 480));
    assert_eq!(config.pixel_format, format::YUYV);
    assert_eq!(config.memory, MemoryMode::DmaBuf);
    assert_eq!(config.cycle_count, None);
    assert_eq!(config.controls.gain, Some(8));
    assert_eq!(config.controls.hflip, None);

    // Everything else keeps its default.
    assert_eq!(config.device_path, "/dev/video0");
    assert_eq!(config.buffer_count, 5);
    assert_eq!(config.frame_timeout(), Some(Duration::from_millis(2000)));
    Ok(())
}

#[test]
fn test_invalid_config() -> TestResult {
    let dir = tempfile::tempdir()?;

    let zero = dir.path().join("zero.json");
    std::fs::write(&zero, r#"{ "buffer_count": 0 }"#)?;
    let err = CaptureConfig::from_json_file(&zero).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let bad_format = dir.path().join("format.json");
    std::fs::write(&bad_format, r#"{ "pixel_format": "TOOLONG" }"#)?;
    let err = CaptureConfig::from_json_file(&bad_format).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    Ok(())
}
