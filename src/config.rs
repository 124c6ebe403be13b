// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Setup parameters passed explicitly into pool and port creation.

use crate::{
    capture::Control,
    error::{Error, Result},
    format::{self, FourCC},
};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

/// How capture buffers are backed.
#[derive(clap::ValueEnum, Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Device allocated, mapped into the application.
    #[default]
    Mmap,
    /// Application allocated from the CMA DMA heap, imported by the device.
    #[value(name = "dmabuf")]
    DmaBuf,
}

/// Optional sensor controls, applied before format negotiation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SensorControls {
    pub gain: Option<i32>,
    pub exposure: Option<i32>,
    pub hflip: Option<bool>,
    pub vflip: Option<bool>,
}

impl SensorControls {
    /// The configured controls, in the order they are applied.
    pub fn iter(&self) -> impl Iterator<Item = (Control, i32)> {
        [
            (Control::Gain, self.gain),
            (Control::Exposure, self.exposure),
            (Control::HorizontalFlip, self.hflip.map(i32::from)),
            (Control::VerticalFlip, self.vflip.map(i32::from)),
        ]
        .into_iter()
        .filter_map(|(control, value)| value.map(|v| (control, v)))
    }
}

/// Continuous capture configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub buffer_count: usize,
    /// `None` runs until a stop is requested.
    pub cycle_count: Option<u64>,
    pub memory: MemoryMode,
    pub controls: SensorControls,
    /// Per-frame wait before a stall is reported.
    pub frame_timeout_ms: Option<u64>,
    /// Single gap, in frames, that is reported as a starved pool.
    pub starvation_threshold: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            pixel_format: format::SRGGB12P,
            buffer_count: 5,
            cycle_count: Some(300),
            memory: MemoryMode::Mmap,
            controls: SensorControls::default(),
            frame_timeout_ms: Some(2000),
            starvation_threshold: 5,
        }
    }
}

impl CaptureConfig {
    /// Loads a configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::Io {
            op: "open config",
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.buffer_count == 0 {
            return Err(Error::Config("buffer_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }
}

/// Single-shot conversion through a firmware ISP component.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConvertConfig {
    pub component: String,
    pub width: u32,
    pub height: u32,
    pub input_format: FourCC,
    pub output_format: FourCC,
    /// How long to wait for the converted frame.
    pub timeout_ms: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            component: "vc.ril.isp".to_string(),
            width: 1920,
            height: 1080,
            input_format: format::BAYER_SRGGB12P,
            output_format: format::I420,
            timeout_ms: 5000,
        }
    }
}

impl ConvertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
