// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Four character code identifying a pixel format.
///
/// The same code space is used by V4L2 (`v4l2_fourcc`) and MMAL
/// (`MMAL_FOURCC`): the first character lives in the least significant byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCC(pub [u8; 4]);

/// Bayer RGGB 12-bit packed, V4L2 naming (`pRCC`).
pub const SRGGB12P: FourCC = FourCC(*b"pRCC");

/// Bayer RGGB 12-bit packed, MMAL naming (`RG12`).
pub const BAYER_SRGGB12P: FourCC = FourCC(*b"RG12");

/// Bayer RGGB 10-bit packed (`pRAA`).
pub const SRGGB10P: FourCC = FourCC(*b"pRAA");

/// Planar YUV 4:2:0.
pub const I420: FourCC = FourCC(*b"I420");

/// YUYV 4:2:2 YUV packed format.
pub const YUYV: FourCC = FourCC(*b"YUYV");

/// NV12 4:2:0 YUV semi-planar format.
pub const NV12: FourCC = FourCC(*b"NV12");

/// RGBA 32-bit pixel format.
pub const RGBA: FourCC = FourCC(*b"RGBA");

impl FourCC {
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(code: u32) -> Self {
        FourCC(code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(value: FourCC) -> Self {
        value.as_u32()
    }
}

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        FourCC::from_u32(value)
    }
}

impl FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("fourcc must be exactly 4 characters, got {s:?}"))?;
        Ok(FourCC(bytes))
    }
}

impl TryFrom<String> for FourCC {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCC> for String {
    fn from(value: FourCC) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Size in bytes of one frame, or `None` for formats whose layout is not
/// known here. Callers then rely on the size the external entity reports.
pub const fn frame_size(width: u32, height: u32, format: FourCC) -> Option<usize> {
    let pixels = width as usize * height as usize;
    match format.0 {
        // 12 bits per pixel
        [b'p', b'R', b'C', b'C'] | [b'R', b'G', b'1', b'2'] | [b'I', b'4', b'2', b'0'] => {
            Some(pixels + pixels / 2)
        }
        [b'N', b'V', b'1', b'2'] => Some(pixels + pixels / 2),
        // 10 bits per pixel
        [b'p', b'R', b'A', b'A'] => Some(pixels + pixels / 4),
        [b'Y', b'U', b'Y', b'V'] => Some(2 * pixels),
        [b'R', b'G', b'B', b'A'] => Some(4 * pixels),
        _ => None,
    }
}
