// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! V4L2 single-planar capture device.
//!
//! Only the handful of ioctls the capture ring needs are bound: format,
//! buffer request/query, queue/dequeue, stream on/off and controls. Buffers
//! are either driver allocated and mapped (`MMAP`) or imported from the DMA
//! heap (`DMABUF`).

#![allow(non_camel_case_types)]

use crate::{
    buffer::{Buffer, BufferFlags, BufferMemory, MappedRegion},
    capture::{CaptureDevice, Control, FrameInfo, Negotiated},
    config::MemoryMode,
    error::{Error, Result},
    format::FourCC,
};
use nix::{errno::Errno, ioctl_readwrite, ioctl_write_ptr};
use std::{
    fs::{File, OpenOptions},
    mem::zeroed,
    os::{
        fd::{AsFd, AsRawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    time::Duration,
};
use tracing::{debug, info, instrument};
use unix_ts::Timestamp;

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_MEMORY_DMABUF: u32 = 4;
const V4L2_FIELD_NONE: u32 = 1;
const V4L2_BUF_FLAG_ERROR: u32 = 0x0000_0040;

const V4L2_CID_EXPOSURE: u32 = 0x0098_0911;
const V4L2_CID_GAIN: u32 = 0x0098_0913;
const V4L2_CID_HFLIP: u32 = 0x0098_0914;
const V4L2_CID_VFLIP: u32 = 0x0098_0915;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    // v4l2_window carries pointers, which makes the union 8 byte aligned.
    _align: [u64; 25],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub planes: *mut libc::c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct v4l2_control {
    pub id: u32,
    pub value: i32,
}

ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
ioctl_write_ptr!(vidioc_streamoff, b'V', 19, libc::c_int);
ioctl_readwrite!(vidioc_s_ctrl, b'V', 28, v4l2_control);

fn memory_type(memory: MemoryMode) -> u32 {
    match memory {
        MemoryMode::Mmap => V4L2_MEMORY_MMAP,
        MemoryMode::DmaBuf => V4L2_MEMORY_DMABUF,
    }
}

fn empty_buffer(index: usize, memory: MemoryMode) -> v4l2_buffer {
    let mut buf: v4l2_buffer = unsafe { zeroed() };
    buf.index = index as u32;
    buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
    buf.memory = memory_type(memory);
    buf
}

/// A V4L2 capture node such as `/dev/video0`.
pub struct V4l2Device {
    name: String,
    file: File,
    memory: MemoryMode,
    frame_size: usize,
}

impl V4l2Device {
    /// Opens the device node non-blocking; dequeue waits with `poll`.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| Error::device("open", e))?;
        info!(path = %path.display(), "capture device opened");
        Ok(Self {
            name: path.display().to_string(),
            file,
            memory: MemoryMode::Mmap,
            frame_size: 0,
        })
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }

    fn poll(&self, timeout: Option<Duration>) -> Result<bool> {
        poll_readable(self.fd(), timeout)
    }
}

/// Waits for `fd` to become readable. A signal ends the wait like an expired
/// timeout so the caller can check for a stop request.
fn poll_readable(fd: libc::c_int, timeout: Option<Duration>) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as libc::c_int);
    match unsafe { libc::poll(&mut pfd, 1, ms) } {
        n if n > 0 => Ok(true),
        0 => Ok(false),
        _ => match Errno::last() {
            Errno::EINTR => {
                debug!("poll interrupted");
                Ok(false)
            }
            e => Err(Error::device("poll", e)),
        },
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_control(&mut self, control: Control, value: i32) -> Result<()> {
        let id = match control {
            Control::Gain => V4L2_CID_GAIN,
            Control::Exposure => V4L2_CID_EXPOSURE,
            Control::HorizontalFlip => V4L2_CID_HFLIP,
            Control::VerticalFlip => V4L2_CID_VFLIP,
        };
        let mut ctrl = v4l2_control { id, value };
        unsafe { vidioc_s_ctrl(self.fd(), &mut ctrl) }.map_err(|e| Error::device("set control", e))?;
        debug!(?control, value, "control set");
        Ok(())
    }

    fn negotiate_format(&mut self, width: u32, height: u32, format: FourCC) -> Result<Negotiated> {
        let mut fmt: v4l2_format = unsafe { zeroed() };
        fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        let mut pix: v4l2_pix_format = unsafe { zeroed() };
        pix.width = width;
        pix.height = height;
        pix.pixelformat = format.as_u32();
        pix.field = V4L2_FIELD_NONE;
        fmt.fmt.pix = pix;

        match unsafe { vidioc_s_fmt(self.fd(), &mut fmt) } {
            Ok(_) => {}
            Err(Errno::EINVAL) => {
                return Err(Error::FormatUnsupported {
                    op: "set format",
                    detail: format!("{} refused {format} {width}x{height}", self.name),
                })
            }
            Err(e) => return Err(Error::device("set format", e)),
        }

        let pix = unsafe { fmt.fmt.pix };
        let granted = FourCC::from_u32(pix.pixelformat);
        if granted != format {
            return Err(Error::FormatUnsupported {
                op: "set format",
                detail: format!("requested {format} device chose {granted}"),
            });
        }
        self.frame_size = pix.sizeimage as usize;
        Ok(Negotiated {
            width: pix.width,
            height: pix.height,
            format: granted,
            frame_size: self.frame_size,
        })
    }

    fn request_buffers(&mut self, count: usize, memory: MemoryMode) -> Result<usize> {
        let mut req = v4l2_requestbuffers {
            count: count as u32,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory_type(memory),
            ..Default::default()
        };
        unsafe { vidioc_reqbufs(self.fd(), &mut req) }
            .map_err(|e| Error::device("request buffers", e))?;
        self.memory = memory;
        debug!(count, granted = req.count, ?memory, "buffers requested");
        Ok(req.count as usize)
    }

    fn map_buffer(&mut self, index: usize) -> Result<Buffer> {
        let mut buf = empty_buffer(index, MemoryMode::Mmap);
        unsafe { vidioc_querybuf(self.fd(), &mut buf) }
            .map_err(|e| Error::device("query buffer", e))?;
        let offset = unsafe { buf.m.offset };
        let region = MappedRegion::map(self.file.as_fd(), buf.length as usize, u64::from(offset))
            .map_err(|e| Error::device("mmap", e))?;
        Ok(Buffer::new(index, BufferMemory::Mapped(region)))
    }

    fn enqueue(&mut self, buffer: &Buffer) -> Result<()> {
        let mut buf = empty_buffer(buffer.index(), self.memory);
        if self.memory == MemoryMode::DmaBuf {
            let fd = buffer.memory().dma_fd().ok_or_else(|| Error::Device {
                op: "enqueue",
                code: libc::EINVAL,
                message: format!("buffer {} has no dma fd", buffer.index()),
            })?;
            buf.m.fd = fd.as_raw_fd();
            buf.length = buffer.capacity() as u32;
        }
        unsafe { vidioc_qbuf(self.fd(), &mut buf) }.map_err(|e| Error::device("enqueue", e))?;
        Ok(())
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> Result<FrameInfo> {
        let timed_out = || Error::Timeout {
            op: "dequeue",
            after: timeout.unwrap_or_default(),
        };
        if !self.poll(timeout)? {
            return Err(timed_out());
        }

        let mut buf = empty_buffer(0, self.memory);
        match unsafe { vidioc_dqbuf(self.fd(), &mut buf) } {
            Ok(_) => {}
            Err(Errno::EAGAIN) => return Err(timed_out()),
            Err(e) => return Err(Error::device("dequeue", e)),
        }

        let mut flags = BufferFlags::FRAME_END;
        if buf.flags & V4L2_BUF_FLAG_ERROR != 0 {
            flags |= BufferFlags::ERROR;
        }
        Ok(FrameInfo {
            index: buf.index as usize,
            sequence: buf.sequence,
            bytes_used: buf.bytesused as usize,
            flags,
            timestamp: Some(Timestamp::new(
                buf.timestamp.tv_sec as i64,
                (buf.timestamp.tv_usec as u32) * 1000,
            )),
        })
    }

    fn start_stream(&mut self) -> Result<()> {
        let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        unsafe { vidioc_streamon(self.fd(), &kind) }.map_err(|e| Error::device("stream on", e))?;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        unsafe { vidioc_streamoff(self.fd(), &kind) }
            .map_err(|e| Error::device("stream off", e))?;
        Ok(())
    }
}
