// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! MMAL component ports on the VideoCore firmware.
//!
//! Buffer headers are taken out of the port pool once at creation and
//! wrapped as [`Buffer`]s whose memory is the header payload. While a buffer
//! is with the firmware it is boxed into the header's `user_data`; the port
//! callback unboxes it and hands it to the completion sink.

use crate::{
    buffer::{Buffer, BufferFlags, BufferMemory, BufferMeta, ForeignRegion},
    completion::CompletionSink,
    error::{Error, Result},
    firmware::{FirmwarePort, PortDirection, PortFormat},
    port::Rejected,
};
use mmal_sys::{
    Mmal, MMAL_BUFFER_HEADER_FLAG_CORRUPTED, MMAL_BUFFER_HEADER_FLAG_TRANSMISSION_FAILED,
    MMAL_BUFFER_HEADER_T, MMAL_COMPONENT_T, MMAL_ECORRUPT, MMAL_PARAMETER_ZERO_COPY,
    MMAL_POOL_T, MMAL_PORT_T, MMAL_PORT_USERDATA_T, MMAL_STATUS_T, MMAL_SUCCESS,
    MMAL_TIME_UNKNOWN, MMAL_TRUE,
};
use std::{
    ffi::{c_void, CString},
    ptr::null_mut,
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};
use unix_ts::Timestamp;

fn check(lib: &Mmal, op: &'static str, status: MMAL_STATUS_T) -> Result<()> {
    if status == MMAL_SUCCESS {
        Ok(())
    } else {
        Err(Error::firmware(op, status as i32, lib.status_to_string(status)))
    }
}

/// Presentation timestamps are microseconds.
fn timestamp_to_pts(timestamp: Option<Timestamp>) -> i64 {
    match timestamp {
        Some(ts) => ts.seconds() * 1_000_000 + i64::from(ts.subsec(6)),
        None => MMAL_TIME_UNKNOWN,
    }
}

fn pts_to_timestamp(pts: i64) -> Option<Timestamp> {
    if pts == MMAL_TIME_UNKNOWN || pts < 0 {
        return None;
    }
    Some(Timestamp::new(
        pts / 1_000_000,
        ((pts % 1_000_000) * 1000) as u32,
    ))
}

struct Component {
    lib: Mmal,
    raw: *mut MMAL_COMPONENT_T,
    name: String,
}

// SAFETY: MMAL components are internally synchronised; the pointer is only
// destroyed once, when the last port lets go of it.
unsafe impl Send for Component {}
unsafe impl Sync for Component {}

impl Drop for Component {
    fn drop(&mut self) {
        let status = unsafe { self.lib.mmal_component_destroy(self.raw) };
        if let Err(e) = check(&self.lib, "component destroy", status) {
            warn!(component = %self.name, "{e}");
        } else {
            debug!(component = %self.name, "component destroyed");
        }
    }
}

/// State reachable from the firmware callback thread.
struct PortContext {
    sink: CompletionSink,
    component: Arc<Component>,
}

unsafe extern "C" fn port_callback(port: *mut MMAL_PORT_T, header: *mut MMAL_BUFFER_HEADER_T) {
    if port.is_null() || header.is_null() {
        return;
    }
    let context = (*port).userdata as *const PortContext;
    if context.is_null() {
        return;
    }
    let context = &*context;
    let header = &mut *header;

    // Port events carry no application buffer.
    if header.cmd != 0 || header.user_data.is_null() {
        context.component.lib.mmal_buffer_header_release(header);
        return;
    }

    let mut buffer = *Box::from_raw(header.user_data.cast::<Buffer>());
    header.user_data = null_mut();

    let meta = BufferMeta {
        length: header.length as usize,
        sequence: None,
        flags: BufferFlags::from_bits(header.flags),
        timestamp: pts_to_timestamp(header.pts),
    };
    if let Err(e) = buffer.record_fill(meta) {
        context.sink.failed(buffer, e);
        return;
    }
    let failed = MMAL_BUFFER_HEADER_FLAG_CORRUPTED | MMAL_BUFFER_HEADER_FLAG_TRANSMISSION_FAILED;
    if header.flags & failed != 0 {
        let error = Error::firmware(
            "port callback",
            MMAL_ECORRUPT as i32,
            format!("flags {:#06x}", header.flags),
        );
        context.sink.failed(buffer, error);
    } else {
        context.sink.done(buffer);
    }
}

/// Creates component `name` and returns its first input and output port.
#[instrument]
pub fn create_component(name: &str) -> Result<(MmalPort, MmalPort)> {
    let lib = unsafe { Mmal::new() }.map_err(|e| Error::firmware("load mmal", -1, e.to_string()))?;
    let cname = CString::new(name).map_err(|_| Error::Config(format!("bad component name {name}")))?;

    let mut raw = null_mut();
    let status = unsafe { lib.mmal_component_create(cname.as_ptr(), &mut raw) };
    check(&lib, "component create", status)?;
    let component = Arc::new(Component {
        lib,
        raw,
        name: name.to_string(),
    });

    let (input, output) = unsafe {
        let c = &*raw;
        if c.input_num == 0 || c.output_num == 0 {
            return Err(Error::FormatUnsupported {
                op: "component create",
                detail: format!("{name} needs an input and an output port"),
            });
        }
        (*c.input, *c.output)
    };
    info!(component = name, "component created");

    Ok((
        MmalPort::new(component.clone(), input, PortDirection::Input),
        MmalPort::new(component, output, PortDirection::Output),
    ))
}

/// One MMAL port with its header pool.
pub struct MmalPort {
    component: Arc<Component>,
    raw: *mut MMAL_PORT_T,
    direction: PortDirection,
    pool: *mut MMAL_POOL_T,
    headers: Vec<*mut MMAL_BUFFER_HEADER_T>,
    context: Option<Box<PortContext>>,
}

// SAFETY: every field is either owned or points into the component, which
// outlives the port through the shared handle.
unsafe impl Send for MmalPort {}

impl MmalPort {
    fn new(component: Arc<Component>, raw: *mut MMAL_PORT_T, direction: PortDirection) -> Self {
        Self {
            component,
            raw,
            direction,
            pool: null_mut(),
            headers: Vec::new(),
            context: None,
        }
    }

    fn lib(&self) -> &Mmal {
        &self.component.lib
    }

    fn release_pool(&mut self) {
        for header in self.headers.drain(..) {
            unsafe { self.component.lib.mmal_buffer_header_release(header) };
        }
        if !self.pool.is_null() {
            unsafe { self.component.lib.mmal_port_pool_destroy(self.raw, self.pool) };
            self.pool = null_mut();
        }
    }
}

impl FirmwarePort for MmalPort {
    fn name(&self) -> &str {
        &self.component.name
    }

    fn direction(&self) -> PortDirection {
        self.direction
    }

    fn configure(&mut self, format: &PortFormat, buffer_count: usize) -> Result<usize> {
        let lib = &self.component.lib;
        unsafe {
            let port = &mut *self.raw;
            let es = &mut *port.format;
            match self.direction {
                PortDirection::Input => {
                    let video = &mut (*es.es).video;
                    video.width = format.width;
                    video.height = format.height;
                    video.crop.x = 0;
                    video.crop.y = 0;
                    video.crop.width = format.width as i32;
                    video.crop.height = format.height as i32;
                }
                PortDirection::Output => {
                    let input = *(*self.component.raw).input;
                    lib.mmal_format_copy(port.format, (*input).format);
                }
            }
            es.encoding = format.encoding.as_u32();
            port.buffer_num = buffer_count as u32;

            let status = lib.mmal_port_format_commit(self.raw);
            if status != MMAL_SUCCESS {
                return Err(Error::FormatUnsupported {
                    op: "port format commit",
                    detail: format!(
                        "{} {} {}x{}: {}",
                        self.direction,
                        format.encoding,
                        format.width,
                        format.height,
                        lib.status_to_string(status)
                    ),
                });
            }

            let status =
                lib.mmal_port_parameter_set_boolean(self.raw, MMAL_PARAMETER_ZERO_COPY, MMAL_TRUE);
            check(lib, "enable zero copy", status)?;

            debug!(
                direction = %self.direction,
                buffer_num = port.buffer_num,
                buffer_size = port.buffer_size,
                "port format committed"
            );
            Ok(port.buffer_size as usize)
        }
    }

    fn create_pool(&mut self, count: usize, size: usize) -> Result<Vec<Buffer>> {
        let pool = unsafe { self.lib().mmal_port_pool_create(self.raw, count as u32, size as u32) };
        if pool.is_null() {
            return Err(Error::ResourceExhausted {
                op: "port pool create",
                detail: format!("{count} buffers of {size} bytes"),
            });
        }
        self.pool = pool;

        let mut buffers = Vec::with_capacity(count);
        for index in 0..count {
            let header = unsafe { self.lib().mmal_queue_get((*pool).queue) };
            if header.is_null() {
                break;
            }
            self.headers.push(header);
            let memory = unsafe {
                ForeignRegion::new((*header).data, (*header).alloc_size as usize)
            };
            buffers.push(Buffer::new(index, BufferMemory::Foreign(memory)));
        }
        Ok(buffers)
    }

    fn enable(&mut self, sink: CompletionSink) -> Result<()> {
        let context = Box::new(PortContext {
            sink,
            component: self.component.clone(),
        });
        unsafe {
            (*self.raw).userdata = (&*context as *const PortContext)
                .cast_mut()
                .cast::<MMAL_PORT_USERDATA_T>();
            let status = self.lib().mmal_port_enable(self.raw, Some(port_callback));
            if let Err(e) = check(self.lib(), "port enable", status) {
                (*self.raw).userdata = null_mut();
                return Err(e);
            }
        }
        self.context = Some(context);
        Ok(())
    }

    fn send(&mut self, buffer: Buffer) -> Result<(), Rejected> {
        let Some(&header) = self.headers.get(buffer.index()) else {
            let error = Error::firmware(
                "send buffer",
                libc::EINVAL,
                format!("no header for buffer {}", buffer.index()),
            );
            return Err(Rejected { buffer, error });
        };

        unsafe {
            let h = &mut *header;
            h.length = buffer.len() as u32;
            h.offset = 0;
            h.flags = buffer.flags().bits();
            h.pts = timestamp_to_pts(buffer.timestamp());
            h.dts = MMAL_TIME_UNKNOWN;
            h.user_data = Box::into_raw(Box::new(buffer)).cast::<c_void>();

            let status = self.lib().mmal_port_send_buffer(self.raw, header);
            if status != MMAL_SUCCESS {
                let buffer = *Box::from_raw(h.user_data.cast::<Buffer>());
                h.user_data = null_mut();
                let error = Error::firmware(
                    "send buffer",
                    status as i32,
                    self.lib().status_to_string(status),
                );
                return Err(Rejected { buffer, error });
            }
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        // The firmware flushes every held header through the callback
        // before this returns, so the context must still be alive.
        let status = unsafe { self.lib().mmal_port_disable(self.raw) };
        unsafe { (*self.raw).userdata = null_mut() };
        self.context = None;
        check(self.lib(), "port disable", status)
    }

    fn destroy_pool(&mut self, buffers: Vec<Buffer>) -> Result<()> {
        drop(buffers);
        self.release_pool();
        debug!(direction = %self.direction, "pool destroyed");
        Ok(())
    }
}

impl Drop for MmalPort {
    fn drop(&mut self) {
        if self.context.is_some() {
            if let Err(e) = self.disable() {
                warn!(direction = %self.direction, "{e}");
            }
        }
        self.release_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_conversion() {
        let ts = pts_to_timestamp(37).unwrap();
        assert_eq!(ts.seconds(), 0);
        assert_eq!(timestamp_to_pts(Some(ts)), 37);

        let ts = pts_to_timestamp(2_500_000).unwrap();
        assert_eq!(ts.seconds(), 2);
        assert_eq!(timestamp_to_pts(Some(ts)), 2_500_000);

        assert!(pts_to_timestamp(MMAL_TIME_UNKNOWN).is_none());
        assert_eq!(timestamp_to_pts(None), MMAL_TIME_UNKNOWN);
    }
}
