// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Low-level bindings for the Broadcom Multi-Media Abstraction Layer.
//!
//! The library is loaded at runtime with `libloading` so crates depending on
//! these bindings build and run on hosts without the VideoCore userland
//! installed; [`Mmal::new`] fails there instead.
//!
//! Only the subset of the API needed to drive a component's ports with
//! zero-copy buffer pools is bound. Struct layouts follow
//! `interface/mmal/mmal_*.h` from the Raspberry Pi userland tree.

#![allow(non_camel_case_types)]

use libloading::Library;
use std::{
    ffi::{c_char, c_void, CStr},
    fmt,
};

pub type MMAL_STATUS_T = u32;
pub type MMAL_BOOL_T = i32;
pub type MMAL_FOURCC_T = u32;
pub type MMAL_ES_TYPE_T = u32;
pub type MMAL_PORT_TYPE_T = u32;

pub const MMAL_SUCCESS: MMAL_STATUS_T = 0;
pub const MMAL_ENOMEM: MMAL_STATUS_T = 1;
pub const MMAL_ENOSPC: MMAL_STATUS_T = 2;
pub const MMAL_EINVAL: MMAL_STATUS_T = 3;
pub const MMAL_ENOSYS: MMAL_STATUS_T = 4;
pub const MMAL_ENOENT: MMAL_STATUS_T = 5;
pub const MMAL_ENXIO: MMAL_STATUS_T = 6;
pub const MMAL_EIO: MMAL_STATUS_T = 7;
pub const MMAL_ESPIPE: MMAL_STATUS_T = 8;
pub const MMAL_ECORRUPT: MMAL_STATUS_T = 9;
pub const MMAL_ENOTREADY: MMAL_STATUS_T = 10;
pub const MMAL_ECONFIG: MMAL_STATUS_T = 11;
pub const MMAL_EISCONN: MMAL_STATUS_T = 12;
pub const MMAL_ENOTCONN: MMAL_STATUS_T = 13;
pub const MMAL_EAGAIN: MMAL_STATUS_T = 14;
pub const MMAL_EFAULT: MMAL_STATUS_T = 15;

pub const MMAL_FALSE: MMAL_BOOL_T = 0;
pub const MMAL_TRUE: MMAL_BOOL_T = 1;

/// `MMAL_PARAMETER_GROUP_COMMON + 4`
pub const MMAL_PARAMETER_ZERO_COPY: u32 = 4;

pub const MMAL_BUFFER_HEADER_FLAG_EOS: u32 = 1 << 0;
pub const MMAL_BUFFER_HEADER_FLAG_FRAME_START: u32 = 1 << 1;
pub const MMAL_BUFFER_HEADER_FLAG_FRAME_END: u32 = 1 << 2;
pub const MMAL_BUFFER_HEADER_FLAG_FRAME: u32 =
    MMAL_BUFFER_HEADER_FLAG_FRAME_START | MMAL_BUFFER_HEADER_FLAG_FRAME_END;
pub const MMAL_BUFFER_HEADER_FLAG_KEYFRAME: u32 = 1 << 3;
pub const MMAL_BUFFER_HEADER_FLAG_CORRUPTED: u32 = 1 << 9;
pub const MMAL_BUFFER_HEADER_FLAG_TRANSMISSION_FAILED: u32 = 1 << 10;

/// Presentation timestamp value meaning "not set".
pub const MMAL_TIME_UNKNOWN: i64 = i64::MIN;

pub const MMAL_COMPONENT_DEFAULT_ISP: &str = "vc.ril.isp";

#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct MMAL_RECT_T {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct MMAL_RATIONAL_T {
    pub num: i32,
    pub den: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct MMAL_VIDEO_FORMAT_T {
    pub width: u32,
    pub height: u32,
    pub crop: MMAL_RECT_T,
    pub frame_rate: MMAL_RATIONAL_T,
    pub par: MMAL_RATIONAL_T,
    pub color_space: MMAL_FOURCC_T,
}

/// Union of the elementary stream specific formats in C; the video member
/// is the largest and sits at offset zero, which is all we access.
#[repr(C)]
pub struct MMAL_ES_SPECIFIC_FORMAT_T {
    pub video: MMAL_VIDEO_FORMAT_T,
}

#[repr(C)]
pub struct MMAL_ES_FORMAT_T {
    pub type_: MMAL_ES_TYPE_T,
    pub encoding: MMAL_FOURCC_T,
    pub encoding_variant: MMAL_FOURCC_T,
    pub es: *mut MMAL_ES_SPECIFIC_FORMAT_T,
    pub bitrate: u32,
    pub flags: u32,
    pub extradata_size: u32,
    pub extradata: *mut u8,
}

#[repr(C)]
pub struct MMAL_BUFFER_HEADER_T {
    pub next: *mut MMAL_BUFFER_HEADER_T,
    pub priv_: *mut c_void,
    pub cmd: u32,
    pub data: *mut u8,
    pub alloc_size: u32,
    pub length: u32,
    pub offset: u32,
    pub flags: u32,
    pub pts: i64,
    pub dts: i64,
    pub type_: *mut c_void,
    pub user_data: *mut c_void,
}

/// Opaque queue of buffer headers.
#[repr(C)]
pub struct MMAL_QUEUE_T {
    _private: [u8; 0],
}

/// Opaque client data attached to a port.
#[repr(C)]
pub struct MMAL_PORT_USERDATA_T {
    _private: [u8; 0],
}

#[repr(C)]
pub struct MMAL_POOL_T {
    pub queue: *mut MMAL_QUEUE_T,
    pub headers_num: u32,
    pub header: *mut *mut MMAL_BUFFER_HEADER_T,
}

#[repr(C)]
pub struct MMAL_PORT_T {
    pub priv_: *mut c_void,
    pub name: *const c_char,
    pub type_: MMAL_PORT_TYPE_T,
    pub index: u16,
    pub index_all: u16,
    pub is_enabled: u32,
    pub format: *mut MMAL_ES_FORMAT_T,
    pub buffer_num_min: u32,
    pub buffer_size_min: u32,
    pub buffer_alignment_min: u32,
    pub buffer_num_recommended: u32,
    pub buffer_size_recommended: u32,
    pub buffer_num: u32,
    pub buffer_size: u32,
    pub component: *mut MMAL_COMPONENT_T,
    pub userdata: *mut MMAL_PORT_USERDATA_T,
    pub capabilities: u32,
}

#[repr(C)]
pub struct MMAL_COMPONENT_T {
    pub priv_: *mut c_void,
    pub userdata: *mut c_void,
    pub name: *const c_char,
    pub is_enabled: u32,
    pub control: *mut MMAL_PORT_T,
    pub input_num: u32,
    pub input: *mut *mut MMAL_PORT_T,
    pub output_num: u32,
    pub output: *mut *mut MMAL_PORT_T,
    pub clock_num: u32,
    pub clock: *mut *mut MMAL_PORT_T,
    pub port_num: u32,
    pub port: *mut *mut MMAL_PORT_T,
    pub id: u32,
}

/// Callback invoked from the MMAL worker thread when a port is done with a
/// buffer header.
pub type MMAL_PORT_BH_CB_T =
    Option<unsafe extern "C" fn(port: *mut MMAL_PORT_T, buffer: *mut MMAL_BUFFER_HEADER_T)>;

/// Libraries searched, in order, for each symbol.
pub const DEFAULT_LIBRARIES: &[&str] = &[
    "libmmal.so",
    "libmmal_core.so",
    "libmmal_util.so",
    "libmmal_vc_client.so",
    "/opt/vc/lib/libmmal.so",
    "/opt/vc/lib/libmmal_core.so",
    "/opt/vc/lib/libmmal_util.so",
    "/opt/vc/lib/libmmal_vc_client.so",
];

#[derive(Debug)]
pub enum Error {
    /// None of the candidate libraries could be opened.
    NotFound(String),
    /// A required entry point is missing from every loaded library.
    MissingSymbol(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound(libs) => write!(f, "no MMAL library found (tried {libs})"),
            Error::MissingSymbol(name) => write!(f, "MMAL symbol {name} not found"),
        }
    }
}

impl std::error::Error for Error {}

type ComponentCreateFn =
    unsafe extern "C" fn(*const c_char, *mut *mut MMAL_COMPONENT_T) -> MMAL_STATUS_T;
type ComponentFn = unsafe extern "C" fn(*mut MMAL_COMPONENT_T) -> MMAL_STATUS_T;
type PortFn = unsafe extern "C" fn(*mut MMAL_PORT_T) -> MMAL_STATUS_T;
type PortEnableFn = unsafe extern "C" fn(*mut MMAL_PORT_T, MMAL_PORT_BH_CB_T) -> MMAL_STATUS_T;
type PortSendFn =
    unsafe extern "C" fn(*mut MMAL_PORT_T, *mut MMAL_BUFFER_HEADER_T) -> MMAL_STATUS_T;
type PortSetBoolFn = unsafe extern "C" fn(*mut MMAL_PORT_T, u32, MMAL_BOOL_T) -> MMAL_STATUS_T;
type PoolCreateFn = unsafe extern "C" fn(*mut MMAL_PORT_T, u32, u32) -> *mut MMAL_POOL_T;
type PoolDestroyFn = unsafe extern "C" fn(*mut MMAL_PORT_T, *mut MMAL_POOL_T);
type QueueGetFn = unsafe extern "C" fn(*mut MMAL_QUEUE_T) -> *mut MMAL_BUFFER_HEADER_T;
type HeaderReleaseFn = unsafe extern "C" fn(*mut MMAL_BUFFER_HEADER_T);
type FormatCopyFn = unsafe extern "C" fn(*mut MMAL_ES_FORMAT_T, *mut MMAL_ES_FORMAT_T);
type StatusToStringFn = unsafe extern "C" fn(MMAL_STATUS_T) -> *const c_char;

/// Resolved MMAL entry points.
///
/// The libraries stay loaded for as long as this value lives.
pub struct Mmal {
    component_create: ComponentCreateFn,
    component_destroy: ComponentFn,
    port_format_commit: PortFn,
    port_enable: PortEnableFn,
    port_disable: PortFn,
    port_send_buffer: PortSendFn,
    port_parameter_set_boolean: PortSetBoolFn,
    port_pool_create: PoolCreateFn,
    port_pool_destroy: PoolDestroyFn,
    queue_get: QueueGetFn,
    buffer_header_release: HeaderReleaseFn,
    format_copy: FormatCopyFn,
    status_to_string: Option<StatusToStringFn>,
    _libraries: Vec<Library>,
}

unsafe fn lookup<T: Copy>(libraries: &[Library], name: &'static str) -> Result<T, Error> {
    let symbol = format!("{name}\0");
    for lib in libraries {
        if let Ok(sym) = lib.get::<T>(symbol.as_bytes()) {
            return Ok(*sym);
        }
    }
    Err(Error::MissingSymbol(name))
}

impl Mmal {
    /// Loads MMAL from [`DEFAULT_LIBRARIES`].
    ///
    /// # Safety
    ///
    /// Loading a shared library runs its initialisers; the libraries found
    /// must be the genuine VideoCore userland builds.
    pub unsafe fn new() -> Result<Self, Error> {
        Self::with_libraries(DEFAULT_LIBRARIES)
    }

    /// Loads MMAL from an explicit list of libraries.
    ///
    /// # Safety
    ///
    /// See [`Mmal::new`].
    pub unsafe fn with_libraries(names: &[&str]) -> Result<Self, Error> {
        let libraries: Vec<Library> = names
            .iter()
            .filter_map(|name| Library::new(name).ok())
            .collect();
        if libraries.is_empty() {
            return Err(Error::NotFound(names.join(", ")));
        }

        Ok(Self {
            component_create: lookup(&libraries, "mmal_component_create")?,
            component_destroy: lookup(&libraries, "mmal_component_destroy")?,
            port_format_commit: lookup(&libraries, "mmal_port_format_commit")?,
            port_enable: lookup(&libraries, "mmal_port_enable")?,
            port_disable: lookup(&libraries, "mmal_port_disable")?,
            port_send_buffer: lookup(&libraries, "mmal_port_send_buffer")?,
            port_parameter_set_boolean: lookup(&libraries, "mmal_port_parameter_set_boolean")?,
            port_pool_create: lookup(&libraries, "mmal_port_pool_create")?,
            port_pool_destroy: lookup(&libraries, "mmal_port_pool_destroy")?,
            queue_get: lookup(&libraries, "mmal_queue_get")?,
            buffer_header_release: lookup(&libraries, "mmal_buffer_header_release")?,
            format_copy: lookup(&libraries, "mmal_format_copy")?,
            status_to_string: lookup(&libraries, "mmal_status_to_string").ok(),
            _libraries: libraries,
        })
    }

    pub unsafe fn mmal_component_create(
        &self,
        name: *const c_char,
        component: *mut *mut MMAL_COMPONENT_T,
    ) -> MMAL_STATUS_T {
        (self.component_create)(name, component)
    }

    pub unsafe fn mmal_component_destroy(
        &self,
        component: *mut MMAL_COMPONENT_T,
    ) -> MMAL_STATUS_T {
        (self.component_destroy)(component)
    }

    pub unsafe fn mmal_port_format_commit(&self, port: *mut MMAL_PORT_T) -> MMAL_STATUS_T {
        (self.port_format_commit)(port)
    }

    pub unsafe fn mmal_port_enable(
        &self,
        port: *mut MMAL_PORT_T,
        cb: MMAL_PORT_BH_CB_T,
    ) -> MMAL_STATUS_T {
        (self.port_enable)(port, cb)
    }

    pub unsafe fn mmal_port_disable(&self, port: *mut MMAL_PORT_T) -> MMAL_STATUS_T {
        (self.port_disable)(port)
    }

    pub unsafe fn mmal_port_send_buffer(
        &self,
        port: *mut MMAL_PORT_T,
        buffer: *mut MMAL_BUFFER_HEADER_T,
    ) -> MMAL_STATUS_T {
        (self.port_send_buffer)(port, buffer)
    }

    pub unsafe fn mmal_port_parameter_set_boolean(
        &self,
        port: *mut MMAL_PORT_T,
        id: u32,
        value: MMAL_BOOL_T,
    ) -> MMAL_STATUS_T {
        (self.port_parameter_set_boolean)(port, id, value)
    }

    pub unsafe fn mmal_port_pool_create(
        &self,
        port: *mut MMAL_PORT_T,
        headers: u32,
        payload_size: u32,
    ) -> *mut MMAL_POOL_T {
        (self.port_pool_create)(port, headers, payload_size)
    }

    pub unsafe fn mmal_port_pool_destroy(&self, port: *mut MMAL_PORT_T, pool: *mut MMAL_POOL_T) {
        (self.port_pool_destroy)(port, pool)
    }

    pub unsafe fn mmal_queue_get(&self, queue: *mut MMAL_QUEUE_T) -> *mut MMAL_BUFFER_HEADER_T {
        (self.queue_get)(queue)
    }

    pub unsafe fn mmal_buffer_header_release(&self, header: *mut MMAL_BUFFER_HEADER_T) {
        (self.buffer_header_release)(header)
    }

    pub unsafe fn mmal_format_copy(&self, dst: *mut MMAL_ES_FORMAT_T, src: *mut MMAL_ES_FORMAT_T) {
        (self.format_copy)(dst, src)
    }

    /// Human readable text for a status code.
    pub fn status_to_string(&self, status: MMAL_STATUS_T) -> String {
        if let Some(f) = self.status_to_string {
            let s = unsafe { f(status) };
            if !s.is_null() {
                return unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned();
            }
        }
        format!("MMAL status {status}")
    }
}
