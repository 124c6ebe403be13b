// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error type shared by the buffer ring, its ports and the binary.
//!
//! Every failure the ring can report maps onto one [`Error`] variant. Setup
//! failures are returned as values so callers (and tests) can observe them;
//! only the binary turns them into a non-zero exit status.

use crate::pool::BufferState;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The external entity rejected the requested format.
    #[error("{op}: format unsupported: {detail}")]
    FormatUnsupported { op: &'static str, detail: String },

    /// Fewer buffers (or less memory) granted than required.
    #[error("{op}: resource exhausted: {detail}")]
    ResourceExhausted { op: &'static str, detail: String },

    /// Transport level failure reported by the kernel driver or firmware.
    #[error("{op} failed {code}({message})")]
    Device {
        op: &'static str,
        code: i32,
        message: String,
    },

    #[error("short read from {path:?}: expected {expected} bytes, read {actual}")]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("short write to {path:?}: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No `Free` buffer left in the pool.
    #[error("pool {pool}: no free buffer")]
    PoolExhausted { pool: String },

    /// A transition the ownership protocol does not allow.
    #[error("pool {pool}: {op} not allowed on buffer {index} in state {state:?}")]
    ContractViolation {
        pool: String,
        index: usize,
        state: BufferState,
        op: &'static str,
    },

    /// The buffer index does not belong to the pool.
    #[error("pool {pool}: invalid buffer index {index} (pool size {count})")]
    InvalidIndex {
        pool: String,
        index: usize,
        count: usize,
    },

    /// Teardown attempted while the external entity still holds buffers.
    #[error("pool {pool}: {in_flight} buffer(s) still owned by the external entity")]
    ResourceBusy { pool: String, in_flight: usize },

    /// A fill reported more bytes than the buffer can hold.
    #[error("buffer {index}: length {length} exceeds capacity {capacity}")]
    Overflow {
        index: usize,
        length: usize,
        capacity: usize,
    },

    #[error("{op}: no completion within {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A failure raised while the ring was already running, as opposed to
    /// one raised during setup.
    #[error("steady-state failure at cycle {cycle}: {source}")]
    Session {
        cycle: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Builds a [`Error::Device`] from an errno style failure.
    pub fn device(op: &'static str, err: impl Into<io::Error>) -> Self {
        let err = err.into();
        let code = err.raw_os_error().unwrap_or(-1);
        let message = match code {
            -1 => err.to_string(),
            code => io::Error::from_raw_os_error(code).to_string(),
        };
        Error::Device { op, code, message }
    }

    /// Builds a [`Error::Device`] from a firmware status code and its text.
    pub fn firmware(op: &'static str, code: i32, message: impl Into<String>) -> Self {
        Error::Device {
            op,
            code,
            message: message.into(),
        }
    }

    /// Programming errors: these are unreachable when the ownership protocol
    /// is followed.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::ContractViolation { .. } | Error::PoolExhausted { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
