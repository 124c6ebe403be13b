// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Whole-frame file transfers.

use crate::error::{Error, Result};
use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::Path,
};
use tracing::debug;

/// Fills `buffer` completely from the start of `path`.
///
/// A file shorter than the buffer is an [`Error::ShortRead`]; any extra
/// bytes in the file are ignored.
pub fn read_exact(path: &Path, buffer: &mut [u8]) -> Result<usize> {
    let mut file = File::open(path).map_err(|source| Error::Io {
        op: "open",
        path: path.to_path_buf(),
        source,
    })?;

    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(Error::Io {
                    op: "read",
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    if filled < buffer.len() {
        return Err(Error::ShortRead {
            path: path.to_path_buf(),
            expected: buffer.len(),
            actual: filled,
        });
    }
    debug!(path = %path.display(), bytes = filled, "read frame");
    Ok(filled)
}

/// Writes `bytes` to `path`, creating or truncating it.
pub fn write_exact(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| Error::Io {
            op: "create",
            path: path.to_path_buf(),
            source,
        })?;

    let mut written = 0;
    while written < bytes.len() {
        match file.write(&bytes[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(Error::Io {
                    op: "write",
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    if written < bytes.len() {
        return Err(Error::ShortWrite {
            path: path.to_path_buf(),
            expected: bytes.len(),
            actual: written,
        });
    }
    debug!(path = %path.display(), bytes = written, "wrote frame");
    Ok(())
}
