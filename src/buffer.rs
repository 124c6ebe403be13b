// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffers exchanged with the external entity and the memory behind them.

use crate::error::{Error, Result};
use dma_heap::{Heap, HeapKind};
use libc::{mmap, munmap, off_t, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};
use std::{
    ffi::c_void,
    fmt, io, ops,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    ptr::null_mut,
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, warn};
use unix_ts::Timestamp;

/// Per-fill flags reported by the external entity.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    /// End of stream.
    pub const EOS: BufferFlags = BufferFlags(1 << 0);
    /// The buffer holds the end of a frame (a complete frame when set alone).
    pub const FRAME_END: BufferFlags = BufferFlags(1 << 2);
    pub const KEYFRAME: BufferFlags = BufferFlags(1 << 3);
    /// The entity flagged the contents as corrupted or failed.
    pub const ERROR: BufferFlags = BufferFlags(1 << 9);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BufferFlags({:#06x})", self.0)
    }
}

/// Metadata describing the most recent fill of a buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferMeta {
    /// Valid bytes, never larger than the buffer capacity.
    pub length: usize,
    /// Entity assigned sequence number, capture direction only.
    pub sequence: Option<u32>,
    pub flags: BufferFlags,
    /// Opaque timestamp for latency accounting, never used for ordering.
    pub timestamp: Option<Timestamp>,
}

/// Memory region mapped into our address space with `mmap(2)`.
///
/// The mapping is removed when dropped.
///
/// # Safety
///
/// While the API is safe, the external entity may write the region while the
/// buffer is submitted. The pool only hands out a `Buffer` while the
/// application owns it, which is what keeps CPU and device accesses apart.
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the region is plain memory; exclusive access follows the owning
// `Buffer` value, which moves between threads as a whole.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` starting at `offset`.
    pub fn map(fd: BorrowedFd<'_>, len: usize, offset: u64) -> io::Result<Self> {
        let offset = off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mmap offset too large"))?;
        let ptr = unsafe {
            mmap(
                null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd.as_raw_fd(),
                offset,
            )
        };
        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr.cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed: {}", io::Error::last_os_error());
        }
    }
}

/// CMA allocation from the DMA heap, mapped for CPU access.
///
/// The file descriptor can be handed to a V4L2 device queue in `DMABUF` mode
/// so the device writes straight into application allocated memory.
pub struct DmaRegion {
    map: MappedRegion,
    fd: OwnedFd,
}

impl DmaRegion {
    pub fn allocate(len: usize) -> Result<Self> {
        let heap = Heap::new(HeapKind::Cma).map_err(|e| Error::ResourceExhausted {
            op: "dma heap open",
            detail: e.to_string(),
        })?;
        let fd = heap.allocate(len).map_err(|e| Error::ResourceExhausted {
            op: "dma heap allocate",
            detail: format!("{len} bytes: {e}"),
        })?;
        let map = MappedRegion::map(fd.as_fd(), len, 0).map_err(|e| Error::device("mmap", e))?;
        debug!(len, fd = fd.as_raw_fd(), "dma buffer allocated");
        Ok(Self { map, fd })
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Memory owned by firmware and only borrowed by us, such as the payload
/// of an MMAL buffer header.
pub struct ForeignRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: see `MappedRegion`.
unsafe impl Send for ForeignRegion {}

impl ForeignRegion {
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes that stay valid, and are not accessed
    /// by anyone else while the application owns the buffer, until the
    /// region is dropped.
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }
}

/// Backing store of a [`Buffer`].
pub enum BufferMemory {
    /// Application heap memory, used by the simulated entities.
    Heap(Box<[u8]>),
    /// Region owned by the kernel driver and mapped by us.
    Mapped(MappedRegion),
    /// Region allocated by us from the DMA heap and shared with the driver.
    Dma(DmaRegion),
    /// Region owned by firmware.
    Foreign(ForeignRegion),
}

impl BufferMemory {
    pub fn heap(len: usize) -> Self {
        BufferMemory::Heap(vec![0u8; len].into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        match self {
            BufferMemory::Heap(b) => b.len(),
            BufferMemory::Mapped(m) => m.len(),
            BufferMemory::Dma(d) => d.map.len(),
            BufferMemory::Foreign(f) => f.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            BufferMemory::Heap(b) => &b[..],
            BufferMemory::Mapped(m) => m.as_slice(),
            BufferMemory::Dma(d) => d.map.as_slice(),
            BufferMemory::Foreign(f) => unsafe { from_raw_parts(f.ptr, f.len) },
        }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        match self {
            BufferMemory::Heap(b) => &mut b[..],
            BufferMemory::Mapped(m) => m.as_slice_mut(),
            BufferMemory::Dma(d) => d.map.as_slice_mut(),
            BufferMemory::Foreign(f) => unsafe { from_raw_parts_mut(f.ptr, f.len) },
        }
    }

    /// The dma-buf file descriptor when the memory can be imported by a
    /// device.
    pub fn dma_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            BufferMemory::Dma(d) => Some(d.fd()),
            _ => None,
        }
    }
}

/// One fixed-capacity memory region plus the metadata of its last fill.
///
/// A `Buffer` value is the ownership token: whoever holds it may touch the
/// memory. Submitting moves it to the external entity, a completion moves it
/// back.
pub struct Buffer {
    index: usize,
    memory: BufferMemory,
    meta: BufferMeta,
}

impl Buffer {
    pub fn new(index: usize, memory: BufferMemory) -> Self {
        Self {
            index,
            memory,
            meta: BufferMeta::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.meta.length
    }

    pub fn is_empty(&self) -> bool {
        self.meta.length == 0
    }

    /// The valid bytes of the last fill. Empty for a released buffer.
    pub fn data(&self) -> &[u8] {
        &self.memory.as_slice()[..self.meta.length]
    }

    /// The whole capacity, for filling an input buffer before submission.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.memory.as_slice_mut()
    }

    pub fn meta(&self) -> &BufferMeta {
        &self.meta
    }

    pub fn sequence(&self) -> Option<u32> {
        self.meta.sequence
    }

    pub fn flags(&self) -> BufferFlags {
        self.meta.flags
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.meta.timestamp
    }

    pub fn memory(&self) -> &BufferMemory {
        &self.memory
    }

    pub fn set_length(&mut self, length: usize) -> Result<()> {
        if length > self.capacity() {
            return Err(Error::Overflow {
                index: self.index,
                length,
                capacity: self.capacity(),
            });
        }
        self.meta.length = length;
        Ok(())
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.meta.flags = flags;
    }

    pub fn set_timestamp(&mut self, timestamp: Option<Timestamp>) {
        self.meta.timestamp = timestamp;
    }

    /// Records a fill reported by the external entity.
    pub fn record_fill(&mut self, meta: BufferMeta) -> Result<()> {
        self.set_length(meta.length)?;
        self.meta = meta;
        Ok(())
    }

    pub(crate) fn clear_meta(&mut self) {
        self.meta = BufferMeta::default();
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("capacity", &self.capacity())
            .field("meta", &self.meta)
            .finish()
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "buffer {} {}/{} bytes seq:{:?} flags:{:#x}",
            self.index,
            self.meta.length,
            self.capacity(),
            self.meta.sequence,
            self.meta.flags.bits()
        )
    }
}
