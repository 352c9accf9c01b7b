// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffers owned by a [`BufferList`]
//!
//! [`Buffer`] is the contract a list uses to build and release its slots.
//! [`V4l2Buffer`] is the kernel-backed implementation: it queries each slot,
//! maps its planes for MMAP lists and exports capture buffers as [`DmaBuf`].

use crate::{
    buffer_list::BufferList,
    device::{ExportBuffer, Ioctl, QueryBuffer},
    Error,
};
use dma_buf::DmaBuf;
use std::{
    ffi::c_void,
    fmt, io,
    num::NonZeroUsize,
    os::fd::{FromRawFd, IntoRawFd},
    ptr::NonNull,
    slice,
};
use vidpool_sys as ffi;
use vidpool_sys::nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

/// One slot of a buffer pool
///
/// A buffer is created by [`BufferList::request`] for every slot the driver
/// granted and is owned by that list for its whole life.
pub trait Buffer: Sized {
    /// Construct the buffer for slot `index` of `list`.
    ///
    /// The list has already negotiated its format and requested its buffers,
    /// so its memory mode and device are final.
    fn open(name: String, list: &BufferList<'_, Self>, index: u32) -> Result<Self, Error>;

    /// Release the mapping or handle. Must tolerate being called twice.
    fn close(&mut self);

    /// Whether the buffer is currently queued with the driver.
    fn is_enqueued(&self) -> bool;
}

struct Mapping {
    ptr: NonNull<c_void>,
    length: usize,
}

/// Kernel buffer of a V4L2 queue
///
/// For MMAP lists every plane is mapped shared read/write into the process.
/// Capture lists using MMAP also export plane 0 as a DMA-buf so that the frame
/// can be passed to another device without a copy.
pub struct V4l2Buffer {
    name: String,
    index: u32,
    lengths: Vec<u32>,
    mappings: Vec<Mapping>,
    dmabuf: Option<DmaBuf>,
    enqueued: bool,
}

// The mappings are owned exclusively by this buffer and only released in close
unsafe impl Send for V4l2Buffer {}

impl V4l2Buffer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of planes reported by the driver.
    pub fn planes(&self) -> usize {
        self.lengths.len()
    }

    /// Length in bytes of `plane`.
    pub fn length(&self, plane: usize) -> Option<u32> {
        self.lengths.get(plane).copied()
    }

    /// Mapped memory of `plane`, `None` for DMA-buf imports or after close.
    pub fn plane(&self, plane: usize) -> Option<&[u8]> {
        self.mappings.get(plane).map(|mapping| {
            // SAFETY: the mapping is live until close, which needs &mut self
            unsafe { slice::from_raw_parts(mapping.ptr.as_ptr() as *const u8, mapping.length) }
        })
    }

    /// Writable mapped memory of `plane`.
    pub fn plane_mut(&mut self, plane: usize) -> Option<&mut [u8]> {
        self.mappings.get_mut(plane).map(|mapping| {
            // SAFETY: as above, and &mut self guarantees exclusivity
            unsafe { slice::from_raw_parts_mut(mapping.ptr.as_ptr() as *mut u8, mapping.length) }
        })
    }

    /// Exported DMA-buf of plane 0, present for MMAP capture lists.
    pub fn dmabuf(&self) -> Option<&DmaBuf> {
        self.dmabuf.as_ref()
    }

    /// Record a queue or dequeue performed by the owner of the pool.
    pub fn set_enqueued(&mut self, enqueued: bool) {
        self.enqueued = enqueued;
    }

    fn map_planes(&mut self, list: &BufferList<'_, Self>, query: &QueryBuffer) -> Result<(), Error> {
        let fd = list.device().fd().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{}: device {} cannot be memory-mapped",
                self.name,
                list.device().name()
            ))
        })?;

        for (plane, info) in query.planes.iter().enumerate() {
            let length = NonZeroUsize::new(usize::try_from(info.length)?).ok_or_else(|| {
                Error::InvalidArgument(format!("{}: plane {} has zero length", self.name, plane))
            })?;

            // SAFETY: offset and length come from VIDIOC_QUERYBUF for this fd
            let ptr = unsafe {
                mmap(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    fd,
                    info.mem_offset.into(),
                )
            }
            .map_err(io::Error::from)?;

            log::trace!(
                "{}: mapped plane {} ({} bytes at offset {})",
                self.name,
                plane,
                info.length,
                info.mem_offset
            );
            self.mappings.push(Mapping {
                ptr,
                length: length.get(),
            });
        }

        Ok(())
    }

    fn export(&mut self, list: &BufferList<'_, Self>) -> Result<(), Error> {
        let mut export = ExportBuffer::new(self.index, 0, list.buf_type());
        list.device()
            .xioctl(Ioctl::ExportBuffer(&mut export), "cannot export buffer")?;

        if let Some(fd) = export.fd.take() {
            // SAFETY: DmaBuf takes over the descriptor we own
            self.dmabuf = Some(unsafe { DmaBuf::from_raw_fd(fd.into_raw_fd()) });
        }
        Ok(())
    }
}

impl Buffer for V4l2Buffer {
    fn open(name: String, list: &BufferList<'_, Self>, index: u32) -> Result<Self, Error> {
        let mut query = QueryBuffer::new(index, list.buf_type(), list.memory());
        list.device()
            .xioctl(Ioctl::QueryBuffer(&mut query), "cannot query buffer")?;

        // Dropped (and so closed) on any error below
        let mut buf = V4l2Buffer {
            name,
            index,
            lengths: query.planes.iter().map(|plane| plane.length).collect(),
            mappings: Vec::new(),
            dmabuf: None,
            enqueued: query.flags & ffi::V4L2_BUF_FLAG_QUEUED != 0,
        };

        if list.do_mmap() {
            buf.map_planes(list, &query)?;
        }
        if list.do_dma() {
            buf.export(list)?;
        }

        log::debug!(
            "{}: opened {} plane(s), lengths {:?}, dmabuf={}",
            buf.name,
            buf.lengths.len(),
            buf.lengths,
            buf.dmabuf.is_some()
        );
        Ok(buf)
    }

    fn close(&mut self) {
        for mapping in self.mappings.drain(..) {
            // SAFETY: ptr/length are exactly what mmap returned
            if let Err(err) = unsafe { munmap(mapping.ptr, mapping.length) } {
                log::error!("{}: munmap failed: {}", self.name, err);
            }
        }
        if self.dmabuf.take().is_some() {
            log::trace!("{}: released dmabuf", self.name);
        }
        self.enqueued = false;
    }

    fn is_enqueued(&self) -> bool {
        self.enqueued
    }
}

impl Drop for V4l2Buffer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for V4l2Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V4l2Buffer")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("lengths", &self.lengths)
            .field("mapped", &!self.mappings.is_empty())
            .field("dmabuf", &self.dmabuf.is_some())
            .field("enqueued", &self.enqueued)
            .finish()
    }
}

impl fmt::Display for V4l2Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} index:{} lengths:{:?}", self.name, self.index, self.lengths)
    }
}
