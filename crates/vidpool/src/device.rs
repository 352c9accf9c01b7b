// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device handle and ioctl primitive
//!
//! A [`BufferList`](crate::buffer_list::BufferList) never touches a file
//! descriptor directly. Every kernel call goes through [`Device::xioctl`], which
//! takes a typed [`Ioctl`] request and an error context string. This keeps the
//! retry policy inside the device and lets tests substitute a recording double.
//!
//! [`V4l2Device`] is the implementation backed by a `/dev/video*` node.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::raw::c_int;
use std::os::unix::fs::OpenOptionsExt;
use std::{env, io};

use crate::format::{BufType, FormatDescriptor, Memory};
use crate::Error;
use vidpool_sys as ffi;
use vidpool_sys::nix::errno::Errno;

/// Environment variable overriding the default device node.
pub const DEVICE_ENV: &str = "VIDPOOL_DEVICE";

const DEFAULT_DEVICE: &str = "/dev/video0";

/// `VIDIOC_REQBUFS` arguments and result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBuffers {
    /// Requested count in, granted count out
    pub count: u32,
    pub buf_type: BufType,
    pub memory: Memory,
}

/// Location of one plane of a queried buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneInfo {
    pub length: u32,
    /// Offset to pass to `mmap` for MMAP buffers
    pub mem_offset: u32,
}

/// `VIDIOC_QUERYBUF` arguments and result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuffer {
    pub index: u32,
    pub buf_type: BufType,
    pub memory: Memory,
    /// `V4L2_BUF_FLAG_*` reported by the kernel
    pub flags: u32,
    /// One entry for single-plane queues, `length` entries for multi-plane ones
    pub planes: Vec<PlaneInfo>,
}

impl QueryBuffer {
    pub fn new(index: u32, buf_type: BufType, memory: Memory) -> Self {
        QueryBuffer {
            index,
            buf_type,
            memory,
            flags: 0,
            planes: Vec::new(),
        }
    }
}

/// `VIDIOC_EXPBUF` arguments and result
#[derive(Debug)]
pub struct ExportBuffer {
    pub index: u32,
    pub plane: u32,
    pub buf_type: BufType,
    /// DMA-buf descriptor exported by the kernel
    pub fd: Option<OwnedFd>,
}

impl ExportBuffer {
    pub fn new(index: u32, plane: u32, buf_type: BufType) -> Self {
        ExportBuffer {
            index,
            plane,
            buf_type,
            fd: None,
        }
    }
}

/// Typed ioctl request
///
/// Payloads marked `&mut` are in/out: the device writes the kernel's answer
/// back into them.
#[derive(Debug)]
pub enum Ioctl<'a> {
    SetFormat(BufType, &'a mut FormatDescriptor),
    RequestBuffers(&'a mut RequestBuffers),
    QueryBuffer(&'a mut QueryBuffer),
    ExportBuffer(&'a mut ExportBuffer),
    StreamOn(BufType),
    StreamOff(BufType),
}

impl Ioctl<'_> {
    /// Kernel name of the request, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Ioctl::SetFormat(..) => "VIDIOC_S_FMT",
            Ioctl::RequestBuffers(_) => "VIDIOC_REQBUFS",
            Ioctl::QueryBuffer(_) => "VIDIOC_QUERYBUF",
            Ioctl::ExportBuffer(_) => "VIDIOC_EXPBUF",
            Ioctl::StreamOn(_) => "VIDIOC_STREAMON",
            Ioctl::StreamOff(_) => "VIDIOC_STREAMOFF",
        }
    }
}

/// Handle to a video device
///
/// Implementations must be shareable: several buffer lists (typically the
/// capture and output queue of one M2M device) hold `&dyn Device` at once and
/// may be driven from different threads.
pub trait Device: Send + Sync {
    /// Display name used as the log prefix.
    fn name(&self) -> &str;

    /// Descriptor buffers are memory-mapped from, if the device has one.
    fn fd(&self) -> Option<BorrowedFd<'_>>;

    /// Execute `request`, retrying transient failures.
    ///
    /// On failure returns [`Error::Ioctl`] carrying `context`.
    fn xioctl(&self, request: Ioctl<'_>, context: &str) -> Result<(), Error>;
}

/// Configuration for opening a [`V4l2Device`]
///
/// # Example
///
/// ```no_run
/// use vidpool::device::{DeviceConfig, V4l2Device};
///
/// let config = DeviceConfig::default()
///     .with_path("/dev/video3")
///     .with_name("CAMERA");
/// let device = V4l2Device::open(&config)?;
/// # Ok::<(), vidpool::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// device node, defaults to `$VIDPOOL_DEVICE` or `/dev/video0`
    path: String,

    /// log prefix, defaults to the path
    name: Option<String>,

    /// open with `O_NONBLOCK`, default true
    nonblocking: bool,
}

impl DeviceConfig {
    pub fn with_path(self, path: &str) -> DeviceConfig {
        DeviceConfig {
            path: path.to_owned(),
            ..self
        }
    }

    pub fn with_name(self, name: &str) -> DeviceConfig {
        DeviceConfig {
            name: Some(name.to_owned()),
            ..self
        }
    }

    pub fn with_nonblocking(self, nonblocking: bool) -> DeviceConfig {
        DeviceConfig {
            nonblocking,
            ..self
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    pub fn nonblocking(&self) -> bool {
        self.nonblocking
    }
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            path: env::var(DEVICE_ENV).unwrap_or_else(|_| DEFAULT_DEVICE.to_owned()),
            name: None,
            nonblocking: true,
        }
    }
}

/// A `/dev/video*` node
#[derive(Debug)]
pub struct V4l2Device {
    name: String,
    path: String,
    file: File,
}

impl V4l2Device {
    pub fn open(config: &DeviceConfig) -> Result<Self, Error> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if config.nonblocking() {
            options.custom_flags(ffi::nix::libc::O_NONBLOCK);
        }

        let file = options.open(config.path())?;
        log::debug!(
            "{}: opened {} (fd={})",
            config.name(),
            config.path(),
            file.as_raw_fd()
        );

        Ok(V4l2Device {
            name: config.name().to_owned(),
            path: config.path().to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn set_format(&self, buf_type: BufType, format: &mut FormatDescriptor) -> Result<(), Errno> {
        let mut raw = format.to_v4l2(buf_type);
        retry(|| unsafe { ffi::vidioc_s_fmt(self.raw_fd(), &mut raw) })?;
        format.update_from_v4l2(&raw);
        Ok(())
    }

    fn request_buffers(&self, req: &mut RequestBuffers) -> Result<(), Errno> {
        let mut raw = ffi::v4l2_requestbuffers {
            count: req.count,
            type_: req.buf_type.as_raw(),
            memory: req.memory.as_raw(),
            ..Default::default()
        };
        retry(|| unsafe { ffi::vidioc_reqbufs(self.raw_fd(), &mut raw) })?;
        req.count = raw.count;
        Ok(())
    }

    fn query_buffer(&self, query: &mut QueryBuffer) -> Result<(), Errno> {
        let mut planes = [ffi::v4l2_plane::default(); ffi::VIDEO_MAX_PLANES];
        let mut raw = ffi::v4l2_buffer {
            index: query.index,
            type_: query.buf_type.as_raw(),
            memory: query.memory.as_raw(),
            ..Default::default()
        };
        if query.buf_type.is_multiplanar() {
            raw.m.planes = planes.as_mut_ptr();
            raw.length = ffi::VIDEO_MAX_PLANES as u32;
        }

        // `planes` outlives the call, the kernel writes at most `length` entries
        retry(|| unsafe { ffi::vidioc_querybuf(self.raw_fd(), &mut raw) })?;

        query.flags = raw.flags;
        query.planes = if query.buf_type.is_multiplanar() {
            let count = (raw.length as usize).min(ffi::VIDEO_MAX_PLANES);
            planes[..count]
                .iter()
                .map(|plane| PlaneInfo {
                    length: plane.length,
                    // SAFETY: MMAP queries fill in mem_offset
                    mem_offset: unsafe { plane.m.mem_offset },
                })
                .collect()
        } else {
            vec![PlaneInfo {
                length: raw.length,
                // SAFETY: single-plane queries fill in offset
                mem_offset: unsafe { raw.m.offset },
            }]
        };
        Ok(())
    }

    fn export_buffer(&self, export: &mut ExportBuffer) -> Result<(), Errno> {
        let mut raw = ffi::v4l2_exportbuffer {
            type_: export.buf_type.as_raw(),
            index: export.index,
            plane: export.plane,
            flags: (ffi::nix::libc::O_RDWR | ffi::nix::libc::O_CLOEXEC) as u32,
            ..Default::default()
        };
        retry(|| unsafe { ffi::vidioc_expbuf(self.raw_fd(), &mut raw) })?;
        // SAFETY: the kernel just handed us ownership of this descriptor
        export.fd = Some(unsafe { OwnedFd::from_raw_fd(raw.fd) });
        Ok(())
    }

    fn stream(&self, buf_type: BufType, on: bool) -> Result<(), Errno> {
        let type_: c_int = buf_type.as_raw() as c_int;
        if on {
            retry(|| unsafe { ffi::vidioc_streamon(self.raw_fd(), &type_) })?;
        } else {
            retry(|| unsafe { ffi::vidioc_streamoff(self.raw_fd(), &type_) })?;
        }
        Ok(())
    }

    fn raw_fd(&self) -> c_int {
        self.file.as_raw_fd()
    }
}

impl Device for V4l2Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.file.as_fd())
    }

    fn xioctl(&self, request: Ioctl<'_>, context: &str) -> Result<(), Error> {
        let name = request.name();
        log::trace!("{}: {}", self.name, name);

        let result = match request {
            Ioctl::SetFormat(buf_type, format) => self.set_format(buf_type, format),
            Ioctl::RequestBuffers(req) => self.request_buffers(req),
            Ioctl::QueryBuffer(query) => self.query_buffer(query),
            Ioctl::ExportBuffer(export) => self.export_buffer(export),
            Ioctl::StreamOn(buf_type) => self.stream(buf_type, true),
            Ioctl::StreamOff(buf_type) => self.stream(buf_type, false),
        };

        result.map_err(|errno| {
            log::error!("{}: {} failed: {} ({})", self.name, name, context, errno);
            Error::ioctl(name, context, io::Error::from(errno))
        })
    }
}

/// Restart an ioctl interrupted by a signal.
fn retry<F>(mut call: F) -> Result<c_int, Errno>
where
    F: FnMut() -> Result<c_int, Errno>,
{
    loop {
        match call() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}
