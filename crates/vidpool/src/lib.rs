// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! vidpool - V4L2 buffer pools for Rust
//!
//! Manages the buffer pool and pixel-format negotiation for one direction
//! (capture or output) of a V4L2 streaming pipeline backed by memory-mapped or
//! DMA-buf memory.
//!
//! A [`BufferList`](buffer_list::BufferList) is bound to a
//! [`Device`](device::Device) and one buffer type. It negotiates a pixel format
//! with a driver that is free to alter the request, asks the kernel for a pool
//! of buffers and wraps every granted slot in a [`Buffer`](buffer::Buffer), and
//! toggles streaming.
//!
//! # Quick Start
//!
//! ```no_run
//! use vidpool::buffer::V4l2Buffer;
//! use vidpool::buffer_list::BufferList;
//! use vidpool::device::{DeviceConfig, V4l2Device};
//! use vidpool::fourcc::FourCC;
//! use vidpool::format::BufType;
//!
//! let device = V4l2Device::open(&DeviceConfig::default().with_path("/dev/video0"))?;
//! let mut list: BufferList<V4l2Buffer> =
//!     BufferList::open("CAMERA:capture", &device, BufType::VideoCapture.as_raw(), true)?;
//!
//! list.set_format(1920, 1080, FourCC(*b"YUYV"), 0)?;
//! list.request(4)?;
//! list.set_streaming(true)?;
//! // ... queue and dequeue buffers ...
//! list.set_streaming(false)?;
//! list.close();
//! # Ok::<(), vidpool::Error>(())
//! ```
//!
//! # Logging
//!
//! All diagnostics go through the [`log`] facade and are prefixed with the
//! name of the list or buffer that emitted them. Install any `log` backend
//! (for example `env_logger`) to see them.

use std::{error, fmt, io, num::TryFromIntError};

/// Error type for vidpool operations
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied value is not supported (e.g. an unknown buffer type)
    InvalidArgument(String),

    /// A kernel ioctl failed after the device's retry policy gave up
    Ioctl {
        /// Name of the ioctl request, e.g. `VIDIOC_S_FMT`
        request: &'static str,
        /// What the caller was trying to do when the ioctl failed
        context: String,
        /// errno reported by the kernel
        source: io::Error,
    },

    /// The driver could not provide the requested resources
    ResourceExhaustion(String),

    /// A buffer of the pool could not be constructed
    Buffer {
        /// Index of the buffer that failed
        index: u32,
        /// Underlying failure
        source: Box<Error>,
    },

    /// I/O error from underlying system calls (open, mmap, munmap)
    Io(io::Error),

    /// Integer conversion error (try_from failed)
    TryFromInt(TryFromIntError),
}

impl Error {
    /// Build an ioctl failure from an errno value.
    pub fn ioctl(request: &'static str, context: &str, source: io::Error) -> Self {
        Error::Ioctl {
            request,
            context: context.to_owned(),
            source,
        }
    }

    /// The errno carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Ioctl { source, .. } | Error::Io(source) => source.raw_os_error(),
            Error::Buffer { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Ioctl {
                request,
                context,
                source,
            } => write!(f, "{} ({}): {}", context, request, source),
            Error::ResourceExhaustion(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::Buffer { index, source } => {
                write!(f, "cannot open buffer {}: {}", index, source)
            }
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::TryFromInt(err) => write!(f, "Integer conversion error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Ioctl { source, .. } => Some(source),
            Error::Buffer { source, .. } => Some(source.as_ref()),
            Error::Io(err) => Some(err),
            Error::TryFromInt(err) => Some(err),
            Error::InvalidArgument(_) | Error::ResourceExhaustion(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::TryFromInt(err)
    }
}

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// Buffer types, memory modes and format descriptors exchanged with drivers.
pub mod format;

/// The device module provides the ioctl primitive buffer lists are driven by.
pub mod device;

/// The buffer module provides the per-slot buffer abstraction.
pub mod buffer;

/// The buffer_list module provides format negotiation, pool allocation and
/// the streaming state machine.
pub mod buffer_list;

pub use buffer_list::BufferList;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_ioctl_error_display() {
        let err = Error::ioctl(
            "VIDIOC_S_FMT",
            "cannot set format",
            io::Error::from_raw_os_error(22),
        );
        let msg = format!("{}", err);
        assert!(msg.starts_with("cannot set format (VIDIOC_S_FMT)"));
        assert_eq!(err.raw_os_error(), Some(22));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_buffer_error_chain() {
        let err = Error::Buffer {
            index: 3,
            source: Box::new(Error::ioctl(
                "VIDIOC_QUERYBUF",
                "cannot query buffer",
                io::Error::from_raw_os_error(12),
            )),
        };
        assert!(format!("{}", err).starts_with("cannot open buffer 3"));
        assert_eq!(err.raw_os_error(), Some(12));
    }

    #[test]
    fn test_invalid_argument_has_no_source() {
        let err = Error::InvalidArgument("unknown buffer type 7".to_string());
        assert!(err.source().is_none());
        assert_eq!(err.raw_os_error(), None);
    }
}
