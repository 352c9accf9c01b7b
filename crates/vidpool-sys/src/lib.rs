// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Raw bindings to the subset of `linux/videodev2.h` used by vidpool.
//!
//! Structures mirror the kernel layout exactly; the ioctl request numbers are
//! derived from their sizes, so any layout drift turns into `ENOTTY` at
//! runtime. The size tests at the bottom pin the 64-bit layouts.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use std::mem;
use std::os::raw::{c_int, c_ulong};

// Re-export nix for errno handling in the safe crate
pub use nix;

pub const VIDEO_MAX_PLANES: usize = 8;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;

pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;
pub const V4L2_MEMORY_DMABUF: u32 = 4;

pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_NONE: u32 = 1;

pub const V4L2_COLORSPACE_DEFAULT: u32 = 0;
pub const V4L2_COLORSPACE_JPEG: u32 = 7;
pub const V4L2_COLORSPACE_RAW: u32 = 11;

pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x0000_0001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x0000_0002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x0000_0004;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
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

#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

/// The `fmt` union of `struct v4l2_format`.
///
/// Only the pixel arms are spelled out; `raw_data` keeps the kernel size and
/// `_align` the pointer alignment contributed by `struct v4l2_window`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format__fmt {
    pub pix: v4l2_pix_format,
    pub pix_mp: v4l2_pix_format_mplane,
    pub raw_data: [u8; 200],
    pub _align: [usize; 0],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format__fmt,
}

impl Default for v4l2_format {
    fn default() -> Self {
        // SAFETY: plain-old-data, all-zero is a valid value for every arm
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_plane__m {
    pub mem_offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane__m,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

impl Default for v4l2_plane {
    fn default() -> Self {
        // SAFETY: plain-old-data
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
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
#[derive(Clone, Copy)]
pub union v4l2_buffer__m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: nix::libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer__m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // SAFETY: plain-old-data, a null planes pointer is valid until set
        unsafe { mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_exportbuffer {
    pub type_: u32,
    pub index: u32,
    pub plane: u32,
    pub flags: u32,
    pub fd: i32,
    pub reserved: [u32; 11],
}

/// Returns true for the multi-planar buffer types.
pub fn is_multiplanar(type_: u32) -> bool {
    matches!(
        type_,
        V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE | V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE
    )
}

const VIDIOC: u8 = b'V';

nix::ioctl_readwrite!(vidioc_s_fmt, VIDIOC, 5, v4l2_format);
nix::ioctl_readwrite!(vidioc_reqbufs, VIDIOC, 8, v4l2_requestbuffers);
nix::ioctl_readwrite!(vidioc_querybuf, VIDIOC, 9, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_expbuf, VIDIOC, 16, v4l2_exportbuffer);
nix::ioctl_write_ptr!(vidioc_streamon, VIDIOC, 18, c_int);
nix::ioctl_write_ptr!(vidioc_streamoff, VIDIOC, 19, c_int);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(mem::size_of::<v4l2_pix_format>(), 48);
        assert_eq!(mem::size_of::<v4l2_plane_pix_format>(), 20);
        assert_eq!(mem::size_of::<v4l2_pix_format_mplane>(), 192);
        assert_eq!(mem::size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(mem::size_of::<v4l2_exportbuffer>(), 64);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_pointer_sized_layouts() {
        assert_eq!(mem::size_of::<v4l2_format>(), 208);
        assert_eq!(mem::size_of::<v4l2_plane>(), 64);
        assert_eq!(mem::size_of::<v4l2_buffer>(), 88);
    }

    #[test]
    fn test_multiplanar_types() {
        assert!(is_multiplanar(V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE));
        assert!(is_multiplanar(V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE));
        assert!(!is_multiplanar(V4L2_BUF_TYPE_VIDEO_CAPTURE));
        assert!(!is_multiplanar(V4L2_BUF_TYPE_VIDEO_OUTPUT));
    }

    #[test]
    fn test_zeroed_defaults() {
        let fmt = v4l2_format::default();
        assert_eq!(fmt.type_, 0);
        let buf = v4l2_buffer::default();
        assert_eq!(buf.index, 0);
        assert_eq!(unsafe { buf.m.offset }, 0);
    }
}
