// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer types, memory modes and format descriptors
//!
//! This module defines the values exchanged with a driver during format
//! negotiation and pool allocation:
//!
//! - [`BufType`] - The four supported stream types (capture/output × single/multi-plane)
//! - [`Memory`] - How buffer memory is provided (kernel MMAP or external DMA-buf)
//! - [`FormatDescriptor`] - Single- or multi-plane format request, as a tagged variant
//! - [`NegotiatedFormat`] - The values the driver actually accepted
//!
//! Conversions to and from the raw `videodev2.h` structures live here as well so
//! that the unions of the kernel ABI never leak past this module.

use std::fmt;

use crate::fourcc::FourCC;
use vidpool_sys as ffi;

/// Field order accepted by the driver's choice.
pub const FIELD_ANY: u32 = ffi::V4L2_FIELD_ANY;

/// Colorspace requested for multi-plane (encoder/ISP) formats.
pub const COLORSPACE_JPEG: u32 = ffi::V4L2_COLORSPACE_JPEG;

/// Colorspace requested for single-plane (raw sensor) formats.
pub const COLORSPACE_RAW: u32 = ffi::V4L2_COLORSPACE_RAW;

/// Stream type of a buffer queue
///
/// | Type | Direction | Layout |
/// |------|-----------|--------|
/// | [`BufType::VideoCapture`] | device → memory | single plane |
/// | [`BufType::VideoOutput`] | memory → device | single plane |
/// | [`BufType::VideoCaptureMplane`] | device → memory | multi-plane |
/// | [`BufType::VideoOutputMplane`] | memory → device | multi-plane |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufType {
    VideoCapture = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
    VideoOutput = ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT,
    VideoCaptureMplane = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    VideoOutputMplane = ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
}

impl BufType {
    /// Convert from the raw `V4L2_BUF_TYPE_*` value
    ///
    /// Returns `None` for every type a buffer list cannot drive (overlay, VBI,
    /// SDR, metadata, ...).
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE => Some(BufType::VideoCapture),
            ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT => Some(BufType::VideoOutput),
            ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE => Some(BufType::VideoCaptureMplane),
            ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => Some(BufType::VideoOutputMplane),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Whether buffers flow from the device to memory.
    pub fn is_capture(self) -> bool {
        matches!(self, BufType::VideoCapture | BufType::VideoCaptureMplane)
    }

    /// Whether the queue uses the multi-planar API.
    pub fn is_multiplanar(self) -> bool {
        ffi::is_multiplanar(self.as_raw())
    }

    pub fn name(self) -> &'static str {
        match self {
            BufType::VideoCapture => "VIDEO_CAPTURE",
            BufType::VideoOutput => "VIDEO_OUTPUT",
            BufType::VideoCaptureMplane => "VIDEO_CAPTURE_MPLANE",
            BufType::VideoOutputMplane => "VIDEO_OUTPUT_MPLANE",
        }
    }
}

impl fmt::Display for BufType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Buffer memory mode
///
/// | Mode | Allocation |
/// |------|------------|
/// | [`Memory::Mmap`] | Kernel allocates, user maps |
/// | [`Memory::DmaBuf`] | User passes dmabuf file descriptors |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Memory {
    Mmap = ffi::V4L2_MEMORY_MMAP,
    DmaBuf = ffi::V4L2_MEMORY_DMABUF,
}

impl Memory {
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memory::Mmap => write!(f, "MMAP"),
            Memory::DmaBuf => write!(f, "DMABUF"),
        }
    }
}

/// Single-plane pixel format (`struct v4l2_pix_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub field: u32,
    pub bytes_per_line: u32,
    pub size_image: u32,
    pub colorspace: u32,
}

/// Per-plane layout of a multi-plane format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// Multi-plane pixel format (`struct v4l2_pix_format_mplane`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixFormatMplane {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub field: u32,
    pub colorspace: u32,
    /// At most `VIDEO_MAX_PLANES` entries are sent to the driver
    pub planes: Vec<PlaneFormat>,
}

/// Format request and driver answer for `VIDIOC_S_FMT`
///
/// The kernel carries both layouts in one union; here the arm is explicit and
/// chosen by whether the queue is multi-planar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDescriptor {
    SinglePlane(PixFormat),
    MultiPlane(PixFormatMplane),
}

impl FormatDescriptor {
    pub fn width(&self) -> u32 {
        match self {
            FormatDescriptor::SinglePlane(pix) => pix.width,
            FormatDescriptor::MultiPlane(pix_mp) => pix_mp.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            FormatDescriptor::SinglePlane(pix) => pix.height,
            FormatDescriptor::MultiPlane(pix_mp) => pix_mp.height,
        }
    }

    pub fn pixel_format(&self) -> FourCC {
        match self {
            FormatDescriptor::SinglePlane(pix) => pix.pixel_format,
            FormatDescriptor::MultiPlane(pix_mp) => pix_mp.pixel_format,
        }
    }

    /// Stride of the first plane, zero when the driver reported no planes.
    pub fn bytes_per_line(&self) -> u32 {
        match self {
            FormatDescriptor::SinglePlane(pix) => pix.bytes_per_line,
            FormatDescriptor::MultiPlane(pix_mp) => pix_mp
                .planes
                .first()
                .map(|plane| plane.bytes_per_line)
                .unwrap_or(0),
        }
    }

    pub fn colorspace(&self) -> u32 {
        match self {
            FormatDescriptor::SinglePlane(pix) => pix.colorspace,
            FormatDescriptor::MultiPlane(pix_mp) => pix_mp.colorspace,
        }
    }

    /// Snapshot of the values a driver accepted.
    pub fn negotiated(&self) -> NegotiatedFormat {
        NegotiatedFormat {
            width: self.width(),
            height: self.height(),
            pixel_format: self.pixel_format(),
            bytes_per_line: self.bytes_per_line(),
            colorspace: self.colorspace(),
        }
    }

    /// Build the kernel structure for `VIDIOC_S_FMT`.
    pub(crate) fn to_v4l2(&self, buf_type: BufType) -> ffi::v4l2_format {
        let mut raw = ffi::v4l2_format {
            type_: buf_type.as_raw(),
            ..Default::default()
        };

        match self {
            FormatDescriptor::SinglePlane(pix) => {
                raw.fmt.pix = ffi::v4l2_pix_format {
                    width: pix.width,
                    height: pix.height,
                    pixelformat: pix.pixel_format.as_u32(),
                    field: pix.field,
                    bytesperline: pix.bytes_per_line,
                    sizeimage: pix.size_image,
                    colorspace: pix.colorspace,
                    ..Default::default()
                };
            }
            FormatDescriptor::MultiPlane(pix_mp) => {
                let mut plane_fmt = [ffi::v4l2_plane_pix_format::default(); ffi::VIDEO_MAX_PLANES];
                let planes = pix_mp.planes.iter().take(ffi::VIDEO_MAX_PLANES);
                for (slot, plane) in plane_fmt.iter_mut().zip(planes) {
                    slot.bytesperline = plane.bytes_per_line;
                    slot.sizeimage = plane.size_image;
                }

                raw.fmt.pix_mp = ffi::v4l2_pix_format_mplane {
                    width: pix_mp.width,
                    height: pix_mp.height,
                    pixelformat: pix_mp.pixel_format.as_u32(),
                    field: pix_mp.field,
                    colorspace: pix_mp.colorspace,
                    plane_fmt,
                    num_planes: pix_mp.planes.len().min(ffi::VIDEO_MAX_PLANES) as u8,
                    ..Default::default()
                };
            }
        }

        raw
    }

    /// Overwrite this descriptor with what the driver wrote back, keeping
    /// the arm it was sent with.
    pub(crate) fn update_from_v4l2(&mut self, raw: &ffi::v4l2_format) {
        match self {
            FormatDescriptor::SinglePlane(pix) => {
                // SAFETY: the single-plane arm was written for this request
                let kpix = unsafe { raw.fmt.pix };
                *pix = PixFormat {
                    width: kpix.width,
                    height: kpix.height,
                    pixel_format: FourCC::from_u32(kpix.pixelformat),
                    field: kpix.field,
                    bytes_per_line: kpix.bytesperline,
                    size_image: kpix.sizeimage,
                    colorspace: kpix.colorspace,
                };
            }
            FormatDescriptor::MultiPlane(pix_mp) => {
                // SAFETY: the multi-plane arm was written for this request
                let kpix = unsafe { raw.fmt.pix_mp };
                let plane_fmt = kpix.plane_fmt;
                let num_planes = usize::from(kpix.num_planes).min(ffi::VIDEO_MAX_PLANES);
                *pix_mp = PixFormatMplane {
                    width: kpix.width,
                    height: kpix.height,
                    pixel_format: FourCC::from_u32(kpix.pixelformat),
                    field: kpix.field,
                    colorspace: kpix.colorspace,
                    planes: plane_fmt[..num_planes]
                        .iter()
                        .map(|plane| PlaneFormat {
                            bytes_per_line: plane.bytesperline,
                            size_image: plane.sizeimage,
                        })
                        .collect(),
                };
            }
        }
    }
}

/// Format the driver actually accepted
///
/// These values are authoritative: they may differ from what was requested
/// and must be used for stride and size computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub bytes_per_line: u32,
    pub colorspace: u32,
}

impl fmt::Display for NegotiatedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}/{}, bytesperline={}",
            self.width, self.height, self.pixel_format, self.bytes_per_line
        )
    }
}

/// Round `size` down to a multiple of `block`, never below one block.
pub fn shrink_to_block(size: u32, block: u32) -> u32 {
    if block == 0 {
        return size;
    }
    (size / block).max(1) * block
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{self, Rng};

    #[test]
    fn test_buf_type_from_raw() {
        assert_eq!(BufType::from_raw(1), Some(BufType::VideoCapture));
        assert_eq!(BufType::from_raw(2), Some(BufType::VideoOutput));
        assert_eq!(BufType::from_raw(9), Some(BufType::VideoCaptureMplane));
        assert_eq!(BufType::from_raw(10), Some(BufType::VideoOutputMplane));
        // VIDEO_OVERLAY, VBI_CAPTURE, META_CAPTURE
        assert_eq!(BufType::from_raw(3), None);
        assert_eq!(BufType::from_raw(4), None);
        assert_eq!(BufType::from_raw(13), None);
        assert_eq!(BufType::from_raw(0), None);
    }

    #[test]
    fn test_buf_type_properties() {
        assert!(BufType::VideoCapture.is_capture());
        assert!(!BufType::VideoCapture.is_multiplanar());
        assert!(BufType::VideoCaptureMplane.is_capture());
        assert!(BufType::VideoCaptureMplane.is_multiplanar());
        assert!(!BufType::VideoOutput.is_capture());
        assert!(BufType::VideoOutputMplane.is_multiplanar());
        assert_eq!(BufType::VideoOutputMplane.to_string(), "VIDEO_OUTPUT_MPLANE");
    }

    #[test]
    fn test_shrink_to_block() {
        assert_eq!(shrink_to_block(1000, 32), 992);
        assert_eq!(shrink_to_block(700, 32), 672);
        assert_eq!(shrink_to_block(1920, 32), 1920);
        assert_eq!(shrink_to_block(1080, 32), 1056);
        assert_eq!(shrink_to_block(31, 32), 32);
        assert_eq!(shrink_to_block(0, 32), 32);
    }

    #[test]
    fn test_shrink_to_block_random() {
        let mut rng = rand::rng();

        for _ in 0..1000 {
            let size: u32 = rng.random_range(0..8192);
            let shrunk = shrink_to_block(size, 32);
            assert_eq!(shrunk % 32, 0, "size {}", size);
            assert!(shrunk >= 32, "size {}", size);
            if size >= 32 {
                assert!(shrunk <= size, "size {}", size);
                assert!(size - shrunk < 32, "size {}", size);
            }
        }
    }

    #[test]
    fn test_single_plane_roundtrip_through_kernel_struct() {
        let mut desc = FormatDescriptor::SinglePlane(PixFormat {
            width: 640,
            height: 480,
            pixel_format: FourCC::YUYV,
            field: FIELD_ANY,
            bytes_per_line: 1280,
            size_image: 0,
            colorspace: COLORSPACE_RAW,
        });

        let mut raw = desc.to_v4l2(BufType::VideoCapture);
        assert_eq!(raw.type_, ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE);

        // pretend the driver padded the stride and filled in the image size
        unsafe {
            raw.fmt.pix.bytesperline = 1536;
            raw.fmt.pix.sizeimage = 1536 * 480;
        }
        desc.update_from_v4l2(&raw);

        let negotiated = desc.negotiated();
        assert_eq!(negotiated.width, 640);
        assert_eq!(negotiated.bytes_per_line, 1536);
        assert_eq!(negotiated.colorspace, COLORSPACE_RAW);
    }

    #[test]
    fn test_multi_plane_reads_first_plane_stride() {
        let mut desc = FormatDescriptor::MultiPlane(PixFormatMplane {
            width: 1920,
            height: 1088,
            pixel_format: FourCC::NV12,
            field: FIELD_ANY,
            colorspace: COLORSPACE_JPEG,
            planes: vec![PlaneFormat {
                bytes_per_line: 0,
                size_image: 0,
            }],
        });

        let mut raw = desc.to_v4l2(BufType::VideoOutputMplane);
        let kpix = unsafe { raw.fmt.pix_mp };
        assert_eq!({ kpix.num_planes }, 1);
        assert_eq!({ kpix.colorspace }, ffi::V4L2_COLORSPACE_JPEG);

        unsafe {
            raw.fmt.pix_mp.num_planes = 2;
            raw.fmt.pix_mp.plane_fmt[0].bytesperline = 1920;
            raw.fmt.pix_mp.plane_fmt[1].bytesperline = 1920;
        }
        desc.update_from_v4l2(&raw);

        match &desc {
            FormatDescriptor::MultiPlane(pix_mp) => assert_eq!(pix_mp.planes.len(), 2),
            other => panic!("arm changed: {:?}", other),
        }
        assert_eq!(desc.bytes_per_line(), 1920);
    }

    #[test]
    fn test_multi_plane_without_planes_has_zero_stride() {
        let desc = FormatDescriptor::MultiPlane(PixFormatMplane::default());
        assert_eq!(desc.bytes_per_line(), 0);
    }
}
