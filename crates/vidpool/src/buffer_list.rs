// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer pool of one V4L2 queue
//!
//! A [`BufferList`] drives one direction (capture or output) of a device:
//!
//! 1. [`BufferList::open`] binds a name, a [`Device`] and a buffer type
//! 2. [`BufferList::set_format`] negotiates the pixel format
//! 3. [`BufferList::request`] allocates the kernel pool and opens every buffer
//! 4. [`BufferList::set_streaming`] starts and stops the queue
//! 5. [`BufferList::close`] (or drop) releases the buffers
//!
//! The order is not enforced beyond what the kernel itself rejects.
//!
//! # Memory modes
//!
//! | Type | `do_mmap` | `do_dma` | `do_mplanes` | `do_capture` |
//! |------|-----------|----------|--------------|--------------|
//! | `VIDEO_OUTPUT` | `use_mmap` | no | no | no |
//! | `VIDEO_OUTPUT_MPLANE` | `use_mmap` | no | yes | no |
//! | `VIDEO_CAPTURE` | `use_mmap` | `use_mmap` | no | yes |
//! | `VIDEO_CAPTURE_MPLANE` | `use_mmap` | `use_mmap` | yes | yes |
//!
//! # Block alignment
//!
//! JPEG and H.264 encoders, and ISP capture stages, only accept frames made of
//! whole 32×32 blocks. Lists whose name contains `JPEG` or `H264`, and capture
//! lists whose name contains `ISP`, shrink the requested size to the next lower
//! multiple of 32 before asking the driver.

use crate::{
    buffer::{Buffer, V4l2Buffer},
    device::{Device, Ioctl, RequestBuffers},
    format::{
        shrink_to_block, BufType, FormatDescriptor, Memory, NegotiatedFormat, PixFormat,
        PixFormatMplane, PlaneFormat, COLORSPACE_JPEG, COLORSPACE_RAW, FIELD_ANY,
    },
    fourcc::FourCC,
    Error,
};
use std::fmt;

const BLOCK_SIZE: u32 = 32;

/// Buffer pool and format state of one queue
///
/// The list borrows its [`Device`], which therefore outlives it, and owns its
/// buffers exclusively. It performs no locking: share it across threads only
/// behind external synchronization. Lists of the same device are independent.
pub struct BufferList<'d, B: Buffer = V4l2Buffer> {
    name: String,
    device: &'d dyn Device,
    buf_type: BufType,
    do_mmap: bool,
    do_dma: bool,
    do_mplanes: bool,
    do_capture: bool,
    format: Option<NegotiatedFormat>,
    buffers: Vec<B>,
    buffer_count: u32,
    streaming: bool,
}

impl<'d, B: Buffer> BufferList<'d, B> {
    /// Create a list for `buf_type` (a raw `V4L2_BUF_TYPE_*` value).
    ///
    /// Fails with [`Error::InvalidArgument`] for any type other than the four
    /// video capture/output variants. Nothing is allocated and no ioctl is
    /// issued.
    pub fn open(
        name: &str,
        device: &'d dyn Device,
        buf_type: u32,
        use_mmap: bool,
    ) -> Result<Self, Error> {
        let buf_type = BufType::from_raw(buf_type).ok_or_else(|| {
            log::error!("{}: Unknown type={}", name, buf_type);
            Error::InvalidArgument(format!("{}: unsupported buffer type {}", name, buf_type))
        })?;

        let do_capture = buf_type.is_capture();
        let list = BufferList {
            name: name.to_owned(),
            device,
            buf_type,
            do_mmap: use_mmap,
            // only capture queues can export their MMAP buffers
            do_dma: do_capture && use_mmap,
            do_mplanes: buf_type.is_multiplanar(),
            do_capture,
            format: None,
            buffers: Vec::new(),
            buffer_count: 0,
            streaming: false,
        };

        log::debug!(
            "{}: opened on {} type={} memory={}",
            list.name,
            device.name(),
            list.buf_type,
            list.memory()
        );
        Ok(list)
    }

    /// Release every buffer, in index order.
    ///
    /// Safe to call more than once. Streaming is not stopped first; closing a
    /// list whose buffers are still queued leaves the outcome to the driver.
    pub fn close(&mut self) {
        if self.buffers.is_empty() && self.buffer_count == 0 {
            return;
        }

        log::debug!("{}: closing {} buffers", self.name, self.buffers.len());
        for buf in self.buffers.iter_mut() {
            buf.close();
        }
        self.buffers.clear();
        self.buffer_count = 0;
    }

    /// Negotiate the pixel format.
    ///
    /// Only a failing `VIDIOC_S_FMT` fails this call. The driver may adjust
    /// any value; the accepted values are stored and returned by
    /// [`format`](Self::format), and mismatches with the request are logged.
    pub fn set_format(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: FourCC,
        bytes_per_line: u32,
    ) -> Result<(), Error> {
        let (width, height) = if self.needs_block_alignment() {
            let aligned = (
                shrink_to_block(width, BLOCK_SIZE),
                shrink_to_block(height, BLOCK_SIZE),
            );
            log::info!(
                "{}: Adapting size to {}x{} block: {}x{} vs {}x{}",
                self.name,
                BLOCK_SIZE,
                BLOCK_SIZE,
                width,
                height,
                aligned.0,
                aligned.1
            );
            aligned
        } else {
            (width, height)
        };

        let mut descriptor = if self.do_mplanes {
            FormatDescriptor::MultiPlane(PixFormatMplane {
                width,
                height,
                pixel_format,
                field: FIELD_ANY,
                colorspace: COLORSPACE_JPEG,
                planes: vec![PlaneFormat {
                    bytes_per_line,
                    size_image: 0,
                }],
            })
        } else {
            FormatDescriptor::SinglePlane(PixFormat {
                width,
                height,
                pixel_format,
                field: FIELD_ANY,
                bytes_per_line,
                size_image: 0,
                colorspace: COLORSPACE_RAW,
            })
        };

        log::debug!("{}: Configuring format ...", self.name);
        self.device.xioctl(
            Ioctl::SetFormat(self.buf_type, &mut descriptor),
            "cannot set format",
        )?;

        let accepted = descriptor.negotiated();
        self.format = Some(accepted);

        if bytes_per_line > 0 && accepted.bytes_per_line != bytes_per_line {
            log::error!(
                "{}: Requested bytesperline={}. Got {}.",
                self.name,
                bytes_per_line,
                accepted.bytes_per_line
            );
        }

        if accepted.width != width || accepted.height != height {
            if bytes_per_line > 0 {
                log::error!(
                    "{}: Requested resolution={}x{} is unavailable. Got {}x{}.",
                    self.name,
                    width,
                    height,
                    accepted.width,
                    accepted.height
                );
            } else {
                log::info!(
                    "{}: Requested resolution={}x{} is unavailable. Got {}x{}. Accepted",
                    self.name,
                    width,
                    height,
                    accepted.width,
                    accepted.height
                );
            }
        }

        if accepted.pixel_format != pixel_format {
            log::error!(
                "{}: Could not obtain the requested format={}; driver gave us {}",
                self.name,
                pixel_format,
                accepted.pixel_format
            );
        }

        log::info!("{}: Using: {}", self.name, accepted);
        Ok(())
    }

    /// Allocate `count` buffers in the kernel and open one [`Buffer`] per
    /// granted slot.
    ///
    /// The driver may grant fewer buffers than requested; the granted count
    /// is authoritative. A previous pool is closed first. If buffer `i` fails
    /// to open, buffers `0..i` stay in the list until [`close`](Self::close)
    /// and [`buffer_count`](Self::buffer_count) drops to `i`.
    pub fn request(&mut self, count: u32) -> Result<(), Error> {
        self.close();

        let mut req = RequestBuffers {
            count,
            buf_type: self.buf_type,
            memory: self.memory(),
        };

        log::debug!("{}: Requesting {} buffers", self.name, req.count);
        self.device
            .xioctl(Ioctl::RequestBuffers(&mut req), "cannot request buffers")?;

        if req.count < 1 {
            let err = Error::ResourceExhaustion("insufficient buffer memory".to_owned());
            log::error!("{}: {}: {}", self.name, err, req.count);
        }

        log::debug!("{}: Got {} buffers", self.name, req.count);
        self.buffer_count = req.count;

        let mut buffers = Vec::with_capacity(usize::try_from(req.count)?);
        for index in 0..req.count {
            let name = format!("{}:buf{}", self.name, index);
            match B::open(name, self, index) {
                Ok(buf) => buffers.push(buf),
                Err(err) => {
                    log::error!("{}: Cannot open buffer: {}: {}", self.name, index, err);
                    self.buffer_count = index;
                    self.buffers = buffers;
                    return Err(Error::Buffer {
                        index,
                        source: Box::new(err),
                    });
                }
            }
        }
        self.buffers = buffers;

        log::debug!("{}: Opened {} buffers", self.name, self.buffers.len());
        Ok(())
    }

    /// Start or stop streaming.
    ///
    /// Requesting the current state is a no-op. On failure the stored state is
    /// left unchanged.
    pub fn set_streaming(&mut self, on: bool) -> Result<(), Error> {
        if self.streaming == on {
            return Ok(());
        }

        let request = if on {
            Ioctl::StreamOn(self.buf_type)
        } else {
            Ioctl::StreamOff(self.buf_type)
        };
        self.device.xioctl(request, "cannot set streaming state")?;
        self.streaming = on;

        log::debug!(
            "{}: Streaming {}... Was {} of {} enqueued",
            self.name,
            if on { "started" } else { "stopped" },
            self.enqueued_count(),
            self.buffer_count
        );
        Ok(())
    }

    /// Number of owned buffers currently queued with the driver.
    pub fn enqueued_count(&self) -> usize {
        self.buffers.iter().filter(|buf| buf.is_enqueued()).count()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &'d dyn Device {
        self.device
    }

    pub fn buf_type(&self) -> BufType {
        self.buf_type
    }

    /// Memory mode used for `VIDIOC_REQBUFS` and `VIDIOC_QUERYBUF`.
    pub fn memory(&self) -> Memory {
        if self.do_mmap {
            Memory::Mmap
        } else {
            Memory::DmaBuf
        }
    }

    pub fn do_mmap(&self) -> bool {
        self.do_mmap
    }

    pub fn do_dma(&self) -> bool {
        self.do_dma
    }

    pub fn do_mplanes(&self) -> bool {
        self.do_mplanes
    }

    pub fn do_capture(&self) -> bool {
        self.do_capture
    }

    /// Format accepted by the driver, `None` until a negotiation succeeded.
    pub fn format(&self) -> Option<&NegotiatedFormat> {
        self.format.as_ref()
    }

    pub fn buffers(&self) -> &[B] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [B] {
        &mut self.buffers
    }

    pub fn buffer(&self, index: usize) -> Option<&B> {
        self.buffers.get(index)
    }

    /// Number of buffers in the pool: the count granted by the driver at the
    /// last [`request`](Self::request), or the number opened if that request
    /// failed part way.
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn needs_block_alignment(&self) -> bool {
        self.name.contains("JPEG")
            || self.name.contains("H264")
            || (self.do_capture && self.name.contains("ISP"))
    }
}

impl<B: Buffer> Drop for BufferList<'_, B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: Buffer> fmt::Debug for BufferList<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferList")
            .field("name", &self.name)
            .field("device", &self.device.name())
            .field("buf_type", &self.buf_type)
            .field("do_mmap", &self.do_mmap)
            .field("do_dma", &self.do_dma)
            .field("do_mplanes", &self.do_mplanes)
            .field("do_capture", &self.do_capture)
            .field("format", &self.format)
            .field("buffer_count", &self.buffer_count)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl<B: Buffer> fmt::Display for BufferList<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.buf_type, self.memory())?;
        if let Some(format) = &self.format {
            write!(f, " {}", format)?;
        }
        write!(f, " buffers:{}", self.buffer_count)
    }
}
