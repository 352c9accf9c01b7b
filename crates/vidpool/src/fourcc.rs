// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Adapted from https://docs.rs/crate/four-cc/latest, using the V4L2 packing
// (first character in the least significant byte on every host).
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

/// Four-character code identifying a pixel format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C, packed)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const YUYV: FourCC = FourCC(*b"YUYV");
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const MJPG: FourCC = FourCC(*b"MJPG");
    pub const JPEG: FourCC = FourCC(*b"JPEG");
    pub const H264: FourCC = FourCC(*b"H264");

    /// Packs the code the way `v4l2_fourcc()` does.
    pub const fn as_u32(self) -> u32 {
        (self.0[0] as u32)
            | (self.0[1] as u32) << 8
            | (self.0[2] as u32) << 16
            | (self.0[3] as u32) << 24
    }

    pub const fn from_u32(val: u32) -> FourCC {
        FourCC([
            (val & 0xff) as u8,
            (val >> 8 & 0xff) as u8,
            (val >> 16 & 0xff) as u8,
            (val >> 24 & 0xff) as u8,
        ])
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC::from_u32(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.as_u32()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        if b.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
            // all printable ASCII, so this cannot fail
            f.write_str(core::str::from_utf8(&b).unwrap_or("????"))
        } else {
            // format!() panics on fmt::Error, so escape instead of failing
            f.write_fmt(format_args!(
                "{}{}{}{}",
                core::ascii::escape_default(b[0]),
                core::ascii::escape_default(b[1]),
                core::ascii::escape_default(b[2]),
                core::ascii::escape_default(b[3])
            ))
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}
