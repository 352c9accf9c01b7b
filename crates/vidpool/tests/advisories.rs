// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Format Negotiation Diagnostics Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - Severity of the messages logged when the driver adjusts a format
//
// This binary installs its own capturing logger, so it cannot share a process
// with tests that initialize env_logger.
//
// RUN LAYER 1:
//   cargo test --test advisories

use log::{Level, LevelFilter, Log, Metadata, Record};
use serial_test::serial;
use std::os::fd::BorrowedFd;
use std::sync::Mutex;
use vidpool::device::{Device, Ioctl};
use vidpool::format::{BufType, FormatDescriptor};
use vidpool::fourcc::FourCC;
use vidpool::{BufferList, Error};

// =============================================================================
// Capturing logger
// =============================================================================

struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for Capture {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    records: Mutex::new(Vec::new()),
};

fn start_capture() {
    let _ = log::set_logger(&CAPTURE);
    log::set_max_level(LevelFilter::Trace);
    CAPTURE.records.lock().unwrap().clear();
}

/// Levels of the captured messages containing `needle`.
fn levels_of(needle: &str) -> Vec<Level> {
    CAPTURE
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, msg)| msg.contains(needle))
        .map(|(level, _)| *level)
        .collect()
}

// =============================================================================
// Device double
// =============================================================================

/// Driver that answers every format request with a fixed single-plane format
struct FixedFormatDevice {
    width: u32,
    height: u32,
    pixel_format: FourCC,
    bytes_per_line: u32,
}

impl Device for FixedFormatDevice {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn xioctl(&self, request: Ioctl<'_>, _context: &str) -> Result<(), Error> {
        if let Ioctl::SetFormat(_, FormatDescriptor::SinglePlane(pix)) = request {
            pix.width = self.width;
            pix.height = self.height;
            pix.pixel_format = self.pixel_format;
            pix.bytes_per_line = self.bytes_per_line;
        }
        Ok(())
    }
}

const VGA_YUYV: FixedFormatDevice = FixedFormatDevice {
    width: 640,
    height: 480,
    pixel_format: FourCC::YUYV,
    bytes_per_line: 1280,
};

fn negotiate(device: &FixedFormatDevice, width: u32, height: u32, format: FourCC, bpl: u32) {
    let mut list: BufferList =
        BufferList::open("CAMERA:capture", device, BufType::VideoCapture.as_raw(), true)
            .unwrap();
    list.set_format(width, height, format, bpl).unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[test]
#[serial]
fn test_size_mismatch_without_stride_is_info() {
    start_capture();
    negotiate(&VGA_YUYV, 1920, 1080, FourCC::YUYV, 0);

    assert_eq!(levels_of("resolution=1920x1080 is unavailable"), vec![Level::Info]);
    assert!(levels_of("Requested bytesperline").is_empty());
    assert!(levels_of("Could not obtain the requested format").is_empty());
}

#[test]
#[serial]
fn test_size_mismatch_with_stride_is_error() {
    start_capture();
    negotiate(&VGA_YUYV, 1920, 1080, FourCC::YUYV, 1280);

    assert_eq!(levels_of("resolution=1920x1080 is unavailable"), vec![Level::Error]);
    assert!(levels_of("Requested bytesperline").is_empty());
}

#[test]
#[serial]
fn test_stride_mismatch_is_error() {
    start_capture();
    negotiate(&VGA_YUYV, 640, 480, FourCC::YUYV, 1024);

    assert_eq!(
        levels_of("Requested bytesperline=1024. Got 1280."),
        vec![Level::Error]
    );
    assert!(levels_of("is unavailable").is_empty());
}

#[test]
#[serial]
fn test_format_substitution_is_error() {
    start_capture();
    negotiate(&VGA_YUYV, 640, 480, FourCC::NV12, 0);

    assert_eq!(
        levels_of("Could not obtain the requested format=NV12; driver gave us YUYV"),
        vec![Level::Error]
    );
    assert!(levels_of("is unavailable").is_empty());
}

#[test]
#[serial]
fn test_exact_match_logs_only_the_result() {
    start_capture();
    negotiate(&VGA_YUYV, 640, 480, FourCC::YUYV, 1280);

    assert!(levels_of("Requested").is_empty());
    assert!(levels_of("Could not obtain").is_empty());
    assert_eq!(levels_of("CAMERA:capture: Using: "), vec![Level::Info]);
}
