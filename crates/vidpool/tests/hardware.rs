// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// V4L2 Buffer Pool Hardware Tests
//
// TESTING LAYERS:
//
// Layer 3 (Hardware Integration - Requires a V4L2 capture device):
//   - Format negotiation against a real driver
//   - MMAP pool allocation with DMA-buf export
//   - STREAMON / STREAMOFF
//
// REQUIREMENTS (tests marked with #[ignore]):
//   - A single-plane capture device at $VIDPOOL_DEVICE (default /dev/video0)
//     supporting YUYV, e.g. a UVC webcam
//
// RUN LAYER 3 (on hardware):
//   cargo test --test hardware -- --ignored --nocapture

use serial_test::serial;
use vidpool::buffer::{Buffer, V4l2Buffer};
use vidpool::device::{DeviceConfig, V4l2Device};
use vidpool::format::BufType;
use vidpool::fourcc::FourCC;
use vidpool::{BufferList, Error};

fn open_device() -> Result<V4l2Device, Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    V4l2Device::open(&DeviceConfig::default().with_name("CAMERA"))
}

#[ignore = "test requires a V4L2 capture device (run with --include-ignored to enable)"]
#[test]
#[serial]
fn test_capture_pool_lifecycle() -> Result<(), Error> {
    let device = open_device()?;
    let mut list: BufferList<V4l2Buffer> = BufferList::open(
        "CAMERA:capture",
        &device,
        BufType::VideoCapture.as_raw(),
        true,
    )?;

    list.set_format(640, 480, FourCC::YUYV, 0)?;
    let format = *list.format().expect("format negotiated");
    println!("negotiated {}", format);
    assert!(format.bytes_per_line >= format.width);

    list.request(4)?;
    assert!(list.buffer_count() >= 1);
    assert_eq!(list.buffers().len(), list.buffer_count() as usize);

    for buf in list.buffers() {
        println!("{}", buf);
        let plane = buf.plane(0).expect("MMAP buffer is mapped");
        assert_eq!(plane.len(), buf.length(0).unwrap_or(0) as usize);
        assert!(buf.dmabuf().is_some());
        assert!(!buf.is_enqueued());
    }

    list.set_streaming(true)?;
    assert!(list.is_streaming());
    list.set_streaming(false)?;
    assert!(!list.is_streaming());

    list.close();
    assert!(list.buffers().is_empty());

    Ok(())
}

#[ignore = "test requires a V4L2 capture device (run with --include-ignored to enable)"]
#[test]
#[serial]
fn test_repeated_request_reallocates() -> Result<(), Error> {
    let device = open_device()?;
    let mut list: BufferList<V4l2Buffer> = BufferList::open(
        "CAMERA:capture",
        &device,
        BufType::VideoCapture.as_raw(),
        true,
    )?;

    list.set_format(640, 480, FourCC::YUYV, 0)?;
    list.request(2)?;
    let first = list.buffer_count();
    list.request(3)?;
    assert!(list.buffer_count() >= first.min(1));
    assert_eq!(list.buffers().len(), list.buffer_count() as usize);

    Ok(())
}
