//! Capture buffer owned by the tracking loop.
//!
//! The buffer is redrawn once per tick and its pixel storage is moved into the
//! detection request, so nothing can touch it after hand-off. The worker sends the
//! storage back with its response and `recycle` reinstalls it for the next draw.

use tracing::warn;

use super::{CHANNELS, Frame};

pub struct CaptureBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CaptureBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; byte_len(width, height)],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Change the target dimensions. Storage is reallocated lazily on the next draw.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
    }

    /// Draw `frame` scaled to the buffer dimensions (nearest neighbour).
    pub fn draw(&mut self, frame: &Frame) {
        let len = byte_len(self.width, self.height);
        self.pixels.resize(len, 0);
        if len == 0 {
            return;
        }

        if frame.data.len() != byte_len(frame.width, frame.height) {
            warn!(
                width = frame.width,
                height = frame.height,
                bytes = frame.data.len(),
                "Malformed frame, capturing blank"
            );
            self.pixels.fill(0);
            return;
        }
        if frame.width == self.width && frame.height == self.height {
            self.pixels.copy_from_slice(&frame.data);
            return;
        }
        if frame.width == 0 || frame.height == 0 {
            self.pixels.fill(0);
            return;
        }

        let dst_w = self.width as u64;
        let dst_h = self.height as u64;
        let src_w = frame.width as u64;
        let src_h = frame.height as u64;
        let src_stride = frame.width as usize * CHANNELS;

        for (y, row) in self
            .pixels
            .chunks_exact_mut(self.width as usize * CHANNELS)
            .enumerate()
        {
            let sy = ((y as u64 * src_h) / dst_h) as usize;
            let src_row = &frame.data[sy * src_stride..(sy + 1) * src_stride];
            for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
                let sx = ((x as u64 * src_w) / dst_w) as usize;
                px.copy_from_slice(&src_row[sx * CHANNELS..(sx + 1) * CHANNELS]);
            }
        }
    }

    /// Current contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Move the pixel storage out for hand-off to the detector.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pixels)
    }

    /// Reinstall storage returned by the detector, if the buffer has none.
    pub fn recycle(&mut self, mut pixels: Vec<u8>) {
        if self.pixels.is_empty() && pixels.capacity() >= byte_len(self.width, self.height) {
            pixels.clear();
            self.pixels = pixels;
        }
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        Frame::new(width, height, data).unwrap()
    }

    #[test]
    fn test_draw_same_size_copies() {
        let frame = gradient(4, 3);
        let mut buffer = CaptureBuffer::new(4, 3);
        buffer.draw(&frame);
        assert_eq!(buffer.as_bytes(), frame.data.as_slice());
    }

    #[test]
    fn test_draw_downscale_nearest() {
        let frame = gradient(8, 6);
        let mut buffer = CaptureBuffer::new(4, 3);
        buffer.draw(&frame);

        assert_eq!(buffer.as_bytes().len(), 4 * 3 * CHANNELS);
        // Destination (1, 2) samples source (2, 4).
        let offset = (2 * 4 + 1) * CHANNELS;
        assert_eq!(&buffer.as_bytes()[offset..offset + 4], &[2, 4, 0, 255]);
    }

    #[test]
    fn test_draw_upscale_nearest() {
        let frame = gradient(2, 2);
        let mut buffer = CaptureBuffer::new(4, 4);
        buffer.draw(&frame);
        let offset = (3 * 4 + 3) * CHANNELS;
        assert_eq!(&buffer.as_bytes()[offset..offset + 4], &[1, 1, 0, 255]);
    }

    #[test]
    fn test_take_and_recycle() {
        let frame = gradient(4, 3);
        let mut buffer = CaptureBuffer::new(4, 3);
        buffer.draw(&frame);

        let handed_off = buffer.take();
        assert_eq!(handed_off, frame.data);
        assert!(buffer.as_bytes().is_empty());

        let ptr = handed_off.as_ptr();
        buffer.recycle(handed_off);
        buffer.draw(&frame);
        assert_eq!(buffer.as_bytes().as_ptr(), ptr);
        assert_eq!(buffer.as_bytes(), frame.data.as_slice());
    }

    #[test]
    fn test_malformed_frame_draws_blank() {
        let mut buffer = CaptureBuffer::new(4, 3);
        buffer.draw(&gradient(4, 3));

        let short = Frame {
            width: 4,
            height: 3,
            data: vec![7; 5],
        };
        buffer.draw(&short);
        assert_eq!(buffer.as_bytes().len(), 4 * 3 * CHANNELS);
        assert!(buffer.as_bytes().iter().all(|&b| b == 0));

        // Same for the scaling path.
        let mut small = CaptureBuffer::new(2, 2);
        small.draw(&short);
        assert!(small.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resize_changes_output_size() {
        let frame = gradient(8, 6);
        let mut buffer = CaptureBuffer::new(8, 6);
        buffer.draw(&frame);
        buffer.resize(2, 2);
        assert_eq!(buffer.dimensions(), (2, 2));
        buffer.draw(&frame);
        assert_eq!(buffer.as_bytes().len(), 2 * 2 * CHANNELS);
    }
}
