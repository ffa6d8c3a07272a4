//! CPU-side pixel framebuffer
//!
//! Each window owns one [`PixelBuffer`]. Colors are packed `0xAARRGGBB`
//! values, which on little-endian hosts is exactly the byte order of
//! `B8G8R8A8` images, so the buffer is uploaded without conversion.

/// Packed color helpers
pub mod color {
    /// Pack 8-bit channels into a `0xAARRGGBB` value
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
        (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
    }

    /// Pack an opaque color
    pub const fn rgb(r: u8, g: u8, b: u8) -> u32 {
        rgba(r, g, b, 0xFF)
    }

    /// Split a packed color into `(r, g, b, a)`
    pub const fn channels(color: u32) -> (u8, u8, u8, u8) {
        let [b, g, r, a] = color.to_le_bytes();
        (r, g, b, a)
    }
}

/// Per-window pixel storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u32>,
}

impl PixelBuffer {
    /// Create a buffer cleared to zero
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Buffer width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Write one pixel; coordinates outside the buffer are ignored
    ///
    /// Returns whether the pixel was written.
    pub fn put_pixel(&mut self, x: i32, y: i32, color: u32) -> bool {
        match self.index_of(x, y) {
            Some(index) => {
                self.data[index] = color;
                true
            }
            None => false,
        }
    }

    /// Read one pixel
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<u32> {
        self.index_of(x, y).map(|index| self.data[index])
    }

    /// Fill the whole buffer with one color
    pub fn clear(&mut self, color: u32) {
        self.data.fill(color);
    }

    /// Packed pixels in row-major order
    pub fn pixels(&self) -> &[u32] {
        &self.data
    }

    /// Raw bytes as uploaded to the GPU
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Size of the upload in bytes
    pub fn byte_len(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<u32>()) as u64
    }

    fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        let x = u32::try_from(x).ok()?;
        let y = u32::try_from(y).ok()?;
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut buffer = PixelBuffer::new(4, 3);
        assert!(buffer.put_pixel(3, 2, 0x00FF_0000));
        assert_eq!(buffer.get_pixel(3, 2), Some(0x00FF_0000));
        assert_eq!(buffer.pixels()[2 * 4 + 3], 0x00FF_0000);
        assert_eq!(buffer.get_pixel(0, 0), Some(0));
    }

    #[test]
    fn test_out_of_bounds_is_ignored() {
        let mut buffer = PixelBuffer::new(4, 3);
        let before = buffer.clone();
        for (x, y) in [(-1, 0), (0, -1), (4, 0), (0, 3), (i32::MAX, i32::MAX), (i32::MIN, 1)] {
            assert!(!buffer.put_pixel(x, y, 0xFFFF_FFFF), "({x}, {y}) should be clipped");
            assert_eq!(buffer.get_pixel(x, y), None);
        }
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_row_edges_do_not_wrap() {
        // Writing one past the end of a row must not land on the next row
        let mut buffer = PixelBuffer::new(2, 2);
        assert!(!buffer.put_pixel(2, 0, 7));
        assert_eq!(buffer.get_pixel(0, 1), Some(0));
    }

    #[test]
    fn test_byte_layout_is_bgra() {
        let mut buffer = PixelBuffer::new(1, 1);
        buffer.put_pixel(0, 0, color::rgba(0x11, 0x22, 0x33, 0x44));
        assert_eq!(buffer.as_bytes(), &[0x33, 0x22, 0x11, 0x44]);
        assert_eq!(buffer.byte_len(), 4);
    }

    #[test]
    fn test_color_helpers() {
        assert_eq!(color::rgb(0xFF, 0, 0), 0xFFFF_0000);
        assert_eq!(color::channels(0x8012_3456), (0x12, 0x34, 0x56, 0x80));
    }

    #[test]
    fn test_clear_and_empty() {
        let mut buffer = PixelBuffer::new(3, 3);
        buffer.clear(5);
        assert!(buffer.pixels().iter().all(|&p| p == 5));

        let empty = PixelBuffer::new(0, 0);
        assert_eq!(empty.byte_len(), 0);
        assert_eq!(empty.get_pixel(0, 0), None);
    }
}
