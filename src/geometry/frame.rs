//! RGBA frame buffer
//!
//! Frames travel between the ffmpeg decoder, the perspective warp and the
//! encoder as tightly packed RGBA rows. This module also carries the few
//! drawing helpers used for calibration debug frames.

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

pub type Rgba = [u8; 4];

pub const BLACK: Rgba = [0, 0, 0, 255];
pub const GREEN: Rgba = [0, 255, 0, 255];
pub const RED: Rgba = [255, 0, 0, 255];

/// A single video frame, RGBA, row-major without padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// An opaque black frame
    pub fn new(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel[3] = 255;
        }
        Self { width, height, data }
    }

    /// Wrap raw RGBA bytes. Returns `None` if the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_len(width, height) {
            return None;
        }
        Some(Self { width, height, data })
    }

    /// Size in bytes of a `width` x `height` RGBA frame
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Set a pixel; coordinates outside the frame are ignored
    pub fn put_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = self.offset(x as u32, y as u32);
        self.data[i..i + BYTES_PER_PIXEL].copy_from_slice(&color);
    }

    /// Bilinear sample at a sub-pixel position, `None` outside the frame
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<Rgba> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
            return None;
        }

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let p00 = self.offset(x0, y0);
        let p10 = self.offset(x1, y0);
        let p01 = self.offset(x0, y1);
        let p11 = self.offset(x1, y1);

        let mut out = [0u8; 4];
        for (c, value) in out.iter_mut().enumerate() {
            let top = self.data[p00 + c] as f64 * (1.0 - fx) + self.data[p10 + c] as f64 * fx;
            let bottom = self.data[p01 + c] as f64 * (1.0 - fx) + self.data[p11 + c] as f64 * fx;
            *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        Some(out)
    }

    /// Resample to `width` x `height` by averaging the source area each
    /// destination pixel covers
    pub fn resize_area(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Frame::new(width, height);
        if self.width == 0 || self.height == 0 || width == 0 || height == 0 {
            return out;
        }

        let scale_x = self.width as f64 / width as f64;
        let scale_y = self.height as f64 / height as f64;

        for dy in 0..height {
            let sy0 = dy as f64 * scale_y;
            let sy1 = sy0 + scale_y;
            for dx in 0..width {
                let sx0 = dx as f64 * scale_x;
                let sx1 = sx0 + scale_x;

                let mut acc = [0f64; 4];
                let mut total = 0f64;

                let mut sy = sy0.floor() as u32;
                while (sy as f64) < sy1 && sy < self.height {
                    let wy = (sy1.min(sy as f64 + 1.0) - sy0.max(sy as f64)).max(0.0);
                    let mut sx = sx0.floor() as u32;
                    while (sx as f64) < sx1 && sx < self.width {
                        let wx = (sx1.min(sx as f64 + 1.0) - sx0.max(sx as f64)).max(0.0);
                        let w = wx * wy;
                        if w > 0.0 {
                            let i = self.offset(sx, sy);
                            for (c, a) in acc.iter_mut().enumerate() {
                                *a += self.data[i + c] as f64 * w;
                            }
                            total += w;
                        }
                        sx += 1;
                    }
                    sy += 1;
                }

                if total > 0.0 {
                    let o = out.offset(dx, dy);
                    for c in 0..BYTES_PER_PIXEL {
                        out.data[o + c] = (acc[c] / total).round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }

        out
    }

    /// Filled disc
    pub fn fill_circle(&mut self, cx: i64, cy: i64, radius: i64, color: Rgba) {
        for y in -radius..=radius {
            for x in -radius..=radius {
                if x * x + y * y <= radius * radius {
                    self.put_pixel(cx + x, cy + y, color);
                }
            }
        }
    }

    /// Line of the given thickness (Bresenham, stamped with a small disc)
    pub fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), thickness: i64, color: Rgba) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness / 2).max(0);

        loop {
            if radius == 0 {
                self.put_pixel(x0, y0, color);
            } else {
                self.fill_circle(x0, y0, radius, color);
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Closed polygon outline
    pub fn draw_polygon(&mut self, points: &[(i64, i64)], thickness: i64, color: Rgba) {
        for (i, &from) in points.iter().enumerate() {
            let to = points[(i + 1) % points.len()];
            self.draw_line(from, to, thickness, color);
        }
    }

    /// Draw a single decimal digit with its top-left at `origin`.
    /// Non-digit characters are skipped.
    pub fn draw_digit(&mut self, origin: (i64, i64), digit: char, scale: i64, color: Rgba) {
        let Some(glyph) = digit.to_digit(10).map(|d| DIGIT_GLYPHS[d as usize]) else {
            return;
        };
        let scale = scale.max(1);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for py in 0..scale {
                    for px in 0..scale {
                        self.put_pixel(
                            origin.0 + col as i64 * scale + px,
                            origin.1 + row as i64 * scale + py,
                            color,
                        );
                    }
                }
            }
        }
    }

    /// Encode as an RGBA PNG
    pub fn to_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.data)?;
            writer.finish()?;
        }
        Ok(bytes)
    }
}

/// 3x5 bitmap font, one row per entry, MSB is the left column
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity(Frame::byte_len(width, height));
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 0, 255]);
            }
        }
        Frame::from_rgba(width, height, data).unwrap()
    }

    #[test]
    fn test_from_rgba_rejects_wrong_length() {
        assert!(Frame::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Frame::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_bilinear_sample_between_pixels() {
        let frame = gradient(4, 4);
        let sample = frame.sample_bilinear(1.5, 2.0).unwrap();
        assert_eq!(sample, [15, 20, 0, 255]);
        assert!(frame.sample_bilinear(-0.5, 1.0).is_none());
        assert!(frame.sample_bilinear(3.5, 1.0).is_none());
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        let frame = gradient(4, 2);
        let half = frame.resize_area(2, 1);
        assert_eq!(half.width(), 2);
        assert_eq!(half.height(), 1);
        // Left block covers x in {0, 10}, y in {0, 10}
        assert_eq!(half.pixel(0, 0).unwrap(), [5, 5, 0, 255]);
        assert_eq!(half.pixel(1, 0).unwrap(), [25, 5, 0, 255]);
    }

    #[test]
    fn test_resize_area_upscale_keeps_edges() {
        let frame = gradient(2, 2);
        let big = frame.resize_area(4, 4);
        assert_eq!(big.pixel(0, 0).unwrap(), [0, 0, 0, 255]);
        assert_eq!(big.pixel(3, 3).unwrap(), [10, 10, 0, 255]);
    }

    #[test]
    fn test_drawing_stays_inside_bounds() {
        let mut frame = Frame::new(10, 10);
        frame.draw_polygon(&[(-5, -5), (20, 0), (5, 20)], 3, GREEN);
        frame.fill_circle(9, 9, 4, RED);
        frame.draw_digit((0, 0), '3', 2, RED);
        assert_eq!(frame.pixel(9, 9).unwrap(), RED);
        assert_eq!(frame.pixel(0, 0).unwrap(), RED);
    }

    #[test]
    fn test_png_signature() {
        let png = Frame::new(3, 2).to_png().unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
