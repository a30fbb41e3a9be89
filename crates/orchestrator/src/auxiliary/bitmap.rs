use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::path::Path;

const FILE_HEADER: usize = 14;
const INFO_HEADER_MIN: usize = 40;

/// Uncompressed screen capture, three bytes per pixel in RGB order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_owned())
}

impl Bitmap {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::decode(&std::fs::read(path)?)
    }

    /// Decode a 24 or 32 bits per pixel BMP without compression.
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        if data.len() < FILE_HEADER + INFO_HEADER_MIN || &data[..2] != b"BM" {
            return Err(invalid("not a BMP file"));
        }
        let offset = LittleEndian::read_u32(&data[10..14]) as usize;
        let width = LittleEndian::read_i32(&data[18..22]);
        let height = LittleEndian::read_i32(&data[22..26]);
        let bpp = LittleEndian::read_u16(&data[28..30]);
        let compression = LittleEndian::read_u32(&data[30..34]);

        // 3 is BI_BITFIELDS, which screencapture uses with a BGRA mask.
        if compression != 0 && !(compression == 3 && bpp == 32) {
            return Err(invalid("compressed BMP"));
        }
        let channels = match bpp {
            24 => 3,
            32 => 4,
            _ => return Err(invalid("unsupported bit depth")),
        };
        if width <= 0 || height == 0 {
            return Err(invalid("empty image"));
        }

        let width = width as usize;
        let bottom_up = height > 0;
        let height = height.unsigned_abs() as usize;
        let stride = (width * channels).div_ceil(4) * 4;
        let end = height
            .checked_mul(stride)
            .and_then(|size| size.checked_add(offset))
            .ok_or_else(|| invalid("image too large"))?;
        if data.len() < end {
            return Err(invalid("truncated pixel data"));
        }

        let mut pixels = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            let source_row = if bottom_up { height - 1 - row } else { row };
            let start = offset + source_row * stride;
            for pixel in data[start..start + width * channels].chunks_exact(channels) {
                pixels.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
            }
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

/// Root mean square of the per channel difference, normalized by the pixel
/// count. Images of different sizes are infinitely far apart.
pub fn rms_difference(a: &Bitmap, b: &Bitmap) -> f64 {
    if a.width != b.width || a.height != b.height || a.pixels.len() != b.pixels.len() {
        return f64::INFINITY;
    }
    let sum_of_squares: u64 = a
        .pixels
        .iter()
        .zip(&b.pixels)
        .map(|(x, y)| {
            let d = u64::from(x.abs_diff(*y));
            d * d
        })
        .sum();
    (sum_of_squares as f64 / (a.width * a.height) as f64).sqrt()
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// 24-bit bottom-up BMP filled with one colour.
    pub(crate) fn solid_bmp(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let stride = (width * 3).div_ceil(4) * 4;
        let size = 54 + stride * height;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&54u32.to_le_bytes());
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&(width as i32).to_le_bytes());
        out.extend_from_slice(&(height as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 24]);
        for _ in 0..height {
            for _ in 0..width {
                out.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]);
            }
            out.resize(out.len() + (stride - width * 3) as usize, 0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::solid_bmp;
    use super::*;

    #[test]
    fn decodes_padded_rows() {
        let image = Bitmap::decode(&solid_bmp(3, 2, [10, 20, 30])).unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.pixels.len(), 18);
        assert_eq!(&image.pixels[..3], &[10, 20, 30]);
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let a = Bitmap::decode(&solid_bmp(4, 4, [1, 2, 3])).unwrap();
        assert_eq!(rms_difference(&a, &a.clone()), 0.0);
    }

    #[test]
    fn distance_sums_channels() {
        let black = Bitmap::decode(&solid_bmp(2, 2, [0, 0, 0])).unwrap();
        let grey = Bitmap::decode(&solid_bmp(2, 2, [30, 40, 0])).unwrap();
        // Every pixel contributes 30^2 + 40^2.
        assert_eq!(rms_difference(&black, &grey), 50.0);
    }

    #[test]
    fn size_mismatch_is_infinitely_different() {
        let a = Bitmap::decode(&solid_bmp(2, 2, [0, 0, 0])).unwrap();
        let b = Bitmap::decode(&solid_bmp(3, 2, [0, 0, 0])).unwrap();
        assert!(rms_difference(&a, &b).is_infinite());
    }

    #[test]
    fn rejects_other_formats() {
        assert!(Bitmap::decode(b"\x89PNG\r\n\x1a\n").is_err());
        let mut truncated = solid_bmp(8, 8, [0, 0, 0]);
        truncated.truncate(80);
        assert!(Bitmap::decode(&truncated).is_err());
    }
}
