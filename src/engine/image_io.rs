// Image dumps: the raw `img` debug format and PNG screenshots.
//
// `img` layout:
//   "img" | width: i32 LE | height: i32 LE | format: i32 LE | payload
// where the payload is width * height * bytes_per_pixel(format) raw bytes,
// rows top to bottom. No compression, no version field.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::error::ImageError;

const MAGIC: &[u8; 3] = b"img";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ImgFormat {
    R8 = 1,
    Rg8 = 2,
    Rgb8 = 3,
    Rgba8 = 4,
    R16 = 5,
    Rg16 = 6,
    Rgb16 = 7,
    Rgba16 = 8,
    R32F = 9,
    Rg32F = 10,
    Rgb32F = 11,
    Rgba32F = 12,
}

impl ImgFormat {
    pub const ALL: [ImgFormat; 12] = [
        ImgFormat::R8,
        ImgFormat::Rg8,
        ImgFormat::Rgb8,
        ImgFormat::Rgba8,
        ImgFormat::R16,
        ImgFormat::Rg16,
        ImgFormat::Rgb16,
        ImgFormat::Rgba16,
        ImgFormat::R32F,
        ImgFormat::Rg32F,
        ImgFormat::Rgb32F,
        ImgFormat::Rgba32F,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self, ImageError> {
        Self::ALL
            .into_iter()
            .find(|f| f.code() == code)
            .ok_or(ImageError::UnknownFormat(code))
    }

    pub fn channels(self) -> usize {
        (self.code() as usize - 1) % 4 + 1
    }

    pub fn bytes_per_channel(self) -> usize {
        match self.code() {
            1..=4 => 1,
            5..=8 => 2,
            _ => 4,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.channels() * self.bytes_per_channel()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width:  u32,
    pub height: u32,
    pub format: ImgFormat,
    pub data:   Vec<u8>,
}

impl RawImage {
    /// Checks the payload length against the dimensions and format.
    pub fn new(width: u32, height: u32, format: ImgFormat, data: Vec<u8>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(ImageError::BadDimensions {
                width: width as i32,
                height: height as i32,
            });
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(ImageError::Truncated { expected, got: data.len() });
        }
        Ok(Self { width, height, format, data })
    }
}

pub fn write_img<W: Write>(mut out: W, image: &RawImage) -> Result<(), ImageError> {
    out.write_all(MAGIC)?;
    out.write_all(&(image.width as i32).to_le_bytes())?;
    out.write_all(&(image.height as i32).to_le_bytes())?;
    out.write_all(&image.format.code().to_le_bytes())?;
    out.write_all(&image.data)?;
    out.flush()?;
    Ok(())
}

const READ_CHUNK: usize = 1 << 20;

pub fn read_img<R: Read>(mut input: R) -> Result<RawImage, ImageError> {
    let mut magic = [0u8; 3];
    input.read_exact(&mut magic).map_err(|_| ImageError::BadMagic)?;
    if &magic != MAGIC {
        return Err(ImageError::BadMagic);
    }

    let mut header = [0u8; 12];
    input.read_exact(&mut header).map_err(|_| ImageError::Truncated {
        expected: 12,
        got: 0,
    })?;
    let field = |i: usize| i32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
    let (width, height, code) = (field(0), field(4), field(8));

    if width <= 0 || height <= 0 {
        return Err(ImageError::BadDimensions { width, height });
    }
    let format = ImgFormat::from_code(code)?;

    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
        .ok_or(ImageError::BadDimensions { width, height })?;
    // The header is untrusted; grow with the data actually present.
    let mut data = Vec::with_capacity(expected.min(READ_CHUNK));
    input.take(expected as u64).read_to_end(&mut data)?;
    if data.len() != expected {
        return Err(ImageError::Truncated { expected, got: data.len() });
    }

    Ok(RawImage {
        width: width as u32,
        height: height as u32,
        format,
        data,
    })
}

pub fn save_img(path: &Path, image: &RawImage) -> Result<(), ImageError> {
    write_img(BufWriter::new(File::create(path)?), image)?;
    log::debug!("Wrote {}x{} img to {}", image.width, image.height, path.display());
    Ok(())
}

pub fn load_img(path: &Path) -> Result<RawImage, ImageError> {
    read_img(BufReader::new(File::open(path)?))
}

/// 8-bit RGBA PNG, rows top to bottom.
pub fn save_png(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<(), ImageError> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(ImageError::Truncated { expected, got: rgba.len() });
    }

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba)?;
    writer.finish()?;

    log::info!("Saved screenshot {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: i32, height: i32, code: i32) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        for v in [width, height, code] {
            bytes.extend(v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn pixel_sizes_follow_the_code_table() {
        let expected = [1, 2, 3, 4, 2, 4, 6, 8, 4, 8, 12, 16];
        for (format, bpp) in ImgFormat::ALL.into_iter().zip(expected) {
            assert_eq!(format.bytes_per_pixel(), bpp, "{format:?}");
        }
        assert_eq!(ImgFormat::from_code(4).unwrap(), ImgFormat::Rgba8);
        assert!(matches!(ImgFormat::from_code(0), Err(ImageError::UnknownFormat(0))));
        assert!(matches!(ImgFormat::from_code(13), Err(ImageError::UnknownFormat(13))));
    }

    #[test]
    fn header_layout_is_little_endian() {
        let image = RawImage::new(2, 1, ImgFormat::Rgb8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let mut bytes = Vec::new();
        write_img(&mut bytes, &image).unwrap();

        let mut expected = header(2, 1, 3);
        expected.extend([1, 2, 3, 4, 5, 6]);
        assert_eq!(bytes, expected);
        assert_eq!(read_img(bytes.as_slice()).unwrap(), image);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header(1, 1, 1);
        bytes[0] = b'p';
        bytes.push(0);
        assert!(matches!(read_img(bytes.as_slice()), Err(ImageError::BadMagic)));
        assert!(matches!(read_img(&b"im"[..]), Err(ImageError::BadMagic)));
    }

    #[test]
    fn rejects_unknown_code_and_bad_dimensions() {
        let bytes = header(1, 1, 42);
        assert!(matches!(read_img(bytes.as_slice()), Err(ImageError::UnknownFormat(42))));

        let bytes = header(0, 5, 1);
        assert!(matches!(
            read_img(bytes.as_slice()),
            Err(ImageError::BadDimensions { width: 0, height: 5 })
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = header(2, 2, 9);
        bytes.extend([0u8; 10]);
        assert!(matches!(
            read_img(bytes.as_slice()),
            Err(ImageError::Truncated { expected: 16, got: 10 })
        ));
    }

    #[test]
    fn oversized_header_is_an_error_not_an_allocation() {
        let bytes = header(i32::MAX, i32::MAX, 12);
        assert!(matches!(
            read_img(bytes.as_slice()),
            Err(ImageError::BadDimensions { width: i32::MAX, height: i32::MAX })
        ));

        let mut bytes = header(30_000, 30_000, 4);
        bytes.extend([7u8; 8]);
        assert!(matches!(
            read_img(bytes.as_slice()),
            Err(ImageError::Truncated { expected: 3_600_000_000, got: 8 })
        ));
    }

    #[test]
    fn raw_image_checks_payload_length() {
        assert!(RawImage::new(2, 2, ImgFormat::Rgba8, vec![0; 15]).is_err());
        assert!(RawImage::new(0, 2, ImgFormat::Rgba8, Vec::new()).is_err());
        assert!(RawImage::new(2, 2, ImgFormat::R16, vec![0; 8]).is_ok());
    }

    #[test]
    fn png_rejects_short_buffers() {
        let path = std::env::temp_dir().join("ptex_methods_short.png");
        assert!(save_png(&path, 4, 4, &[0; 10]).is_err());
    }
}
