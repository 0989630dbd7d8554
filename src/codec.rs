//! Image codec adapter (spec Module H).
//!
//! Decode: arbitrary upstream bytes → RGBA raster, used by the Fetcher as
//! its own validation step (an undecodable body is never cached as a real
//! tile). Encode: RGBA raster → bytes in one of the four supported
//! mimetypes, with per-format quality/progressive/optimize knobs mirroring
//! `original_source/twms/twms.py`'s per-mimetype `img.save(...)` call.

use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder, ImageFormat, ImageReader, RgbaImage};

use crate::error::TwmsResult;
use crate::layer::{Color, Mimetype};

/// The result of decoding upstream or cached bytes.
#[derive(Debug, Clone)]
pub struct DecodedTile {
    pub rgba: RgbaImage,
    pub source_mimetype: Mimetype,
}

/// Per-mimetype encode knobs, mirroring the source's `output_quality`,
/// `output_progressive`, and `output_optimize` config defaults.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Fill color used to flatten alpha when encoding to JPEG.
    pub background: Color,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { jpeg_quality: 75, background: Color::WHITE }
    }
}

/// Decodes `bytes` into an RGBA raster, recording the source format.
///
/// # Errors
/// Returns [`crate::error::TwmsError::Decode`] if `bytes` is not a
/// recognised image, or [`crate::error::TwmsError::UnsupportedMimetype`] if
/// the format is recognised by `image` but outside spec §6.4.
pub fn decode(bytes: &[u8]) -> TwmsResult<DecodedTile> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format();
    let dynamic = reader.decode()?;
    let source_mimetype = match format {
        Some(ImageFormat::Jpeg) => Mimetype::Jpeg,
        Some(ImageFormat::Png) => Mimetype::Png,
        Some(ImageFormat::Gif) => Mimetype::Gif,
        Some(ImageFormat::WebP) => Mimetype::WebP,
        other => {
            return Err(crate::error::TwmsError::UnsupportedMimetype(format!("{other:?}")));
        }
    };
    Ok(DecodedTile { rgba: dynamic.to_rgba8(), source_mimetype })
}

/// Encodes `rgba` into `mimetype`, flattening alpha onto `options.background`
/// for JPEG (which has no alpha channel).
///
/// # Errors
/// Propagates any underlying codec error.
pub fn encode(rgba: &RgbaImage, mimetype: Mimetype, options: &EncodeOptions) -> TwmsResult<Vec<u8>> {
    let mut out = Vec::new();
    match mimetype {
        Mimetype::Jpeg => {
            let flattened = flatten_onto(rgba, options.background);
            let encoder = JpegEncoder::new_with_quality(&mut out, options.jpeg_quality);
            encoder.write_image(&flattened, rgba.width(), rgba.height(), ColorType::Rgb8.into())?;
            inject_exif_software(&mut out, "twms-rs");
        }
        Mimetype::Png => {
            let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Default, FilterType::Adaptive);
            encoder.write_image(rgba, rgba.width(), rgba.height(), ColorType::Rgba8.into())?;
        }
        Mimetype::Gif => {
            let mut encoder = GifEncoder::new(&mut out);
            let frame = image::Frame::new(rgba.clone());
            encoder.encode_frame(frame)?;
        }
        Mimetype::WebP => {
            let dynamic = image::DynamicImage::ImageRgba8(rgba.clone());
            dynamic.write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)?;
        }
    }
    Ok(out)
}

/// Splices a minimal EXIF APP1 segment (TIFF IFD0, one `Software` ASCII
/// tag) right after the JPEG SOI marker. Leaves `jpeg` untouched if it
/// doesn't start with a valid SOI.
fn inject_exif_software(jpeg: &mut Vec<u8>, software: &str) {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return;
    }

    let mut ascii = software.as_bytes().to_vec();
    ascii.push(0);
    let count = u32::try_from(ascii.len()).unwrap_or(1);
    let data_offset: u32 = 8 + 2 + 12 + 4;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&0x002A_u16.to_le_bytes());
    tiff.extend_from_slice(&8_u32.to_le_bytes());
    tiff.extend_from_slice(&1_u16.to_le_bytes());
    tiff.extend_from_slice(&0x0131_u16.to_le_bytes());
    tiff.extend_from_slice(&2_u16.to_le_bytes());
    tiff.extend_from_slice(&count.to_le_bytes());
    tiff.extend_from_slice(&data_offset.to_le_bytes());
    tiff.extend_from_slice(&0_u32.to_le_bytes());
    tiff.extend_from_slice(&ascii);

    let mut exif = Vec::new();
    exif.extend_from_slice(b"Exif\0\0");
    exif.extend_from_slice(&tiff);

    let seg_len = u16::try_from(exif.len() + 2).unwrap_or(u16::MAX);
    let mut app1 = vec![0xFF, 0xE1];
    app1.extend_from_slice(&seg_len.to_be_bytes());
    app1.extend_from_slice(&exif);

    jpeg.splice(2..2, app1);
}

fn flatten_onto(rgba: &RgbaImage, background: Color) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((rgba.width() * rgba.height() * 3) as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = f32::from(a) / 255.0;
        let blend = |fg: u8, bg: u8| -> u8 {
            (f32::from(fg) * alpha + f32::from(bg) * (1.0 - alpha)).round() as u8
        };
        rgb.push(blend(r, background.r));
        rgb.push(blend(g, background.g));
        rgb.push(blend(b, background.b));
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            image::Rgba([u8::try_from(x * 50).unwrap_or(255), u8::try_from(y * 50).unwrap_or(255), 128, 200])
        })
    }

    #[test]
    fn png_round_trips_through_decode() {
        let img = sample_image();
        let bytes = encode(&img, Mimetype::Png, &EncodeOptions::default()).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.source_mimetype, Mimetype::Png);
        assert_eq!(decoded.rgba.dimensions(), (4, 4));
    }

    #[test]
    fn jpeg_flattens_alpha() {
        let img = sample_image();
        let bytes = encode(&img, Mimetype::Jpeg, &EncodeOptions::default()).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.source_mimetype, Mimetype::Jpeg);
        assert!(decoded.rgba.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"not an image").is_err());
    }

    #[test]
    fn jpeg_carries_exif_software_tag() {
        let img = sample_image();
        let bytes = encode(&img, Mimetype::Jpeg, &EncodeOptions::default()).unwrap();
        let needle = b"twms-rs";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
        // still a valid, decodable JPEG after the APP1 splice
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.source_mimetype, Mimetype::Jpeg);
    }
}
