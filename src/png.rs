//! PNG file in, palette PNG file out.
//!
//! Decoding and encoding is done by `lodepng`. The output has a `tRNS` chunk only if some palette entry is translucent.
use crate::{mse_to_score, Attributes, Error, RGBA};
use std::fmt;

/// Error from [`quantize_png`]
#[derive(Debug)]
pub enum PngError {
    /// The input is not a PNG file `lodepng` can read
    Decode(lodepng::Error),
    /// Writing the palette PNG failed
    Encode(lodepng::Error),
    /// Quantization itself failed
    Quantize(Error),
}

impl fmt::Display for PngError {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "can't decode PNG: {e}"),
            Self::Encode(e) => write!(f, "can't encode PNG: {e}"),
            Self::Quantize(e) => write!(f, "can't quantize: {e}"),
        }
    }
}

impl std::error::Error for PngError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) | Self::Encode(e) => Some(e),
            Self::Quantize(e) => Some(e),
        }
    }
}

impl From<Error> for PngError {
    #[cold]
    fn from(e: Error) -> Self {
        Self::Quantize(e)
    }
}

/// Decodes a PNG, converts it to at most 256 colors, and encodes it as a palette PNG.
///
/// Unlike [`crate::quantize`], quality here is the 0-100 scale of PNG tools, where higher is better:
/// the result is rejected if it's worse than `quality_min`, and the palette stops growing once it
/// reaches `quality_max`. Usual defaults are `quality_min = 0`, `quality_max = 100`, `speed = 3`.
pub fn quantize_png(png: &[u8], quality_min: u8, quality_max: u8, speed: i32) -> Result<Vec<u8>, PngError> {
    if quality_min > quality_max || quality_max > 100 {
        return Err(Error::ValueOutOfRange.into());
    }
    let mut attr = Attributes::new();
    attr.set_speed(speed)?;
    attr.set_quality(quality_to_score(quality_max), quality_to_score(quality_min))?;

    let bitmap = lodepng::decode32(png).map_err(PngError::Decode)?;
    let (width, height) = (bitmap.width, bitmap.height);
    let image = attr.new_image(bitmap.buffer, width, height)?;

    let mut res = attr.quantize(&image)?;
    let (palette, indices) = res.remapped(&image)?;
    encode_indexed(&palette, &indices, width, height)
}

/// Maps higher-is-better quality to the highest acceptable score.
///
/// 0 accepts anything, 100 requires an exact palette. The curve is steep near 100.
fn quality_to_score(quality: u8) -> u8 {
    if quality == 0 {
        return 100;
    }
    if quality >= 100 {
        return 0;
    }
    let q = f64::from(quality);
    let low_quality_fudge = (0.016 / (0.001 + q) - 0.001).max(0.);
    let mse = 0.45 * (low_quality_fudge + 2.5 / (210. + q).powf(1.2) * (100.1 - q) / 100.);
    mse_to_score(mse).ceil() as u8
}

/// Writes indices and their palette as an 8-bit palette PNG
pub fn encode_indexed(palette: &[RGBA], indices: &[u8], width: usize, height: usize) -> Result<Vec<u8>, PngError> {
    let area = width.checked_mul(height).ok_or(Error::ValueOutOfRange)?;
    if indices.len() != area || palette.is_empty() || palette.len() > 256 {
        return Err(PngError::Quantize(Error::BufferSizeMismatch));
    }
    let mut encoder = lodepng::Encoder::new();
    encoder.set_auto_convert(false);
    encoder.set_palette(palette).map_err(PngError::Encode)?;
    encoder.encode(indices, width, height).map_err(PngError::Encode)
}

#[test]
fn round_trip() {
    let (width, height) = (13, 9);
    let colors = [RGBA::new(200, 10, 10, 255), RGBA::new(0, 90, 0, 255), RGBA::new(0, 0, 0, 0)];
    let pixels: Vec<_> = (0..width * height).map(|i| colors[(i / 5) % 3]).collect();
    let png = lodepng::encode32(&pixels, width, height).unwrap();

    let out = quantize_png(&png, 0, 100, 4).unwrap();
    let decoded = lodepng::decode32(&out).unwrap();
    assert_eq!((width, height), (decoded.width, decoded.height));
    assert_eq!(pixels, decoded.buffer);
}

#[test]
fn quality_is_higher_is_better() {
    assert_eq!(100, quality_to_score(0));
    assert_eq!(0, quality_to_score(100));
    let scores: Vec<_> = (0..=100).map(quality_to_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    assert!(quality_to_score(90) < quality_to_score(60));

    let (width, height) = (64, 64);
    let pixels: Vec<_> = (0..width * height).map(|i| RGBA::new((i % width * 2) as u8, (i / width * 2) as u8, 90, 255)).collect();
    let png = lodepng::encode32(&pixels, width, height).unwrap();
    for (qmin, qmax, speed) in [(60, 90, 4), (0, 100, 3)] {
        let out = quantize_png(&png, qmin, qmax, speed).unwrap();
        match lodepng::decode_memory(&out, lodepng::ColorType::PALETTE, 8).unwrap() {
            lodepng::Image::RawData(bitmap) => {
                let mut used = bitmap.buffer.clone();
                used.sort_unstable();
                used.dedup();
                assert!(used.len() > 64, "{qmin}-{qmax}: {} colors", used.len());
            },
            _ => panic!("expected palette image"),
        }
    }
    assert!(matches!(quantize_png(&png, 90, 60, 4), Err(PngError::Quantize(Error::ValueOutOfRange))));
}

#[test]
fn encode_checks_size() {
    let palette = [RGBA::new(0, 0, 0, 255)];
    assert!(matches!(encode_indexed(&palette, &[0; 4], usize::MAX, 2), Err(PngError::Quantize(Error::ValueOutOfRange))));
    assert!(matches!(encode_indexed(&palette, &[0; 4], 3, 2), Err(PngError::Quantize(Error::BufferSizeMismatch))));
}

#[test]
fn bad_input() {
    assert!(matches!(quantize_png(b"not a png", 0, 100, 4), Err(PngError::Decode(_))));
    assert!(matches!(quantize_png(b"", 0, 100, 0), Err(PngError::Quantize(Error::InvalidSpeed))));
}
