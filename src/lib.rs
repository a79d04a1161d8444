//! Converts RGBA images to 8-bit indexed (palette) images with alpha.
//!
//! The palette is made with median cut, optionally refined with K-means,
//! and its size is picked by a bounded search for the smallest palette that
//! meets the requested quality. Pixels are mapped with Floyd-Steinberg dithering,
//! or with a fast cached lookup at high speed settings.
//!
//! For one-off conversions use [`quantize`]. For more control (shared palettes, dithering level,
//! progress and log callbacks) start with [`Attributes::new()`].
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::wildcard_imports)]

mod attr;
mod error;
mod hist;
mod image;
mod kmeans;
mod mediancut;
mod nearest;
mod pal;
mod quality;
mod quant;
mod remap;

#[cfg(feature = "png")]
pub mod png;

#[cfg(not(feature = "threads"))]
mod rayoff;

pub use attr::{Attributes, ControlFlow};
pub use error::Error;
pub use hist::{Histogram, HistogramEntry};
pub use image::Image;
pub use pal::RGBA;
pub use quality::mse_to_score;
pub use quant::QuantizationResult;

/// Palette, one palette index per pixel, and how far the palette is from the input
#[derive(Debug, Clone, PartialEq)]
pub struct Quantized {
    /// 1 to 256 distinct colors, most used first
    pub palette: Vec<RGBA>,
    /// `width × height` indices into `palette`, row by row
    pub indices: Vec<u8>,
    /// 0-100, where 0 means every pixel got its exact color
    pub score: f64,
}

/// Converts a `width × height × 4` buffer of R, G, B, A bytes to a palette and indices.
///
/// `quality_min` and `quality_max` are 0-100 scores, where 0 is lossless:
/// the smallest palette scoring at or below `quality_min` is used, otherwise the largest allowed palette
/// as long as it scores at or below `quality_max`. `speed` is 1 (slowest, best) to 11 (fastest).
///
/// ```rust,ignore
/// let out = palquant::quantize(&rgba_bytes, width, height, 0, 20, 4)?;
/// assert_eq!(out.indices.len(), width * height);
/// ```
pub fn quantize(raster: &[u8], width: usize, height: usize, quality_min: u8, quality_max: u8, speed: i32) -> Result<Quantized, Error> {
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage);
    }
    let mut attr = Attributes::new();
    attr.set_speed(speed)?;
    attr.set_quality(quality_min, quality_max)?;
    let image = Image::from_rgba_bytes(&attr, raster, width, height)?;

    let mut res = attr.quantize(&image)?;
    let (palette, indices) = res.remapped(&image)?;
    Ok(Quantized {
        palette,
        indices,
        score: res.quantization_score(),
    })
}

#[cfg(test)]
fn quantize_pixels(pixels: &[RGBA], width: usize, height: usize, quality_min: u8, quality_max: u8, speed: i32) -> Result<Quantized, Error> {
    let bytes: Vec<u8> = pixels.iter().flat_map(|px| [px.r, px.g, px.b, px.a]).collect();
    quantize(&bytes, width, height, quality_min, quality_max, speed)
}

#[test]
fn poke_it() {
    let width = 10usize;
    let height = 10usize;
    let mut fakebitmap = vec![RGBA::new(255, 255, 255, 255); width * height];

    fakebitmap[0].r = 0x55;
    fakebitmap[0].g = 0x66;
    fakebitmap[0].b = 0x77;

    // Configure the library
    let mut liq = Attributes::new();
    liq.set_speed(5).unwrap();
    liq.set_quality(0, 30).unwrap();

    // Describe the bitmap
    let img = liq.new_image(&fakebitmap[..], width, height).unwrap();

    // The magic happens in quantize()
    let mut res = match liq.quantize(&img) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err:?}"),
    };

    // Enable dithering for subsequent remappings
    res.set_dithering_level(1.0).unwrap();

    // You can reuse the result to generate several images with the same palette
    let (palette, pixels) = res.remapped(&img).unwrap();

    assert_eq!(width * height, pixels.len());
    assert_eq!(0., res.quantization_score());
    assert_eq!(Some(0.), res.remapping_score());
    assert_eq!(RGBA { r: 255, g: 255, b: 255, a: 255 }, palette[0]);
    assert_eq!(RGBA { r: 0x55, g: 0x66, b: 0x77, a: 255 }, palette[1]);
    assert_eq!(1, pixels[0]);
    assert!(pixels[1..].iter().all(|&i| i == 0));
}

#[test]
fn histogram() {
    let attr = Attributes::new();
    let mut hist = Histogram::new(&attr);

    let bitmap1 = [RGBA::new(0, 0, 0, 0)];
    let image1 = attr.new_image(&bitmap1[..], 1, 1).unwrap();
    hist.add_image(&attr, &image1).unwrap();

    let bitmap2 = [RGBA::new(255, 255, 255, 255); 4];
    let image2 = attr.new_image(&bitmap2[..], 2, 2).unwrap();
    hist.add_image(&attr, &image2).unwrap();

    hist.add_colors(&[HistogramEntry {
        color: RGBA::new(255, 128, 255, 128),
        count: 10,
    }]).unwrap();

    let res = hist.quantize(&attr).unwrap();
    let pal = res.palette();
    assert_eq!(3, pal.len());
    assert_eq!(RGBA::new(255, 128, 255, 128), pal[0]);
    assert_eq!(RGBA::new(255, 255, 255, 255), pal[1]);
    assert_eq!(RGBA::new(0, 0, 0, 0), pal[2]);
}

#[test]
fn thread() {
    let liq = Attributes::new();
    std::thread::spawn(move || {
        let b = vec![RGBA::new(0, 0, 0, 0); 1];
        liq.new_image_borrowed(&b, 1, 1).unwrap();
    }).join().unwrap();
}

#[test]
fn rejects_bad_arguments() {
    let px = [RGBA::new(1, 2, 3, 255)];
    assert_eq!(Err(Error::EmptyImage), quantize(&[], 0, 0, 0, 100, 4));
    assert_eq!(Err(Error::EmptyImage), quantize(&[], 5, 0, 0, 100, 4));
    assert_eq!(Err(Error::InvalidSpeed), quantize_pixels(&px, 1, 1, 0, 100, 0));
    assert_eq!(Err(Error::InvalidSpeed), quantize_pixels(&px, 1, 1, 0, 100, 12));
    assert_eq!(Err(Error::ValueOutOfRange), quantize_pixels(&px, 1, 1, 50, 40, 4));
    assert_eq!(Err(Error::ValueOutOfRange), quantize_pixels(&px, 1, 1, 0, 101, 4));
    assert_eq!(Err(Error::BufferSizeMismatch), quantize(&[0; 7], 1, 2, 0, 100, 4));
}

#[test]
fn single_pixel() {
    for speed in 1..=11 {
        for color in [RGBA::new(0, 0, 0, 0), RGBA::new(255, 0, 0, 0), RGBA::new(12, 34, 56, 78), RGBA::new(255, 255, 255, 255)] {
            let out = quantize_pixels(&[color], 1, 1, 0, 100, speed).unwrap();
            assert_eq!(vec![color], out.palette);
            assert_eq!(vec![0], out.indices);
            assert_eq!(0., out.score);
        }
    }
}
