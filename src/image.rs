use crate::attr::Attributes;
use crate::error::*;
use crate::pal::RGBA;
use std::borrow::Cow;
use rgb::FromSlice;

/// Describes image dimensions and pixels for the library.
///
/// Pixels are row-major, `width × height` of them, with no padding between rows.
#[derive(Clone)]
pub struct Image<'pixels> {
    pixels: Cow<'pixels, [RGBA]>,
    width: usize,
    height: usize,
}

impl<'pixels> Image<'pixels> {
    /// Makes an image from pixels it owns (or copies)
    ///
    /// See [`Attributes::new_image`]
    pub fn new<VecRGBA>(attr: &Attributes, pixels: VecRGBA, width: usize, height: usize) -> Result<Image<'static>, Error> where VecRGBA: Into<Box<[RGBA]>> {
        let pixels: Box<[RGBA]> = pixels.into();
        Image::check_dimensions(attr, pixels.len(), width, height)?;
        Ok(Image {
            pixels: Cow::Owned(pixels.into_vec()),
            width,
            height,
        })
    }

    /// Describe dimensions of a slice of RGBA pixels without copying them
    ///
    /// See [`Attributes::new_image_borrowed`]
    pub fn new_borrowed(attr: &Attributes, pixels: &'pixels [RGBA], width: usize, height: usize) -> Result<Self, Error> {
        Self::check_dimensions(attr, pixels.len(), width, height)?;
        Ok(Self {
            pixels: Cow::Borrowed(pixels),
            width,
            height,
        })
    }

    /// Makes an image from a buffer of `width × height × 4` bytes in R, G, B, A order
    pub fn from_rgba_bytes(attr: &Attributes, bytes: &[u8], width: usize, height: usize) -> Result<Image<'static>, Error> {
        if width == 0 || height == 0 {
            return Err(EmptyImage);
        }
        let expected = width.checked_mul(height).and_then(|area| area.checked_mul(4)).ok_or(ValueOutOfRange)?;
        if bytes.len() != expected {
            attr.verbose_print(format!("  error: buffer is {} bytes, but {width}x{height} RGBA needs {expected}", bytes.len()));
            return Err(BufferSizeMismatch);
        }
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(width * height)?;
        pixels.extend_from_slice(bytes.as_rgba());
        Image::new(attr, pixels, width, height)
    }

    fn check_dimensions(attr: &Attributes, len: usize, width: usize, height: usize) -> Result<(), Error> {
        if width == 0 || height == 0 {
            attr.verbose_print("  error: image has no pixels");
            return Err(EmptyImage);
        }
        let area = width.checked_mul(height).ok_or(ValueOutOfRange)?;
        if len != area {
            attr.verbose_print(format!("  error: got {len} pixels, but {width}x{height} needs {area}"));
            return Err(BufferSizeMismatch);
        }
        Ok(())
    }

    /// Width of the image in pixels
    #[must_use]
    #[inline(always)]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the image in pixels
    #[must_use]
    #[inline(always)]
    pub fn height(&self) -> usize {
        self.height
    }

    /// All pixels, row by row
    #[must_use]
    #[inline(always)]
    pub fn pixels(&self) -> &[RGBA] {
        &self.pixels
    }
}

#[test]
fn takes_rgba() {
    let liq = Attributes::new();

    let img = vec![RGBA::new(0, 0, 0, 0); 8];

    liq.new_image_borrowed(&img, 1, 8).unwrap();
    liq.new_image_borrowed(&img, 4, 2).unwrap();
    liq.new_image_borrowed(&img, 8, 1).unwrap();
    assert_eq!(Err(BufferSizeMismatch), liq.new_image_borrowed(&img, 9, 1).map(|_| ()));
    assert_eq!(Err(BufferSizeMismatch), liq.new_image_borrowed(&img, 4, 3).map(|_| ()));
    assert_eq!(Err(BufferSizeMismatch), liq.new_image_borrowed(&img, 1, 1).map(|_| ()));
    assert_eq!(Err(EmptyImage), liq.new_image_borrowed(&img[..0], 0, 5).map(|_| ()));
    assert_eq!(Err(EmptyImage), liq.new_image(Vec::<RGBA>::new(), 3, 0).map(|_| ()));
}

#[test]
fn takes_bytes() {
    let liq = Attributes::new();
    let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let img = Image::from_rgba_bytes(&liq, &bytes, 2, 1).unwrap();
    assert_eq!(&[RGBA::new(1, 2, 3, 4), RGBA::new(5, 6, 7, 8)], img.pixels());
    assert_eq!(Err(BufferSizeMismatch), Image::from_rgba_bytes(&liq, &bytes[..7], 2, 1).map(|_| ()));
    assert_eq!(Err(EmptyImage), Image::from_rgba_bytes(&liq, &[], 0, 0).map(|_| ()));
}
