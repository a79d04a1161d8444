use crate::error::Error;
use crate::hist::Histogram;
use crate::image::Image;
use crate::pal::{PalLen, MAX_COLORS, RGBA};
use crate::quant::QuantizationResult;
use crate::remap::RemapMode;
use std::sync::Arc;

/// Starting point and settings for the quantization process
#[derive(Clone)]
pub struct Attributes {
    pub(crate) max_colors: PalLen,
    quality_min: u8,
    quality_max: u8,
    speed: u8,
    kmeans_iterations: u16,
    kmeans_iteration_limit: f64,
    pub(crate) remap_mode: RemapMode,
    pub(crate) last_index_transparent: bool,

    progress_callback: Option<Arc<dyn Fn(f32) -> ControlFlow + Send + Sync>>,
    log_callback: Option<Arc<dyn Fn(&Attributes, &str) + Send + Sync>>,
    log_flush_callback: Option<Arc<dyn Fn(&Attributes) + Send + Sync>>,
}

impl Attributes {
    /// New handle for library configuration
    ///
    /// Defaults: quality `0..=100` (aim for an exact palette, accept any result), speed 4, up to 256 colors.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let mut attr = Self {
            max_colors: MAX_COLORS as PalLen,
            quality_min: 0,
            quality_max: 100,
            speed: 0,
            kmeans_iterations: 0,
            kmeans_iteration_limit: 0.,
            remap_mode: RemapMode::Exact,
            last_index_transparent: false,
            progress_callback: None,
            log_callback: None,
            log_flush_callback: None,
        };
        let _ = attr.set_speed(4);
        attr
    }

    /// Make an image from RGBA pixels, taking ownership of (or copying) them.
    ///
    /// The `pixels` argument can be `Vec<RGBA>`, or `Box<[RGBA]>` or `&[RGBA]`.
    /// See [`Attributes::new_image_borrowed`] for a non-copying alternative.
    #[inline]
    pub fn new_image<VecRGBA>(&self, pixels: VecRGBA, width: usize, height: usize) -> Result<Image<'static>, Error> where VecRGBA: Into<Box<[RGBA]>> {
        Image::new(self, pixels, width, height)
    }

    /// Describe dimensions of a slice of RGBA pixels
    #[inline]
    pub fn new_image_borrowed<'pixels>(&self, bitmap: &'pixels [RGBA], width: usize, height: usize) -> Result<Image<'pixels>, Error> {
        Image::new_borrowed(self, bitmap, width, height)
    }

    /// Generate palette for the image
    pub fn quantize(&self, image: &Image<'_>) -> Result<QuantizationResult, Error> {
        let mut hist = Histogram::new(self);
        hist.add_image(self, image)?;
        hist.quantize_internal(self)
    }

    /// Upper limit of the palette size, 1-256.
    ///
    /// It's better to use `set_quality()` and let the search pick the size.
    #[inline]
    pub fn set_max_colors(&mut self, colors: u32) -> Result<(), Error> {
        if !(1..=MAX_COLORS as u32).contains(&colors) {
            return Err(Error::PaletteSize);
        }
        self.max_colors = colors as PalLen;
        Ok(())
    }

    /// Error scores 0-100 that the palette should meet. 0 means identical to the input, 100 is the worst possible.
    ///
    /// The smallest palette with score ≤ `minimum` is used. If no palette gets there,
    /// the largest allowed palette is used as long as its score is ≤ `maximum`;
    /// otherwise quantization fails with [`Error::QualityUnattainable`].
    ///
    /// Default is min 0, max 100: aim for an exact palette, and never fail.
    pub fn set_quality(&mut self, minimum: u8, maximum: u8) -> Result<(), Error> {
        if maximum > 100 || minimum > maximum {
            return Err(Error::ValueOutOfRange);
        }
        if maximum == 0 {
            self.verbose_print("  warning: only a lossless palette is acceptable");
        }
        self.quality_min = minimum;
        self.quality_max = maximum;
        Ok(())
    }

    /// Reads values set with `set_quality`
    #[inline]
    #[must_use]
    pub fn quality(&self) -> (u8, u8) {
        (self.quality_min, self.quality_max)
    }

    /// 1-11.
    ///
    /// 1 is the slowest and best: K-means refinement and error diffusion dithering.
    /// 8 and above use a cached approximate color lookup without error diffusion,
    /// and on large images count only a sample of the pixels.
    ///
    /// The default is 4.
    #[inline]
    pub fn set_speed(&mut self, value: i32) -> Result<(), Error> {
        if !(1..=11).contains(&value) {
            return Err(Error::InvalidSpeed);
        }
        let mut iterations = (8 - value).max(0) as u16;
        iterations += iterations * iterations / 2;
        self.kmeans_iterations = iterations;
        self.kmeans_iteration_limit = 1. / f64::from(1 << (23 - value));
        self.remap_mode = if value <= 7 { RemapMode::Exact } else { RemapMode::Approximate };
        self.speed = value as u8;
        Ok(())
    }

    /// Return currently set speed/quality trade-off setting
    #[inline(always)]
    #[must_use]
    pub fn speed(&self) -> u32 {
        self.speed.into()
    }

    /// Return max number of colors set
    #[inline(always)]
    #[must_use]
    pub fn max_colors(&self) -> u32 {
        self.max_colors.into()
    }

    /// Move the most transparent color to the last entry in the palette
    ///
    /// This is less efficient for PNG, but required by some broken software
    #[inline(always)]
    pub fn set_last_index_transparent(&mut self, is_last: bool) {
        self.last_index_transparent = is_last;
    }

    /// Set callback function to be called every time the library wants to print a message.
    ///
    /// To share data with the callback, use `Arc` or `Atomic*` types and `move ||` closures.
    #[inline]
    pub fn set_log_callback<F: Fn(&Attributes, &str) + Send + Sync + 'static>(&mut self, callback: F) {
        self.verbose_printf_flush();
        self.log_callback = Some(Arc::new(callback));
    }

    /// Callback for flushing output (if you buffer messages, that's the time to flush those buffers)
    #[inline]
    pub fn set_log_flush_callback<F: Fn(&Attributes) + Send + Sync + 'static>(&mut self, callback: F) {
        self.verbose_printf_flush();
        self.log_flush_callback = Some(Arc::new(callback));
    }

    /// Set callback function to be called every time the library makes a progress.
    /// It can be used to cancel operation early.
    ///
    /// To share data with the callback, use `Arc` or `Atomic*` types and `move ||` closures.
    #[inline]
    pub fn set_progress_callback<F: Fn(f32) -> ControlFlow + Send + Sync + 'static>(&mut self, callback: F) {
        self.progress_callback = Some(Arc::new(callback));
    }

    // true == abort
    #[inline]
    #[must_use]
    pub(crate) fn progress(&self, percent: f32) -> bool {
        if let Some(f) = &self.progress_callback {
            f(percent) == ControlFlow::Break
        } else {
            false
        }
    }

    #[inline(always)]
    pub(crate) fn verbose_print(&self, msg: impl AsRef<str>) {
        fn _print(a: &Attributes, msg: &str) {
            if let Some(f) = &a.log_callback {
                f(a, msg);
            }
        }
        _print(self, msg.as_ref());
    }

    #[inline]
    pub(crate) fn verbose_printf_flush(&self) {
        if let Some(f) = &self.log_flush_callback {
            f(self);
        }
    }

    /// Score the palette should reach, and the score it must not exceed
    #[inline]
    pub(crate) fn score_limits(&self) -> (f64, f64) {
        (f64::from(self.quality_min), f64::from(self.quality_max))
    }

    /// Large images at high speeds are counted from every n-th pixel
    #[must_use]
    pub(crate) fn sample_stride(&self, pixels: usize) -> usize {
        if pixels < 512 * 512 || self.speed <= 8 {
            1
        } else {
            usize::from(self.speed - 7)
        }
    }

    /// returns iterations, `iteration_limit`
    #[must_use]
    pub(crate) fn kmeans_iterations(&self, hist_items_len: usize) -> (u16, f64) {
        let mut iteration_limit = self.kmeans_iteration_limit;
        let mut iterations = self.kmeans_iterations;
        if hist_items_len > 5000 {
            iterations = (iterations * 3 + 3) / 4;
        }
        if hist_items_len > 50000 {
            iterations = (iterations * 3 + 3) / 4;
        }
        if hist_items_len > 100_000 {
            iterations = (iterations * 3 + 3) / 4;
            iteration_limit *= 2.;
        }
        (iterations, iteration_limit)
    }
}

impl Drop for Attributes {
    fn drop(&mut self) {
        self.verbose_printf_flush();
    }
}

impl Default for Attributes {
    #[inline(always)]
    fn default() -> Attributes {
        Attributes::new()
    }
}

/// Result of callback in [`Attributes::set_progress_callback`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlFlow {
    /// Continue processing as normal
    Continue = 1,
    /// Abort processing and fail
    Break = 0,
}

#[test]
fn counters() {
    let mut a = Attributes::new();
    a.set_speed(10).unwrap();
    let (iter, _) = a.kmeans_iterations(1000);
    assert_eq!(iter, 0);
    assert_eq!(RemapMode::Approximate, a.remap_mode);

    a.set_speed(1).unwrap();
    let (iter, limit) = a.kmeans_iterations(1000);
    assert!(iter > 10);
    assert!(limit > 0. && limit < 0.01);
    let (fewer, _) = a.kmeans_iterations(200_000);
    assert!(fewer < iter);
    assert_eq!(RemapMode::Exact, a.remap_mode);
}

#[test]
fn getset() {
    let mut a = Attributes::new();
    assert_eq!((0, 100), a.quality());
    assert_eq!(4, a.speed());
    assert_eq!(256, a.max_colors());
    assert_eq!(Err(Error::ValueOutOfRange), a.set_quality(0, 101));
    assert_eq!(Err(Error::ValueOutOfRange), a.set_quality(50, 49));
    a.set_quality(10, 30).unwrap();
    assert_eq!((10., 30.), a.score_limits());

    a.set_speed(11).unwrap();
    assert_eq!(11, a.speed());
    assert_eq!(Err(Error::InvalidSpeed), a.set_speed(12));
    assert_eq!(Err(Error::InvalidSpeed), a.set_speed(0));
    assert_eq!(Err(Error::InvalidSpeed), a.set_speed(-3));

    a.set_max_colors(5).unwrap();
    assert_eq!(5, a.max_colors());
    assert_eq!(Err(Error::PaletteSize), a.set_max_colors(0));
    assert_eq!(Err(Error::PaletteSize), a.set_max_colors(257));
}

#[test]
fn stride_by_speed() {
    let mut a = Attributes::new();
    assert_eq!(1, a.sample_stride(4000 * 4000));
    a.set_speed(9).unwrap();
    assert_eq!(1, a.sample_stride(100 * 100));
    assert_eq!(2, a.sample_stride(4000 * 4000));
    a.set_speed(11).unwrap();
    assert_eq!(4, a.sample_stride(4000 * 4000));
}

#[test]
fn log_and_flush() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let logged = Arc::new(AtomicUsize::new(0));
    let flushed = Arc::new(AtomicUsize::new(0));
    {
        let mut a = Attributes::new();
        let l = logged.clone();
        a.set_log_callback(move |_, msg| {
            assert!(!msg.is_empty());
            l.fetch_add(1, Ordering::SeqCst);
        });
        let f = flushed.clone();
        a.set_log_flush_callback(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        a.set_quality(0, 0).unwrap();
    }
    assert_eq!(1, logged.load(Ordering::SeqCst));
    assert_eq!(1, flushed.load(Ordering::SeqCst));
}
