use crate::attr::{Attributes, ControlFlow};
use crate::error::*;
use crate::hist::HistogramInternal;
use crate::image::Image;
use crate::kmeans::refine_palette;
use crate::mediancut::mediancut;
use crate::nearest::{Nearest, PaletteLookup};
use crate::pal::{PalF, PalPop, MAX_COLORS, RGBA};
use crate::quality::{mse_to_score, palette_score};
use crate::remap::{remap_to_palette, remap_to_palette_floyd, RemapMode};
use arrayvec::ArrayVec;
use std::fmt;
use std::sync::Arc;

/// Two probes, a bisection of `1..=256` (8 halvings plus the last step), and the fallback to the largest palette
const MAX_SEARCH_ATTEMPTS: u32 = 2 + 8 + 1;

/// Remapping step, computed from [`Attributes::quantize()`]
pub struct QuantizationResult {
    palette: PalF,
    int_palette: ArrayVec<RGBA, MAX_COLORS>,
    palette_mse: f64,
    score: f64,
    remap_mode: RemapMode,
    dither_level: f32,
    remapping_score: Option<f64>,
    progress_callback: Option<Arc<dyn Fn(f32) -> ControlFlow + Send + Sync>>,
}

/// A palette that has been measured against the histogram
struct Candidate {
    palette: PalF,
    mse: f64,
    score: f64,
}

impl QuantizationResult {
    pub(crate) fn new(attr: &Attributes, mut hist: HistogramInternal) -> Result<Self, Error> {
        let mut best = find_best_palette(attr, &mut hist)?;

        if attr.progress(90.) {
            return Err(Aborted);
        }

        let (iterations, iteration_limit) = attr.kmeans_iterations(hist.items.len());
        if iterations > 0 && best.score > 0. {
            attr.verbose_print("  moving colormap towards local minimum");
            let mut refined = best.palette.clone();
            refine_palette(&mut hist, &mut refined, iterations, iteration_limit)?;
            refined.round_and_dedup();
            let (mse, score) = palette_score(&hist, &refined)?;
            if score <= best.score {
                best = Candidate { palette: refined, mse, score };
            } else {
                attr.verbose_print(format!("  refined palette was worse (score {score:.2}), kept the original"));
            }
        }

        let Candidate { mut palette, mse, score } = best;
        count_popularity(&hist, &mut palette)?;
        sort_palette(attr, &mut palette);

        attr.verbose_print(format!("  quantized to {} colors, score {score:.2}", palette.len()));

        Ok(Self {
            int_palette: palette.to_rgba_vec(),
            palette,
            palette_mse: mse,
            score,
            remap_mode: attr.remap_mode,
            dither_level: 1.,
            remapping_score: None,
            progress_callback: None,
        })
    }

    /// Set to 1.0 to get nice smooth image, 0 disables error diffusion
    ///
    /// Has no effect at speeds 8 and above, which never dither.
    pub fn set_dithering_level(&mut self, value: f32) -> Result<(), Error> {
        if !(0. ..=1.).contains(&value) {
            return Err(ValueOutOfRange);
        }
        self.remapping_score = None;
        self.dither_level = value;
        Ok(())
    }

    /// Level set with [`set_dithering_level()`][Self::set_dithering_level]
    #[inline]
    #[must_use]
    pub fn dithering_level(&self) -> f32 {
        self.dither_level
    }

    /// 0-100 score of the palette measured on the histogram. 0 means the palette has every color exactly.
    #[inline]
    #[must_use]
    pub fn quantization_score(&self) -> f64 {
        self.score
    }

    /// Score of the pixels written by the most recent remapping, on the same scale as [`quantization_score()`][Self::quantization_score]
    #[inline]
    #[must_use]
    pub fn remapping_score(&self) -> Option<f64> {
        self.remapping_score
    }

    /// The final palette
    #[inline]
    #[must_use]
    pub fn palette(&self) -> &[RGBA] {
        &self.int_palette
    }

    /// The final palette, copied
    #[must_use]
    pub fn palette_vec(&self) -> Vec<RGBA> {
        self.int_palette.to_vec()
    }

    /// Number of colors in the palette
    #[inline]
    #[must_use]
    pub fn palette_len(&self) -> usize {
        self.int_palette.len()
    }

    /// Callback called while remapping, which gets percentage of progress done,
    /// and can return `ControlFlow::Break` to abort further processing
    #[inline(always)]
    pub fn set_progress_callback<F: Fn(f32) -> ControlFlow + Sync + Send + 'static>(&mut self, callback: F) {
        self.progress_callback = Some(Arc::new(callback));
    }

    // true == abort
    fn remap_progress(&self, percent: f32) -> bool {
        if let Some(cb) = &self.progress_callback {
            cb(percent) == ControlFlow::Break
        } else {
            false
        }
    }

    /// Remap image into a palette + indices.
    ///
    /// Returns the palette and a 1-byte-per-pixel uncompressed bitmap
    pub fn remapped(&mut self, image: &Image<'_>) -> Result<(Vec<RGBA>, Vec<u8>), Error> {
        let mut buf = Vec::new();
        let pal = self.remap_into_vec(image, &mut buf)?;
        Ok((pal, buf))
    }

    /// Remap image into an existing buffer. Use [`remapped()`][Self::remapped] if you don't have a pre-allocated buffer to reuse.
    ///
    /// Writes 1-byte-per-pixel uncompressed bitmap into the `Vec`. On error the `Vec` is left empty.
    ///
    /// Returns the palette.
    pub fn remap_into_vec(&mut self, image: &Image<'_>, buf: &mut Vec<u8>) -> Result<Vec<RGBA>, Error> {
        let len = image.width() * image.height();
        buf.clear();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);

        let res = if self.dither_level > 0. && self.remap_mode == RemapMode::Exact {
            remap_to_palette_floyd(image, buf, &self.palette, self.dither_level, self.palette_mse, |percent| self.remap_progress(percent))
        } else {
            remap_to_palette(image, buf, &self.palette, self.remap_mode)
        };
        match res {
            Ok(mse) => {
                self.remapping_score = Some(mse_to_score(mse));
                Ok(self.palette_vec())
            },
            Err(e) => {
                buf.clear();
                Err(e)
            },
        }
    }
}

impl fmt::Debug for QuantizationResult {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuantizationResult(colors={}, score={:.2})", self.int_palette.len(), self.score)
    }
}

/// Bounded search for the smallest palette that meets the target score
struct PaletteSearch<'a> {
    attr: &'a Attributes,
    hist: &'a mut HistogramInternal,
    attempts: u32,
}

impl PaletteSearch<'_> {
    fn try_size(&mut self, colors: usize) -> Result<Candidate, Error> {
        if self.attempts >= MAX_SEARCH_ATTEMPTS {
            self.attr.verbose_print("  gave up searching for palette size");
            return Err(QualityUnattainable);
        }
        self.attempts += 1;
        if self.attr.progress(10. + 70. * self.attempts as f32 / MAX_SEARCH_ATTEMPTS as f32) {
            return Err(Aborted);
        }

        let mut palette = mediancut(self.hist, colors)?;
        palette.round_and_dedup();
        let (mse, score) = palette_score(self.hist, &palette)?;
        self.attr.verbose_print(format!("  trying {colors} colors...score {score:.2}"));
        Ok(Candidate { palette, mse, score })
    }
}

/// First size to try. The more error is allowed, the smaller the palette is likely to be.
fn initial_size(score_limit: f64, max_size: usize) -> usize {
    let fraction = (1. - score_limit / 100.).max(0.).sqrt();
    ((max_size as f64 * fraction).ceil() as usize).clamp(1, max_size)
}

fn find_best_palette(attr: &Attributes, hist: &mut HistogramInternal) -> Result<Candidate, Error> {
    let (target_score, max_score) = attr.score_limits();
    let distinct = hist.items.len();
    let max_size = usize::from(attr.max_colors).min(distinct);

    let mut search = PaletteSearch { attr, hist, attempts: 0 };
    let mut best: Option<Candidate> = None;
    let mut largest: Option<Candidate> = None;

    // with more colors than palette entries, nothing can be exact
    if target_score > 0. || distinct <= max_size {
        let mut lo = 1;
        let mut hi = max_size;
        let mut size = initial_size(max_score, max_size);
        loop {
            let candidate = search.try_size(size)?;
            if candidate.score <= target_score {
                hi = size - 1;
                best = Some(candidate);
            } else {
                lo = size + 1;
                if size == max_size {
                    largest = Some(candidate);
                }
            }
            if lo > hi {
                break;
            }
            size = lo + (hi - lo) / 2;
        }
    }

    if let Some(best) = best {
        return Ok(best);
    }

    let largest = match largest {
        Some(c) => c,
        None => search.try_size(max_size)?,
    };
    if largest.score <= max_score {
        return Ok(largest);
    }
    attr.verbose_print(format!("  score {:.2} of {} colors exceeded limit of {max_score}", largest.score, largest.palette.len()));
    Err(QualityUnattainable)
}

/// Sets every entry's popularity to the pixels that are closest to it
fn count_popularity(hist: &HistogramInternal, palette: &mut PalF) -> Result<(), Error> {
    let mut pops = [(0., u64::MAX); MAX_COLORS];
    {
        let n = Nearest::new(palette)?;
        for item in hist.items.iter() {
            let (idx, _) = n.search(&item.color, item.likely_palette_index);
            let pop = &mut pops[usize::from(idx)];
            pop.0 += item.weight;
            pop.1 = pop.1.min(item.first_seen);
        }
    }
    for ((_, dst), (popularity, first_seen)) in palette.iter_mut().zip(pops) {
        *dst = PalPop::new(popularity, first_seen);
    }
    Ok(())
}

fn sort_palette(attr: &Attributes, palette: &mut PalF) {
    palette.sort_by_popularity();
    if attr.last_index_transparent {
        palette.move_transparent_last();
    }
    let num_transparent = palette.as_slice().iter().filter(|c| c.to_rgba().a < 255).count();
    if num_transparent > 0 {
        attr.verbose_print(format!("  {} entr{} translucent", num_transparent, if num_transparent == 1 { "y is" } else { "ies are" }));
    }
}

#[cfg(test)]
fn quantize_pixels(attr: &Attributes, pixels: &[RGBA], width: usize, height: usize) -> Result<QuantizationResult, Error> {
    let img = attr.new_image_borrowed(pixels, width, height)?;
    attr.quantize(&img)
}

#[test]
fn initial_size_follows_limit() {
    assert_eq!(1, initial_size(100., 256));
    assert_eq!(256, initial_size(0., 256));
    assert_eq!(128, initial_size(75., 256));
    assert_eq!(1, initial_size(50., 1));
}

#[test]
fn smallest_exact_palette() {
    let attr = Attributes::new();
    let colors = [RGBA::new(255, 0, 0, 255), RGBA::new(0, 0, 255, 255), RGBA::new(0, 255, 0, 128)];
    let pixels: Vec<_> = (0..30).map(|i| colors[i % 3]).collect();
    let res = quantize_pixels(&attr, &pixels, 6, 5).unwrap();
    assert_eq!(3, res.palette_len());
    assert_eq!(0., res.quantization_score());
    assert_eq!(&colors[..], res.palette());
}

#[test]
fn lossy_within_limits() {
    let mut attr = Attributes::new();
    attr.set_quality(10, 40).unwrap();
    let pixels: Vec<_> = (0..64 * 64).map(|i| RGBA::new((i % 64 * 4) as u8, (i / 64 * 4) as u8, 90, 255)).collect();
    let res = quantize_pixels(&attr, &pixels, 64, 64).unwrap();
    assert!(res.quantization_score() <= 40.);
    assert!(res.palette_len() < 256);
}

#[test]
fn unattainable_quality() {
    let mut attr = Attributes::new();
    attr.set_quality(0, 0).unwrap();
    let pixels: Vec<_> = (0..40 * 40).map(|i| RGBA::new(i as u8, (i >> 8) as u8, 7, 255)).collect();
    assert_eq!(Err(QualityUnattainable), quantize_pixels(&attr, &pixels, 40, 40).map(|_| ()));

    attr.set_quality(0, 100).unwrap();
    attr.set_max_colors(4).unwrap();
    let res = quantize_pixels(&attr, &pixels, 40, 40).unwrap();
    assert!(res.palette_len() <= 4);
    assert!(res.quantization_score() > 0.);
}

#[test]
fn search_is_bounded() {
    use std::sync::atomic::{AtomicU32, Ordering};
    let tries = Arc::new(AtomicU32::new(0));
    let mut attr = Attributes::new();
    let t = tries.clone();
    attr.set_log_callback(move |_, msg| {
        if msg.starts_with("  trying") {
            t.fetch_add(1, Ordering::Relaxed);
        }
    });
    attr.set_quality(1, 100).unwrap();
    let pixels: Vec<_> = (0..128 * 128).map(|i| RGBA::new((i * 13) as u8, (i * 7 / 128) as u8, (i / 3) as u8, 255)).collect();
    quantize_pixels(&attr, &pixels, 128, 128).unwrap();
    let tries = tries.load(Ordering::Relaxed);
    assert!((1..=MAX_SEARCH_ATTEMPTS).contains(&tries), "{tries}");
}

#[test]
fn abort_from_progress() {
    let mut attr = Attributes::new();
    attr.set_progress_callback(|p| if p > 5. { ControlFlow::Break } else { ControlFlow::Continue });
    let pixels = vec![RGBA::new(1, 2, 3, 4); 9];
    assert_eq!(Err(Aborted), quantize_pixels(&attr, &pixels, 3, 3).map(|_| ()));
}

#[test]
fn remap_reports_score() {
    let attr = Attributes::new();
    let pixels: Vec<_> = (0..16 * 16).map(|i| RGBA::new(i as u8, 0, 0, 255)).collect();
    let img = attr.new_image_borrowed(&pixels, 16, 16).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    assert_eq!(None, res.remapping_score());
    assert_eq!(Err(ValueOutOfRange), res.set_dithering_level(1.5));
    res.set_dithering_level(0.).unwrap();
    let (pal, idx) = res.remapped(&img).unwrap();
    assert_eq!(Some(0.), res.remapping_score());
    for (px, &i) in pixels.iter().zip(&idx) {
        assert_eq!(*px, pal[usize::from(i)]);
    }
}

#[test]
fn transparent_goes_last() {
    let mut attr = Attributes::new();
    attr.set_last_index_transparent(true);
    let pixels = vec![RGBA::new(0, 0, 0, 0), RGBA::new(0, 0, 0, 0), RGBA::new(9, 9, 9, 255)];
    let res = quantize_pixels(&attr, &pixels, 3, 1).unwrap();
    assert_eq!(RGBA::new(0, 0, 0, 0), res.palette()[1]);
}
