use crate::attr::Attributes;
use crate::error::*;
use crate::image::Image;
use crate::pal::{f_pixel, PalIndex, RGBA};
use crate::quant::QuantizationResult;
use std::collections::HashMap;

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// Number of pixels in a given color for [`Histogram::add_colors()`]
///
/// Used for building a histogram manually. Otherwise see [`Histogram::add_image()`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistogramEntry {
    /// The color
    pub color: RGBA,
    /// Number of pixels of this color
    pub count: u64,
}

/// Generate one shared palette for multiple images
///
/// If you're converting one image at a time, see [`Attributes::quantize`] instead
pub struct Histogram {
    /// The key is the RGBA packed into u32
    hashmap: HashMap<u32, ColorCount, U32Hasher>,
    /// Positions of pixels of later images continue after the earlier ones
    pixels_seen: u64,
}

#[derive(Copy, Clone, Debug)]
struct ColorCount {
    count: u64,
    first_seen: u64,
    color: RGBA,
}

#[derive(Clone, Debug)]
pub(crate) struct HistItem {
    pub color: f_pixel,
    pub rgba: RGBA,
    /// Number of pixels
    pub weight: f64,
    pub first_seen: u64,
    /// Search hint, updated by every K-means pass
    pub likely_palette_index: PalIndex,
}

pub(crate) struct HistogramInternal {
    /// Sorted by packed RGBA
    pub items: Box<[HistItem]>,
    pub total_weight: f64,
}

/// Rows of pixels counted in one batch
const ROWS_PER_CHUNK: usize = 32;

impl Histogram {
    /// Creates histogram object that will be used to collect color statistics from multiple images.
    #[inline]
    #[must_use]
    pub fn new(_attr: &Attributes) -> Self {
        Self {
            hashmap: HashMap::with_hasher(U32Hasher(0)),
            pixels_seen: 0,
        }
    }

    /// "Learns" colors from the image, which will be later used to generate the palette.
    ///
    /// On large images at high speeds only every n-th pixel is looked at,
    /// and it's counted as the n pixels it stands for.
    #[inline(never)]
    pub fn add_image(&mut self, attr: &Attributes, image: &Image<'_>) -> Result<(), Error> {
        let width = image.width();
        let pixels = image.pixels();
        let stride = attr.sample_stride(pixels.len());
        if stride > 1 {
            attr.verbose_print(format!("  sampling every {stride} pixels"));
        }

        let base = self.pixels_seen;
        let total = pixels.len() as u64;
        let chunk_len = width * ROWS_PER_CHUNK;

        let chunks = pixels.par_chunks(chunk_len).enumerate().map(|(chunk_index, chunk)| {
            let chunk_start = (chunk_index * chunk_len) as u64;
            count_chunk(chunk, chunk_start, total, stride as u64)
        }).collect::<Result<Vec<_>, Error>>()?;

        self.reserve(chunks.first().map_or(0, |c| c.len()))?;
        for chunk in chunks {
            for (key, mut c) in chunk {
                c.first_seen += base;
                self.add_counted(key, c);
            }
        }
        self.pixels_seen = base.saturating_add(total);
        Ok(())
    }

    /// Alternative to `add_image()`. Intead of counting colors in an image, it directly takes an array of colors and their counts.
    ///
    /// Entries are treated as if they were pixels in the order given.
    #[inline(never)]
    pub fn add_colors(&mut self, entries: &[HistogramEntry]) -> Result<(), Error> {
        if entries.is_empty() || entries.len() > 1 << 24 {
            return Err(ValueOutOfRange);
        }

        self.reserve(entries.len())?;

        for e in entries {
            if e.count == 0 {
                continue;
            }
            self.add_counted(color_key(e.color), ColorCount {
                count: e.count,
                first_seen: self.pixels_seen,
                color: e.color,
            });
            self.pixels_seen = self.pixels_seen.saturating_add(e.count);
        }

        Ok(())
    }

    /// Number of distinct colors collected so far
    #[inline]
    #[must_use]
    pub fn colors_len(&self) -> usize {
        self.hashmap.len()
    }

    /// Color counts collected so far, sorted by color
    #[must_use]
    pub fn entries(&self) -> Vec<HistogramEntry> {
        let mut entries: Vec<_> = self.hashmap.iter().map(|(&key, c)| (key, HistogramEntry { color: c.color, count: c.count })).collect();
        entries.sort_unstable_by_key(|&(key, _)| key);
        entries.into_iter().map(|(_, e)| e).collect()
    }

    /// Generate palette for all images/colors added to the histogram.
    #[inline]
    pub fn quantize(&mut self, attr: &Attributes) -> Result<QuantizationResult, Error> {
        self.quantize_internal(attr)
    }

    #[inline(never)]
    pub(crate) fn quantize_internal(&mut self, attr: &Attributes) -> Result<QuantizationResult, Error> {
        if self.hashmap.is_empty() {
            return Err(EmptyImage);
        }

        if attr.progress(0.) {
            return Err(Aborted);
        }

        let hist = self.finalize_builder()?;

        attr.verbose_print(format!("  made histogram...{} colors found", hist.items.len()));

        QuantizationResult::new(attr, hist)
    }

    #[inline(always)]
    fn add_counted(&mut self, key: u32, c: ColorCount) {
        self.hashmap.entry(key)
            .and_modify(move |e| {
                e.count = e.count.saturating_add(c.count);
                e.first_seen = e.first_seen.min(c.first_seen);
            })
            .or_insert(c);
    }

    fn reserve(&mut self, entries: usize) -> Result<(), Error> {
        let new_entries = entries.saturating_sub(self.hashmap.len() / 3); // assume some will be dupes, if called multiple times
        self.hashmap.try_reserve(new_entries)?;
        Ok(())
    }

    pub(crate) fn finalize_builder(&self) -> Result<HistogramInternal, Error> {
        let mut sorted = Vec::new();
        sorted.try_reserve_exact(self.hashmap.len())?;
        sorted.extend(self.hashmap.iter().map(|(&key, &c)| (key, c)));
        // the map's order depends on insertion history; everything downstream needs a canonical order
        sorted.sort_unstable_by_key(|&(key, _)| key);

        let mut items = Vec::new();
        items.try_reserve_exact(sorted.len())?;
        let mut total_weight = 0.;
        items.extend(sorted.into_iter().map(|(_, c)| {
            let weight = c.count as f64;
            total_weight += weight;
            HistItem {
                color: f_pixel::from_rgba(c.color),
                rgba: c.color,
                weight,
                first_seen: c.first_seen,
                likely_palette_index: 0,
            }
        }));

        Ok(HistogramInternal {
            items: items.into_boxed_slice(),
            total_weight,
        })
    }
}

type ChunkCounts = HashMap<u32, ColorCount, U32Hasher>;

/// `chunk_start` is the position of the chunk's first pixel in the image, `total` is the image's pixel count
fn count_chunk(chunk: &[RGBA], chunk_start: u64, total: u64, stride: u64) -> Result<ChunkCounts, Error> {
    let mut counts = HashMap::with_hasher(U32Hasher(0));
    counts.try_reserve((chunk.len() / (stride as usize * 4)).min(1 << 16))?;

    // first sampled pixel at or after chunk_start
    let skip = (stride - chunk_start % stride) % stride;
    for (offset, &px) in chunk.iter().enumerate().skip(skip as usize).step_by(stride as usize) {
        let position = chunk_start + offset as u64;
        let count = stride.min(total - position);
        counts.entry(color_key(px))
            .and_modify(|c: &mut ColorCount| c.count += count)
            .or_insert(ColorCount { count, first_seen: position, color: px });
    }
    Ok(counts)
}

#[inline(always)]
fn color_key(px: RGBA) -> u32 {
    u32::from_be_bytes([px.r, px.g, px.b, px.a])
}

// Simple deterministic hasher for the color hashmap
impl std::hash::BuildHasher for U32Hasher {
    type Hasher = Self;
    #[inline(always)]
    fn build_hasher(&self) -> Self {
        Self(0)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct U32Hasher(pub u32);

impl std::hash::Hasher for U32Hasher {
    // magic constant from fxhash. For a single 32-bit key that's all it needs!
    #[inline(always)]
    fn finish(&self) -> u64 { u64::from(self.0).wrapping_mul(0x517cc1b727220a95) }
    #[inline(always)]
    fn write_u32(&mut self, i: u32) { self.0 = i; }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.rotate_left(8) ^ u32::from(b);
        }
    }
}

#[cfg(test)]
fn test_image(attr: &Attributes, pixels: Vec<RGBA>, width: usize, height: usize) -> Image<'static> {
    attr.new_image(pixels, width, height).unwrap()
}

#[test]
fn counts_sum_to_area() {
    let attr = Attributes::new();
    let pixels: Vec<_> = (0..37 * 41).map(|n| RGBA::new((n % 7) as u8 * 30, (n % 5) as u8, 0, 255)).collect();
    let img = test_image(&attr, pixels, 37, 41);
    let mut hist = Histogram::new(&attr);
    hist.add_image(&attr, &img).unwrap();
    assert_eq!(35, hist.colors_len());
    let sum: u64 = hist.entries().iter().map(|e| e.count).sum();
    assert_eq!(37 * 41, sum);
}

#[test]
fn sampled_counts_sum_to_area() {
    let mut attr = Attributes::new();
    attr.set_speed(11).unwrap();
    let (w, h) = (601, 523);
    let pixels: Vec<_> = (0..w * h).map(|n| RGBA::new(n as u8, (n >> 8) as u8, 0, 255)).collect();
    let img = test_image(&attr, pixels, w, h);
    assert!(attr.sample_stride(w * h) > 1);
    let mut hist = Histogram::new(&attr);
    hist.add_image(&attr, &img).unwrap();
    let sum: u64 = hist.entries().iter().map(|e| e.count).sum();
    assert_eq!((w * h) as u64, sum);
}

#[test]
fn transparent_pixels_keep_color() {
    let attr = Attributes::new();
    let pixels = vec![RGBA::new(255, 0, 0, 0), RGBA::new(0, 0, 255, 0), RGBA::new(255, 0, 0, 0)];
    let img = test_image(&attr, pixels, 3, 1);
    let mut hist = Histogram::new(&attr);
    hist.add_image(&attr, &img).unwrap();
    let entries = hist.entries();
    assert_eq!(vec![
        HistogramEntry { color: RGBA::new(0, 0, 255, 0), count: 1 },
        HistogramEntry { color: RGBA::new(255, 0, 0, 0), count: 2 },
    ], entries);
}

#[test]
fn first_seen_spans_images() {
    let attr = Attributes::new();
    let mut hist = Histogram::new(&attr);
    hist.add_image(&attr, &test_image(&attr, vec![RGBA::new(1, 1, 1, 255); 4], 2, 2)).unwrap();
    hist.add_colors(&[HistogramEntry { color: RGBA::new(2, 2, 2, 255), count: 3 }, HistogramEntry { color: RGBA::new(1, 1, 1, 255), count: 0 }]).unwrap();
    let internal = hist.finalize_builder().unwrap();
    assert_eq!(2, internal.items.len());
    assert_eq!(7., internal.total_weight);
    assert_eq!(0, internal.items[0].first_seen);
    assert_eq!(4, internal.items[1].first_seen);
}

#[test]
fn empty_histogram() {
    let attr = Attributes::new();
    let mut hist = Histogram::new(&attr);
    assert_eq!(Err(EmptyImage), hist.quantize(&attr).map(|_| ()));
    assert_eq!(Err(ValueOutOfRange), hist.add_colors(&[]));
}
