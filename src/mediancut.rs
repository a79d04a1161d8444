use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::pal::{f_pixel, PalF, PalPop, ARGBF, MAX_COLORS, RGBA};
use std::cmp::Ordering;

struct MedianCutter<'hist> {
    boxes: Vec<MBox<'hist>>,
    target_colors: usize,
}

struct MBox<'hist> {
    /// Histogram entries that fell into this bucket
    colors: &'hist mut [HistItem],
    /// Weighted centroid, which becomes the palette color
    avg_color: f_pixel,
    /// Squared difference from the average color, per channel (RGBA order), summed over all pixels
    variance: [f64; 4],
    weight_sum: f64,
    first_seen: u64,
}

#[inline(always)]
fn channels(c: &f_pixel) -> [f32; 4] {
    [c.r, c.g, c.b, c.a]
}

impl<'hist> MBox<'hist> {
    fn new(colors: &'hist mut [HistItem]) -> Self {
        debug_assert!(!colors.is_empty());
        let mut sum = [0f64; 4];
        let mut weight_sum = 0.;
        let mut first_seen = u64::MAX;
        for item in colors.iter() {
            debug_assert!(item.weight > 0.);
            for (s, ch) in sum.iter_mut().zip(channels(&item.color)) {
                *s += f64::from(ch) * item.weight;
            }
            weight_sum += item.weight;
            first_seen = first_seen.min(item.first_seen);
        }

        let avg_color = if let [only] = &*colors {
            only.color
        } else {
            let [r, g, b, a] = sum.map(|s| (s / weight_sum) as f32);
            f_pixel(ARGBF { a, r, g, b })
        };

        let avg = channels(&avg_color);
        let mut variance = [0f64; 4];
        for item in colors.iter() {
            for ((v, ch), avg) in variance.iter_mut().zip(channels(&item.color)).zip(avg) {
                let d = f64::from(ch - avg);
                *v += d * d * item.weight;
            }
        }

        Self { colors, avg_color, variance, weight_sum, first_seen }
    }

    /// Channel with the highest variance. Lower channel index wins ties.
    fn dominant_channel(&self) -> usize {
        let mut best = 0;
        for (chan, v) in self.variance.iter().enumerate().skip(1) {
            if *v > self.variance[best] {
                best = chan;
            }
        }
        best
    }

    #[inline]
    fn max_variance(&self) -> f64 {
        self.variance[self.dominant_channel()]
    }

    /// Higher variance goes first, then more pixels, then the color that appears earlier in the image
    fn split_priority(&self, other: &Self) -> Ordering {
        self.max_variance().total_cmp(&other.max_variance())
            .then(self.weight_sum.total_cmp(&other.weight_sum))
            .then(other.first_seen.cmp(&self.first_seen))
    }

    /// Splits along the dominant channel at the weighted median
    fn split(self) -> [Self; 2] {
        debug_assert!(self.colors.len() > 1);
        let chan = self.dominant_channel();
        let colors = self.colors;
        colors.sort_unstable_by_key(|item| sort_key(item.rgba, chan));

        let half_weight = self.weight_sum / 2.;
        let mut break_at = colors.len() - 1;
        let mut acc = 0.;
        for (i, item) in colors.iter().enumerate() {
            acc += item.weight;
            if acc >= half_weight {
                break_at = i + 1;
                break;
            }
        }
        // both halves must be non-empty
        let break_at = break_at.clamp(1, colors.len() - 1);

        let (left, right) = colors.split_at_mut(break_at);
        [MBox::new(left), MBox::new(right)]
    }
}

/// Orders by one channel first, and by the remaining ones after it. Unique for every color.
#[inline]
fn sort_key(px: RGBA, chan: usize) -> u32 {
    let ch = [px.r, px.g, px.b, px.a];
    let mut key = u32::from(ch[chan]);
    for (i, &c) in ch.iter().enumerate() {
        if i != chan {
            key = (key << 8) | u32::from(c);
        }
    }
    key
}

impl<'hist> MedianCutter<'hist> {
    fn new(hist: &'hist mut HistogramInternal, target_colors: usize) -> Result<Self, Error> {
        let mut boxes = Vec::new();
        boxes.try_reserve(target_colors)?;
        boxes.push(MBox::new(&mut hist.items));
        Ok(Self { boxes, target_colors })
    }

    fn cut(mut self) -> PalF {
        while self.boxes.len() < self.target_colors {
            let Some(bi) = self.take_best_splittable_box() else {
                break; // every box has exactly one color
            };
            let halves = bi.split();
            self.boxes.extend(halves);
        }
        self.into_palette()
    }

    fn take_best_splittable_box(&mut self) -> Option<MBox<'hist>> {
        self.boxes.iter().enumerate()
            .filter(|(_, b)| b.colors.len() > 1)
            .max_by(|(_, a), (_, b)| a.split_priority(b))
            .map(|(i, _)| i)
            .map(|i| self.boxes.swap_remove(i))
    }

    fn into_palette(self) -> PalF {
        let mut palette = PalF::new();
        for (i, b) in self.boxes.into_iter().enumerate() {
            b.colors.iter_mut().for_each(|item| item.likely_palette_index = i as _);
            palette.push(b.avg_color, PalPop::new(b.weight_sum, b.first_seen));
        }
        palette
    }
}

/// Splits the histogram into at most `target_colors` boxes and returns their centroids.
///
/// Fewer colors are returned only if the histogram doesn't have enough distinct colors.
#[inline(never)]
pub(crate) fn mediancut(hist: &mut HistogramInternal, target_colors: usize) -> Result<PalF, Error> {
    if !(1..=MAX_COLORS).contains(&target_colors) {
        return Err(Error::PaletteSize);
    }
    if hist.items.is_empty() {
        return Err(Error::EmptyImage);
    }
    Ok(MedianCutter::new(hist, target_colors)?.cut())
}

#[cfg(test)]
fn test_hist(entries: &[(RGBA, u64)]) -> HistogramInternal {
    use crate::hist::{Histogram, HistogramEntry};
    let attr = crate::Attributes::new();
    let mut hist = Histogram::new(&attr);
    let entries: Vec<_> = entries.iter().map(|&(color, count)| HistogramEntry { color, count }).collect();
    hist.add_colors(&entries).unwrap();
    hist.finalize_builder().unwrap()
}

#[test]
fn rejects_bad_sizes() {
    let mut hist = test_hist(&[(RGBA::new(1, 2, 3, 255), 1)]);
    assert_eq!(Err(Error::PaletteSize), mediancut(&mut hist, 0).map(|_| ()));
    assert_eq!(Err(Error::PaletteSize), mediancut(&mut hist, 257).map(|_| ()));
    assert_eq!(1, mediancut(&mut hist, 256).unwrap().len());
}

#[test]
fn centroid_is_weighted() {
    let mut hist = test_hist(&[(RGBA::new(0, 0, 0, 255), 3), (RGBA::new(200, 0, 0, 255), 1)]);
    let pal = mediancut(&mut hist, 1).unwrap();
    assert_eq!(1, pal.len());
    assert_eq!(RGBA::new(50, 0, 0, 255), pal.as_slice()[0].to_rgba());
    assert_eq!(4., pal.pop_as_slice()[0].popularity());
}

#[test]
fn exact_when_enough_boxes() {
    let colors = [
        (RGBA::new(255, 0, 0, 255), 1),
        (RGBA::new(0, 255, 0, 255), 1),
        (RGBA::new(0, 0, 255, 255), 1),
        (RGBA::new(255, 255, 255, 0), 1),
    ];
    let mut hist = test_hist(&colors);
    let pal = mediancut(&mut hist, 10).unwrap();
    assert_eq!(4, pal.len());
    let mut got: Vec<_> = pal.to_rgba_vec().into_iter().collect();
    let mut expected: Vec<_> = colors.iter().map(|c| c.0).collect();
    got.sort_by_key(|c| (c.r, c.g, c.b, c.a));
    expected.sort_by_key(|c| (c.r, c.g, c.b, c.a));
    assert_eq!(expected, got);
    for item in hist.items.iter() {
        assert_eq!(item.rgba, pal.as_slice()[item.likely_palette_index as usize].to_rgba());
    }
}

#[test]
fn splits_largest_variance_first() {
    // two tight clusters far apart on the green axis
    let mut hist = test_hist(&[
        (RGBA::new(0, 0, 0, 255), 10),
        (RGBA::new(2, 0, 0, 255), 10),
        (RGBA::new(0, 250, 0, 255), 10),
        (RGBA::new(0, 254, 0, 255), 10),
    ]);
    let pal = mediancut(&mut hist, 2).unwrap();
    let mut greens: Vec<_> = pal.to_rgba_vec().iter().map(|c| c.g).collect();
    greens.sort_unstable();
    assert_eq!(vec![0, 252], greens);
}

#[test]
fn gradient_fills_target() {
    let entries: Vec<_> = (0..1000u32).map(|i| (RGBA::new(i as u8, (i / 4) as u8, (i * 7) as u8, 255), 1 + u64::from(i % 3))).collect();
    let mut hist = test_hist(&entries);
    let pal = mediancut(&mut hist, 16).unwrap();
    assert_eq!(16, pal.len());
    let total: f64 = pal.pop_as_slice().iter().map(|p| p.popularity()).sum();
    assert_eq!(hist.total_weight, total);

    let mut hist2 = test_hist(&entries);
    let pal2 = mediancut(&mut hist2, 16).unwrap();
    assert_eq!(pal.to_rgba_vec(), pal2.to_rgba_vec());
}

#[test]
fn equal_variance_ties() {
    let item = |rgba: RGBA, weight: f64, first_seen: u64| HistItem {
        color: f_pixel::from_rgba(rgba),
        rgba,
        weight,
        first_seen,
        likely_palette_index: 0,
    };
    let (black, grey) = (RGBA::new(0, 0, 0, 255), RGBA::new(100, 0, 0, 255));
    let mut early = [item(black, 1., 0), item(grey, 1., 1)];
    let mut late = [item(black, 1., 5), item(grey, 1., 6)];
    let early = MBox::new(&mut early);
    let mut late = MBox::new(&mut late);
    assert_eq!(early.variance, late.variance);

    // same variance and weight: the color seen first wins
    assert_eq!(Ordering::Greater, early.split_priority(&late));
    assert_eq!(Ordering::Less, late.split_priority(&early));

    // same variance: more pixels wins over earlier appearance
    late.weight_sum = 3.;
    assert_eq!(early.max_variance(), late.max_variance());
    assert_eq!(Ordering::Greater, late.split_priority(&early));
    assert_eq!(Ordering::Less, early.split_priority(&late));
}
