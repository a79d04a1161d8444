use crate::error::Error;
use crate::hist::HistogramInternal;
use crate::nearest::{Nearest, PaletteLookup};
use crate::pal::{PalF, MAX_DIFF};

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// Histogram entries measured in one batch
const ITEMS_PER_CHUNK: usize = 256;

/// Average squared distance between every counted pixel and its closest palette entry
#[inline(never)]
pub(crate) fn palette_mse(hist: &HistogramInternal, palette: &PalF) -> Result<f64, Error> {
    if hist.items.is_empty() || hist.total_weight <= 0. {
        return Err(Error::EmptyImage);
    }
    let n = Nearest::new(palette)?;
    let chunk_sums = hist.items.par_chunks(ITEMS_PER_CHUNK).map(|items| {
        items.iter().map(|item| {
            let (_, diff) = n.search(&item.color, item.likely_palette_index);
            f64::from(diff) * item.weight
        }).sum::<f64>()
    }).collect::<Vec<f64>>();
    // summed in a fixed order, so the score doesn't depend on thread scheduling
    let total: f64 = chunk_sums.into_iter().sum();
    Ok(total / hist.total_weight)
}

/// 0 for a perfect match, 100 when every pixel is the opposite corner of the color space
#[inline]
#[must_use]
pub fn mse_to_score(mse: f64) -> f64 {
    (100. * (mse.max(0.) / MAX_DIFF).sqrt()).min(100.)
}

/// Inverse of [`mse_to_score`]
#[inline]
#[must_use]
pub(crate) fn score_to_mse(score: f64) -> f64 {
    let s = score.clamp(0., 100.) / 100.;
    s * s * MAX_DIFF
}

/// Quality score of the palette for the histogram
pub(crate) fn palette_score(hist: &HistogramInternal, palette: &PalF) -> Result<(f64, f64), Error> {
    let mse = palette_mse(hist, palette)?;
    Ok((mse, mse_to_score(mse)))
}

#[cfg(test)]
fn hist_of(entries: &[(crate::RGBA, u64)]) -> HistogramInternal {
    use crate::hist::{Histogram, HistogramEntry};
    let attr = crate::Attributes::new();
    let mut hist = Histogram::new(&attr);
    let entries: Vec<_> = entries.iter().map(|&(color, count)| HistogramEntry { color, count }).collect();
    hist.add_colors(&entries).unwrap();
    hist.finalize_builder().unwrap()
}

#[test]
fn exact_palette_scores_zero() {
    use crate::pal::{f_pixel, PalPop};
    use crate::RGBA;
    let colors = [RGBA::new(10, 20, 30, 255), RGBA::new(200, 0, 100, 128), RGBA::new(0, 0, 0, 0)];
    let hist = hist_of(&colors.iter().map(|&c| (c, 3)).collect::<Vec<_>>());
    let mut pal = PalF::new();
    for (i, &c) in colors.iter().enumerate() {
        pal.push(f_pixel::from_rgba(c), PalPop::new(3., i as u64));
    }
    assert_eq!((0., 0.), palette_score(&hist, &pal).unwrap());
}

#[test]
fn score_is_weighted_by_count() {
    use crate::pal::{f_pixel, PalPop};
    use crate::RGBA;
    let black = RGBA::new(0, 0, 0, 255);
    let grey = RGBA::new(0, 100, 0, 255);
    let mut pal = PalF::new();
    pal.push(f_pixel::from_rgba(black), PalPop::new(1., 0));

    let few = palette_score(&hist_of(&[(black, 9), (grey, 1)]), &pal).unwrap().1;
    let many = palette_score(&hist_of(&[(black, 1), (grey, 9)]), &pal).unwrap().1;
    assert!(few > 0.);
    assert!(many > few);
    assert!(many < 100.);
}

#[test]
fn worst_case_is_100() {
    use crate::pal::{f_pixel, PalPop};
    use crate::RGBA;
    let mut pal = PalF::new();
    pal.push(f_pixel::from_rgba(RGBA::new(0, 0, 0, 0)), PalPop::new(1., 0));
    let (_, score) = palette_score(&hist_of(&[(RGBA::new(255, 255, 255, 255), 1)]), &pal).unwrap();
    assert!((score - 100.).abs() < 0.001);
}

#[test]
fn score_mse_inverse() {
    for score in [0., 1., 12.5, 50., 100.] {
        assert!((mse_to_score(score_to_mse(score)) - score).abs() < 1e-9);
    }
}
