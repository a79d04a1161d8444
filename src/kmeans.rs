use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::nearest::{Nearest, PaletteLookup};
use crate::pal::{f_pixel, PalF, PalIndex, PalPop};
use rgb::alt::ARGB;
use rgb::ComponentMap;

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// Histogram entries per batch. Batches are merged in order, so results don't depend on the thread count.
const ITEMS_PER_CHUNK: usize = 256;

pub(crate) struct Kmeans {
    averages: Vec<ColorAvg>,
    weighed_diff_sum: f64,
}

#[derive(Copy, Clone)]
struct ColorAvg {
    sum: ARGB<f64>,
    total: f64,
    first_seen: u64,
}

impl Default for ColorAvg {
    fn default() -> Self {
        Self { sum: ARGB { a: 0., r: 0., g: 0., b: 0. }, total: 0., first_seen: u64::MAX }
    }
}

/// K-Means iteration: new palette color is computed from weighted average of colors that map best to that palette entry.
impl Kmeans {
    #[inline]
    pub fn new(pal_len: usize) -> Result<Self, Error> {
        let mut averages = Vec::new();
        averages.try_reserve_exact(pal_len)?;
        averages.resize(pal_len, ColorAvg::default());
        Ok(Self {
            averages,
            weighed_diff_sum: 0.,
        })
    }

    #[inline]
    fn update_color(&mut self, item: &HistItem, matched: PalIndex) {
        let weight = item.weight;
        let c = &mut self.averages[usize::from(matched)];
        c.sum += item.color.0.map(|ch| f64::from(ch) * weight);
        c.total += weight;
        c.first_seen = c.first_seen.min(item.first_seen);
    }

    /// Moves palette entries to the centroids. Returns the sum of weighted errors measured before the move.
    fn finalize(self, palette: &mut PalF) -> f64 {
        for (avg, (color, pop)) in self.averages.iter().zip(palette.iter_mut()) {
            let total = avg.total;
            *pop = PalPop::new(total, avg.first_seen);
            if total > 0. {
                *color = f_pixel(avg.sum.map(move |c| (c / total) as f32));
            }
        }
        self.weighed_diff_sum
    }

    /// One pass over the histogram. Returns the mean squared error of the palette as it was before the pass.
    #[inline(never)]
    pub(crate) fn iteration(hist: &mut HistogramInternal, palette: &mut PalF) -> Result<f64, Error> {
        if hist.items.is_empty() {
            return Ok(0.);
        }

        let len = palette.len();
        let batches = {
            let n = Nearest::new(palette)?;
            hist.items.par_chunks_mut(ITEMS_PER_CHUNK).map(|batch| -> Result<Kmeans, Error> {
                let mut kmeans = Kmeans::new(len)?;
                kmeans.iterate_batch(batch, &n);
                Ok(kmeans)
            }).collect::<Result<Vec<_>, Error>>()?
        };

        let total = hist.total_weight;
        let diff = batches.into_iter()
            .reduce(Kmeans::merge)
            .map(|kmeans| kmeans.finalize(palette) / total)
            .unwrap_or(0.);

        // an entry nothing mapped to is wasted, so it gets a histogram color instead
        palette.iter_mut().filter(|(_, p)| p.popularity() == 0.).zip(hist.items.iter()).for_each(|((c, _), item)| {
            *c = item.color;
        });
        Ok(diff)
    }

    fn iterate_batch(&mut self, batch: &mut [HistItem], n: &Nearest<'_>) {
        self.weighed_diff_sum += batch.iter_mut().map(|item| {
            let (matched, diff) = n.search(&item.color, item.likely_palette_index);
            item.likely_palette_index = matched;
            self.update_color(item, matched);
            f64::from(diff) * item.weight
        }).sum::<f64>();
    }

    #[inline]
    fn merge(mut self, new: Kmeans) -> Kmeans {
        self.weighed_diff_sum += new.weighed_diff_sum;
        self.averages.iter_mut().zip(new.averages).for_each(|(p, n)| {
            p.sum += n.sum;
            p.total += n.total;
            p.first_seen = p.first_seen.min(n.first_seen);
        });
        self
    }
}

/// Repeats K-means passes until they stop improving by more than `limit`, or run out of `iterations`
pub(crate) fn refine_palette(hist: &mut HistogramInternal, palette: &mut PalF, iterations: u16, limit: f64) -> Result<(), Error> {
    let mut previous = f64::INFINITY;
    for _ in 0..iterations {
        let mse = Kmeans::iteration(hist, palette)?;
        if (previous - mse).abs() < limit {
            break;
        }
        previous = mse;
    }
    Ok(())
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
fn moves_to_centroid() {
    use crate::RGBA;
    let mut hist = hist_of(&[
        (RGBA::new(0, 0, 0, 255), 1),
        (RGBA::new(0, 100, 0, 255), 1),
        (RGBA::new(250, 250, 250, 255), 5),
    ]);
    let mut pal = PalF::new();
    pal.push(f_pixel::from_rgba(RGBA::new(0, 0, 0, 255)), PalPop::new(1., 0));
    pal.push(f_pixel::from_rgba(RGBA::new(255, 255, 255, 255)), PalPop::new(1., 0));

    let before = Kmeans::iteration(&mut hist, &mut pal).unwrap();
    assert!(before > 0.);
    assert_eq!(RGBA::new(0, 50, 0, 255), pal.as_slice()[0].to_rgba());
    assert_eq!(RGBA::new(250, 250, 250, 255), pal.as_slice()[1].to_rgba());
    assert_eq!(2., pal.pop_as_slice()[0].popularity());
    assert_eq!(5., pal.pop_as_slice()[1].popularity());
    assert_eq!(2, pal.pop_as_slice()[1].first_seen());

    let after = Kmeans::iteration(&mut hist, &mut pal).unwrap();
    assert!(after < before);
}

#[test]
fn unused_entry_is_replaced() {
    use crate::RGBA;
    let mut hist = hist_of(&[(RGBA::new(10, 10, 10, 255), 4), (RGBA::new(20, 20, 20, 255), 4)]);
    let mut pal = PalF::new();
    pal.push(f_pixel::from_rgba(RGBA::new(15, 15, 15, 255)), PalPop::new(1., 0));
    pal.push(f_pixel::from_rgba(RGBA::new(255, 0, 255, 0)), PalPop::new(1., 0));
    Kmeans::iteration(&mut hist, &mut pal).unwrap();
    assert_eq!(0., pal.pop_as_slice()[1].popularity());
    assert_eq!(RGBA::new(10, 10, 10, 255), pal.as_slice()[1].to_rgba());
}

#[test]
fn refine_is_deterministic() {
    use crate::RGBA;
    let entries: Vec<_> = (0..3000u32).map(|i| (RGBA::new((i * 7) as u8, (i / 12) as u8, (i * 3) as u8, 255), u64::from(i % 7 + 1))).collect();
    let run = || {
        let mut hist = hist_of(&entries);
        let mut pal = crate::mediancut::mediancut(&mut hist, 20).unwrap();
        refine_palette(&mut hist, &mut pal, 5, 0.).unwrap();
        pal.to_rgba_vec()
    };
    assert_eq!(run(), run());
}
