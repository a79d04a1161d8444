use arrayvec::ArrayVec;
use std::ops::{Deref, DerefMut};

/// 8-bit RGBA in sRGB. This is the only color format *publicly* used by the library.
pub type RGBA = rgb::RGBA<u8>;

#[allow(clippy::upper_case_acronyms)]
pub type ARGBF = rgb::alt::ARGB<f32>;

/// Channel weights approximating how sensitive the eye is to each channel.
pub const WEIGHT_A: f32 = 0.625;
pub const WEIGHT_R: f32 = 0.5;
pub const WEIGHT_G: f32 = 1.;
pub const WEIGHT_B: f32 = 0.45;

/// Squared distance between opposite corners of the weighted color cube
pub const MAX_DIFF: f64 = (WEIGHT_A * WEIGHT_A + WEIGHT_R * WEIGHT_R + WEIGHT_G * WEIGHT_G + WEIGHT_B * WEIGHT_B) as f64;

/// 4xf32 color, each channel scaled to `0..=WEIGHT_*`.
///
/// Alpha is a separate dimension and colors are not premultiplied,
/// so fully transparent pixels keep their RGB.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
#[allow(non_camel_case_types)]
pub struct f_pixel(pub ARGBF);

impl f_pixel {
    /// Squared weighted Euclidean distance
    #[inline(always)]
    pub fn diff(&self, other: &f_pixel) -> f32 {
        let d = self.0 - other.0;
        d.a * d.a + d.r * d.r + d.g * d.g + d.b * d.b
    }

    #[inline]
    pub fn from_rgba(px: RGBA) -> Self {
        Self(ARGBF {
            a: f32::from(px.a) * (WEIGHT_A / 255.),
            r: f32::from(px.r) * (WEIGHT_R / 255.),
            g: f32::from(px.g) * (WEIGHT_G / 255.),
            b: f32::from(px.b) * (WEIGHT_B / 255.),
        })
    }

    /// Rounds to the nearest 8-bit color, so `from_rgba` followed by `to_rgba` is lossless
    #[allow(clippy::wrong_self_convention)]
    #[inline]
    pub fn to_rgba(&self) -> RGBA {
        RGBA {
            r: unweight(self.r, WEIGHT_R),
            g: unweight(self.g, WEIGHT_G),
            b: unweight(self.b, WEIGHT_B),
            a: unweight(self.a, WEIGHT_A),
        }
    }
}

#[inline(always)]
fn unweight(value: f32, weight: f32) -> u8 {
    (value * (255. / weight)).round().clamp(0., 255.) as u8
}

impl Deref for f_pixel {
    type Target = ARGBF;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for f_pixel {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<ARGBF> for f_pixel {
    #[inline(always)]
    fn from(x: ARGBF) -> Self {
        Self(x)
    }
}

/// How many pixels a palette entry stands for, and where the earliest of them was in the image.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct PalPop {
    popularity: f64,
    first_seen: u64,
}

impl PalPop {
    #[inline]
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn new(popularity: f64, first_seen: u64) -> Self {
        debug_assert!(popularity >= 0.);
        Self { popularity, first_seen }
    }

    #[inline(always)]
    pub fn popularity(self) -> f64 {
        self.popularity
    }

    #[inline(always)]
    pub fn first_seen(self) -> u64 {
        self.first_seen
    }

    fn absorb(&mut self, other: PalPop) {
        self.popularity += other.popularity;
        self.first_seen = self.first_seen.min(other.first_seen);
    }
}

pub type PalIndex = u8;
pub type PalLen = u16;

pub(crate) const MAX_COLORS: usize = 256;

/// A palette of 4xf32 colors with their popularity
#[derive(Clone, Debug)]
pub(crate) struct PalF {
    colors: ArrayVec<f_pixel, MAX_COLORS>,
    pops: ArrayVec<PalPop, MAX_COLORS>,
}

impl PalF {
    #[inline]
    pub fn new() -> Self {
        Self {
            colors: ArrayVec::new(),
            pops: ArrayVec::new(),
        }
    }

    #[inline(always)]
    pub fn push(&mut self, color: f_pixel, popularity: PalPop) {
        self.colors.push(color);
        self.pops.push(popularity);
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[f_pixel] {
        &self.colors
    }

    #[inline(always)]
    pub fn pop_as_slice(&self) -> &[PalPop] {
        &self.pops
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.colors.len(), self.pops.len());
        self.colors.len()
    }

    #[inline(always)]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut f_pixel, &mut PalPop)> {
        self.colors.iter_mut().zip(self.pops.iter_mut())
    }

    /// Snaps every color to its 8-bit value and merges entries that became identical.
    ///
    /// After this the float palette is exactly what the caller will get,
    /// so errors measured against it are the errors of the output.
    pub(crate) fn round_and_dedup(&mut self) {
        let mut colors = ArrayVec::<f_pixel, MAX_COLORS>::new();
        let mut pops = ArrayVec::<PalPop, MAX_COLORS>::new();
        let mut seen = ArrayVec::<RGBA, MAX_COLORS>::new();
        for (color, pop) in self.colors.iter().zip(&self.pops) {
            let rgba = color.to_rgba();
            if let Some(dupe) = seen.iter().position(|&s| s == rgba) {
                pops[dupe].absorb(*pop);
                continue;
            }
            seen.push(rgba);
            colors.push(f_pixel::from_rgba(rgba));
            pops.push(*pop);
        }
        self.colors = colors;
        self.pops = pops;
    }

    /// Most popular first, ties broken by which color appeared earlier in the image
    pub(crate) fn sort_by_popularity(&mut self) {
        let mut tmp: ArrayVec<(f_pixel, PalPop), MAX_COLORS> = self.colors.iter().copied().zip(self.pops.iter().copied()).collect();
        tmp.sort_by(|(_, a), (_, b)| {
            b.popularity().total_cmp(&a.popularity())
                .then(a.first_seen().cmp(&b.first_seen()))
        });
        for ((dcol, dpop), (scol, spop)) in self.iter_mut().zip(tmp) {
            *dcol = scol;
            *dpop = spop;
        }
    }

    /// Moves the most transparent color (if any is translucent) to the end, keeping the order of the others
    pub(crate) fn move_transparent_last(&mut self) {
        let alpha_index = self.colors.iter().enumerate()
            .filter(|(_, c)| c.to_rgba().a < 255)
            .min_by(|(_, a), (_, b)| a.a.total_cmp(&b.a))
            .map(|(i, _)| i);
        if let Some(i) = alpha_index {
            self.colors[i..].rotate_left(1);
            self.pops[i..].rotate_left(1);
        }
    }

    pub(crate) fn to_rgba_vec(&self) -> ArrayVec<RGBA, MAX_COLORS> {
        self.colors.iter().map(f_pixel::to_rgba).collect()
    }
}

#[test]
fn diff_test() {
    let a = f_pixel::from_rgba(RGBA::new(50, 80, 120, 255));
    let b = f_pixel::from_rgba(RGBA::new(70, 80, 120, 255));
    let c = f_pixel::from_rgba(RGBA::new(250, 80, 120, 255));
    let d = f_pixel::from_rgba(RGBA::new(250, 80, 120, 0));
    assert!(a.diff(&b) < b.diff(&c));
    assert!(c.diff(&b) < c.diff(&d));
    assert_eq!(0., a.diff(&a));

    // green difference is more visible than the same blue difference
    let g = f_pixel::from_rgba(RGBA::new(50, 100, 120, 255));
    let bl = f_pixel::from_rgba(RGBA::new(50, 80, 140, 255));
    assert!(a.diff(&g) > a.diff(&bl));

    let black = f_pixel::from_rgba(RGBA::new(0, 0, 0, 0));
    let white = f_pixel::from_rgba(RGBA::new(255, 255, 255, 255));
    assert!((f64::from(black.diff(&white)) - MAX_DIFF).abs() < 1e-5);
}

#[test]
fn transparent_keeps_color() {
    let a = f_pixel::from_rgba(RGBA::new(255, 0, 0, 0));
    let b = f_pixel::from_rgba(RGBA::new(0, 0, 255, 0));
    assert!(a.diff(&b) > 0.);
    assert_eq!(RGBA::new(255, 0, 0, 0), a.to_rgba());
}

#[test]
fn pal_test() {
    let mut p = PalF::new();
    for i in 0..=255u8 {
        let rgba = RGBA::new(i, 255 - i, i / 3, 100 + i / 2);
        p.push(f_pixel::from_rgba(rgba), PalPop::new(1., u64::from(i)));
        assert_eq!(i as usize + 1, p.len());
        assert_eq!(i as usize + 1, p.pop_as_slice().len());
        assert_eq!(i as usize + 1, p.iter_mut().count());
    }
    p.round_and_dedup();
    assert_eq!(256, p.len());
    for (i, rgba) in p.to_rgba_vec().iter().enumerate() {
        let i = i as u8;
        assert_eq!(*rgba, RGBA::new(i, 255 - i, i / 3, 100 + i / 2));
    }
}

#[test]
fn dedup_merges_popularity() {
    let mut p = PalF::new();
    p.push(f_pixel::from_rgba(RGBA::new(1, 2, 3, 255)), PalPop::new(5., 7));
    p.push(f_pixel::from_rgba(RGBA::new(9, 9, 9, 255)), PalPop::new(1., 0));
    let mut nearly = f_pixel::from_rgba(RGBA::new(1, 2, 3, 255));
    nearly.r += 0.0001;
    p.push(nearly, PalPop::new(3., 2));
    p.round_and_dedup();
    assert_eq!(2, p.len());
    assert_eq!(8., p.pop_as_slice()[0].popularity());
    assert_eq!(2, p.pop_as_slice()[0].first_seen());

    p.sort_by_popularity();
    assert_eq!(RGBA::new(1, 2, 3, 255), p.to_rgba_vec()[0]);
}

#[test]
fn sort_ties_by_first_seen() {
    let mut p = PalF::new();
    for (i, seen) in [3u64, 1, 2, 0].into_iter().enumerate() {
        p.push(f_pixel::from_rgba(RGBA::new(i as u8 * 10, 0, 0, 255)), PalPop::new(1., seen));
    }
    p.sort_by_popularity();
    let order: Vec<_> = p.to_rgba_vec().iter().map(|c| c.r).collect();
    assert_eq!(vec![30, 10, 20, 0], order);
}

#[test]
fn transparent_last() {
    let mut p = PalF::new();
    p.push(f_pixel::from_rgba(RGBA::new(0, 0, 0, 255)), PalPop::new(3., 0));
    p.push(f_pixel::from_rgba(RGBA::new(0, 0, 0, 0)), PalPop::new(2., 1));
    p.push(f_pixel::from_rgba(RGBA::new(9, 0, 0, 255)), PalPop::new(1., 2));
    p.move_transparent_last();
    let pal = p.to_rgba_vec();
    assert_eq!(0, pal[2].a);
    assert_eq!(RGBA::new(9, 0, 0, 255), pal[1]);
}
