use crate::error::Error;
use crate::pal::{f_pixel, PalF, PalIndex, MAX_COLORS, RGBA, WEIGHT_A, WEIGHT_B, WEIGHT_G, WEIGHT_R};
use std::ops::Range;

/// Finds the palette entry closest to a color
pub(crate) trait PaletteLookup: Sync {
    /// Returns index of the closest color and the squared distance to it.
    ///
    /// `likely_index` is a hint, and may be out of range.
    fn search(&self, px: &f_pixel, likely_index: PalIndex) -> (PalIndex, f32);
}

/// Exact nearest neighbor search in a vantage-point tree
pub(crate) struct Nearest<'pal> {
    palette: &'pal PalF,
    /// Children are always stored before their parent. The root is last.
    nodes: Vec<Node>,
    leaf_members: Vec<(PalIndex, f_pixel)>,
    /// A color closer than this to a palette entry can't be closer to any other entry
    nearest_other_color_dist: [f32; MAX_COLORS],
}

struct Node {
    vantage_point: f_pixel,
    index: PalIndex,
    kind: NodeKind,
}

enum NodeKind {
    Split {
        radius: f32,
        radius_squared: f32,
        near: usize,
        far: usize,
    },
    Leaf {
        members: Range<usize>,
    },
}

const LEAF_MAX_SIZE: usize = 6;

struct Best {
    index: PalIndex,
    distance: f32,
    distance_squared: f32,
    exclude: Option<PalIndex>,
}

impl Best {
    #[inline(always)]
    fn visit(&mut self, distance_squared: f32, index: PalIndex) {
        if distance_squared < self.distance_squared && self.exclude != Some(index) {
            self.distance_squared = distance_squared;
            self.distance = distance_squared.sqrt();
            self.index = index;
        }
    }
}

impl<'pal> Nearest<'pal> {
    #[inline(never)]
    pub fn new(palette: &'pal PalF) -> Result<Self, Error> {
        if palette.len() == 0 || palette.len() > MAX_COLORS {
            return Err(Error::PaletteSize);
        }
        let mut indexes: Vec<PalIndex> = (0..palette.len()).map(|i| i as PalIndex).collect();
        let mut tree = Nearest {
            palette,
            nodes: Vec::new(),
            leaf_members: Vec::new(),
            nearest_other_color_dist: [0.; MAX_COLORS],
        };
        tree.nodes.try_reserve(palette.len())?;
        tree.build(&mut indexes);

        for (i, color) in palette.as_slice().iter().enumerate() {
            let mut best = Best {
                index: 0,
                distance: f32::INFINITY,
                distance_squared: f32::INFINITY,
                exclude: Some(i as PalIndex),
            };
            tree.search_node(tree.root(), color, &mut best);
            // half of the distance, squared
            tree.nearest_other_color_dist[i] = best.distance_squared / 4.;
        }
        Ok(tree)
    }

    #[inline(always)]
    fn root(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns index of the new node
    fn build(&mut self, indexes: &mut [PalIndex]) -> usize {
        debug_assert!(!indexes.is_empty());
        let palette = self.palette;
        let colors = palette.as_slice();
        let pops = palette.pop_as_slice();

        // the most popular color is the most likely answer, so it's checked first
        let mut vp = 0;
        for (n, &i) in indexes.iter().enumerate().skip(1) {
            if pops[usize::from(i)].popularity() > pops[usize::from(indexes[vp])].popularity() {
                vp = n;
            }
        }
        indexes.swap(0, vp);
        let vp_index = indexes[0];
        let rest = &mut indexes[1..];
        let vantage_point = colors[usize::from(vp_index)];

        rest.sort_unstable_by(|&a, &b| {
            vantage_point.diff(&colors[usize::from(a)])
                .total_cmp(&vantage_point.diff(&colors[usize::from(b)]))
                .then(a.cmp(&b))
        });

        let kind = if rest.len() <= LEAF_MAX_SIZE {
            let start = self.leaf_members.len();
            self.leaf_members.extend(rest.iter().map(|&i| (i, colors[usize::from(i)])));
            NodeKind::Leaf { members: start..self.leaf_members.len() }
        } else {
            let (near, far) = rest.split_at_mut(rest.len() / 2);
            let radius_squared = vantage_point.diff(&colors[usize::from(far[0])]);
            let near = self.build(near);
            let far = self.build(far);
            NodeKind::Split { radius: radius_squared.sqrt(), radius_squared, near, far }
        };

        self.nodes.push(Node { vantage_point, index: vp_index, kind });
        self.nodes.len() - 1
    }

    fn search_node(&self, mut node_index: usize, needle: &f_pixel, best: &mut Best) {
        loop {
            let node = &self.nodes[node_index];
            let distance_squared = node.vantage_point.diff(needle);
            best.visit(distance_squared, node.index);

            match node.kind {
                NodeKind::Split { radius, radius_squared, near, far } => {
                    let distance = distance_squared.sqrt();
                    // the side the needle is on goes first, so that `best` shrinks early
                    if distance_squared < radius_squared {
                        self.search_node(near, needle, best);
                        if distance >= radius - best.distance {
                            node_index = far;
                            continue;
                        }
                    } else {
                        self.search_node(far, needle, best);
                        if distance <= radius + best.distance {
                            node_index = near;
                            continue;
                        }
                    }
                    return;
                },
                NodeKind::Leaf { ref members } => {
                    for &(index, color) in &self.leaf_members[members.clone()] {
                        best.visit(color.diff(needle), index);
                    }
                    return;
                },
            }
        }
    }
}

impl PaletteLookup for Nearest<'_> {
    #[inline]
    fn search(&self, px: &f_pixel, likely_index: PalIndex) -> (PalIndex, f32) {
        let mut best = match self.palette.as_slice().get(usize::from(likely_index)) {
            Some(guess) => {
                let guess_diff = px.diff(guess);
                if guess_diff < self.nearest_other_color_dist[usize::from(likely_index)] {
                    return (likely_index, guess_diff);
                }
                Best { index: likely_index, distance: guess_diff.sqrt(), distance_squared: guess_diff, exclude: None }
            },
            None => Best { index: 0, distance: f32::INFINITY, distance_squared: f32::INFINITY, exclude: None },
        };
        self.search_node(self.root(), px, &mut best);
        (best.index, best.distance_squared)
    }
}

/// Cells per channel. Each cell spans 32 values of the 8-bit channel.
const GRID_SIZE: usize = 8;
const GRID_SHIFT: u32 = 5;

/// Cached lookup for fast remapping.
///
/// The color space is cut into a coarse grid, and each cell remembers which palette entries
/// could possibly be the closest to any color inside it. A search only compares against those.
pub(crate) struct ColorGrid<'pal> {
    palette: &'pal PalF,
    cells: Vec<Range<u32>>,
    candidates: Vec<PalIndex>,
}

impl<'pal> ColorGrid<'pal> {
    #[inline(never)]
    pub fn new(palette: &'pal PalF) -> Result<Self, Error> {
        if palette.len() == 0 || palette.len() > MAX_COLORS {
            return Err(Error::PaletteSize);
        }
        let colors = palette.as_slice();
        let mut cells = Vec::new();
        cells.try_reserve_exact(GRID_SIZE.pow(4))?;
        let mut candidates = Vec::new();
        let mut mindists = Vec::with_capacity(colors.len());

        for cell in 0..GRID_SIZE.pow(4) {
            let (lo, hi) = cell_bounds(cell);
            mindists.clear();
            let mut closest_maxdist = f32::INFINITY;
            for c in colors {
                let (min, max) = box_distance(c, &lo, &hi);
                mindists.push(min);
                closest_maxdist = closest_maxdist.min(max);
            }
            let limit = closest_maxdist * (1. + 1e-5) + 1e-9;
            let start = candidates.len() as u32;
            candidates.extend(mindists.iter().enumerate().filter(|&(_, &d)| d <= limit).map(|(i, _)| i as PalIndex));
            cells.push(start..candidates.len() as u32);
        }

        Ok(Self { palette, cells, candidates })
    }
}

#[inline(always)]
fn cell_index(px: RGBA) -> usize {
    let c = |v: u8| usize::from(v >> GRID_SHIFT);
    ((c(px.r) * GRID_SIZE + c(px.g)) * GRID_SIZE + c(px.b)) * GRID_SIZE + c(px.a)
}

/// Corners of the cell in weighted color space, in RGBA order
fn cell_bounds(cell: usize) -> ([f32; 4], [f32; 4]) {
    let weights = [WEIGHT_R, WEIGHT_G, WEIGHT_B, WEIGHT_A];
    let mut lo = [0.; 4];
    let mut hi = [0.; 4];
    let mut rest = cell;
    for chan in (0..4).rev() {
        let pos = rest % GRID_SIZE;
        rest /= GRID_SIZE;
        let first = (pos << GRID_SHIFT) as f32;
        let last = first + ((1 << GRID_SHIFT) - 1) as f32;
        lo[chan] = first * weights[chan] / 255.;
        hi[chan] = last * weights[chan] / 255.;
    }
    (lo, hi)
}

/// Squared distances from a color to the nearest and to the farthest point of a box
fn box_distance(c: &f_pixel, lo: &[f32; 4], hi: &[f32; 4]) -> (f32, f32) {
    let mut min = 0.;
    let mut max = 0.;
    for ((v, lo), hi) in [c.r, c.g, c.b, c.a].into_iter().zip(lo).zip(hi) {
        let outside = if v < *lo { lo - v } else if v > *hi { v - hi } else { 0. };
        let farthest = (v - lo).abs().max((hi - v).abs());
        min += outside * outside;
        max += farthest * farthest;
    }
    (min, max)
}

impl PaletteLookup for ColorGrid<'_> {
    #[inline]
    fn search(&self, px: &f_pixel, _likely_index: PalIndex) -> (PalIndex, f32) {
        let colors = self.palette.as_slice();
        let range = &self.cells[cell_index(px.to_rgba())];
        let mut best = (0, f32::INFINITY);
        for &i in &self.candidates[range.start as usize..range.end as usize] {
            let d = px.diff(&colors[usize::from(i)]);
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    }
}

#[cfg(test)]
fn test_palette(len: usize, seed: u32) -> PalF {
    use crate::pal::PalPop;
    let mut pal = PalF::new();
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
        (state >> 16) as u8
    };
    for i in 0..len {
        let rgba = RGBA::new(next(), next(), next(), if i % 5 == 0 { next() } else { 255 });
        pal.push(f_pixel::from_rgba(rgba), PalPop::new(f64::from(next()), i as u64));
    }
    pal.round_and_dedup();
    pal
}

#[cfg(test)]
fn brute_force(pal: &PalF, px: &f_pixel) -> f32 {
    pal.as_slice().iter().map(|c| c.diff(px)).fold(f32::INFINITY, f32::min)
}

#[test]
fn matches_brute_force() {
    for (len, seed) in [(1, 1), (2, 7), (7, 3), (16, 11), (100, 5), (256, 9)] {
        let pal = test_palette(len, seed);
        let tree = Nearest::new(&pal).unwrap();
        let grid = ColorGrid::new(&pal).unwrap();
        for n in 0..2000u32 {
            let px = f_pixel::from_rgba(RGBA::new((n * 7) as u8, (n * 13) as u8, (n * 31) as u8, if n % 3 == 0 { (n * 3) as u8 } else { 255 }));
            let expected = brute_force(&pal, &px);
            for guess in [0, (n % 300) as PalIndex] {
                let (idx, dist) = tree.search(&px, guess);
                assert_eq!(expected, dist);
                assert_eq!(dist, px.diff(&pal.as_slice()[usize::from(idx)]));
            }
            let (idx, dist) = grid.search(&px, 0);
            assert_eq!(expected, dist);
            assert_eq!(dist, px.diff(&pal.as_slice()[usize::from(idx)]));
        }
    }
}

#[test]
fn palette_colors_map_to_themselves() {
    let pal = test_palette(200, 42);
    let tree = Nearest::new(&pal).unwrap();
    let grid = ColorGrid::new(&pal).unwrap();
    for (i, c) in pal.as_slice().iter().enumerate() {
        assert_eq!((i as PalIndex, 0.), tree.search(c, 0));
        assert_eq!((i as PalIndex, 0.), tree.search(c, i as PalIndex));
        assert_eq!((i as PalIndex, 0.), grid.search(c, 0));
    }
}

#[test]
fn empty_palette() {
    let pal = PalF::new();
    assert!(Nearest::new(&pal).is_err());
    assert!(ColorGrid::new(&pal).is_err());
}
