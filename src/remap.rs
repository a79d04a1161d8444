use crate::error::*;
use crate::image::Image;
use crate::nearest::{ColorGrid, Nearest, PaletteLookup};
use crate::pal::{f_pixel, PalF, PalIndex, ARGBF, WEIGHT_A, WEIGHT_B, WEIGHT_G, WEIGHT_R};
use crate::quality::score_to_mse;
use std::cell::RefCell;

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;
#[cfg(feature = "threads")]
use thread_local::ThreadLocal;

/// How pixels are matched to palette entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapMode {
    /// Closest color for every pixel, with error diffusion if enabled
    Exact,
    /// Lookup through a coarse grid of precomputed candidates, without error diffusion
    Approximate,
}

/// Maps every pixel to its closest palette entry, without dithering.
///
/// Returns MSE of the remapping.
#[inline(never)]
pub(crate) fn remap_to_palette(image: &Image<'_>, output: &mut [u8], palette: &PalF, mode: RemapMode) -> Result<f64, Error> {
    match mode {
        RemapMode::Exact => remap_rows(image, output, &Nearest::new(palette)?),
        RemapMode::Approximate => remap_rows(image, output, &ColorGrid::new(palette)?),
    }
}

fn remap_rows<L: PaletteLookup>(image: &Image<'_>, output: &mut [u8], lookup: &L) -> Result<f64, Error> {
    let width = image.width();
    let pixels = image.pixels();
    if output.len() != pixels.len() {
        return Err(BufferSizeMismatch);
    }

    let tls = ThreadLocal::new();
    let row_errors = output.par_chunks_mut(width).zip(pixels.par_chunks(width)).map(|(output_row, input_row)| {
        let row_f = tls.get_or(|| RefCell::new(Vec::<f_pixel>::new()));
        let mut row_f = row_f.borrow_mut();
        row_f.clear();
        row_f.extend(input_row.iter().map(|&px| f_pixel::from_rgba(px)));

        let mut remapping_error = 0.;
        let mut last_match = 0;
        for (px, out) in row_f.iter().zip(output_row) {
            let (matched, diff) = lookup.search(px, last_match);
            last_match = matched;
            *out = matched;
            remapping_error += f64::from(diff);
        }
        remapping_error
    }).collect::<Vec<f64>>();

    let total: f64 = row_errors.into_iter().sum();
    Ok(total / pixels.len() as f64)
}

/// Error below this isn't noticeable, and diffusing it only adds noise
const MIN_DITHER_ERROR: f32 = 2. / 256. / 256.;

/// Adds the accumulated error to the pixel, taking care not to push it too far out of the color cube
fn get_dithered_pixel(dither_level: f32, max_dither_error: f32, thiserr: f_pixel, px: f_pixel) -> f_pixel {
    let s = thiserr.0 * dither_level;
    let dither_error = s.r * s.r + s.g * s.g + s.b * s.b + s.a * s.a;
    if dither_error < MIN_DITHER_ERROR {
        return px;
    }

    // a bit of overflow is allowed, otherwise clamping all channels causes flat bands
    let mut ratio: f32 = 1.;
    for (value, err, weight) in [(px.r, s.r, WEIGHT_R), (px.g, s.g, WEIGHT_G), (px.b, s.b, WEIGHT_B)] {
        let max_overflow = 1.1 * weight;
        let max_underflow = -0.1 * weight;
        if value + err > max_overflow {
            ratio = ratio.min((max_overflow - value) / err);
        } else if value + err < max_underflow {
            ratio = ratio.min((max_underflow - value) / err);
        }
    }
    // huge error would make isolated pixels of an unrelated color
    if dither_error > max_dither_error {
        ratio *= 0.8;
    }
    f_pixel(ARGBF {
        a: (px.a + s.a).clamp(0., WEIGHT_A),
        r: px.r + s.r * ratio,
        g: px.g + s.g * ratio,
        b: px.b + s.b * ratio,
    })
}

/// Serpentine Floyd-Steinberg error diffusion.
///
/// Returns MSE between the input and the colors actually picked.
#[inline(never)]
pub(crate) fn remap_to_palette_floyd(image: &Image<'_>, output: &mut [u8], palette: &PalF, dither_level: f32, palette_mse: f64, mut abort: impl FnMut(f32) -> bool) -> Result<f64, Error> {
    let width = image.width();
    let height = image.height();
    let pixels = image.pixels();
    if output.len() != pixels.len() {
        return Err(BufferSizeMismatch);
    }

    let n = Nearest::new(palette)?;
    let colors = palette.as_slice();

    let max_dither_error = (palette_mse * 2.4).max(score_to_mse(15.)) as f32;
    // response to the level is non-linear, and diffusing the full error lets small errors accumulate
    let dither_level = (1. - (1. - dither_level) * (1. - dither_level)) * (15. / 16.);

    // one extra pixel on each side, so the edges don't need special cases
    let errwidth = width + 2;
    let mut err_data = Vec::new();
    err_data.try_reserve_exact(errwidth * 2)?;
    err_data.resize(errwidth * 2, f_pixel::default());
    let (mut thiserr, mut nexterr) = err_data.split_at_mut(errwidth);

    let mut row_f = Vec::new();
    row_f.try_reserve_exact(width)?;

    let mut remapping_error = 0.;
    let mut scan_forward = true;
    for (row, (input_row, output_row)) in pixels.chunks_exact(width).zip(output.chunks_exact_mut(width)).enumerate() {
        if abort(row as f32 * 100. / height as f32) {
            return Err(Aborted);
        }
        row_f.clear();
        row_f.extend(input_row.iter().map(|&px| f_pixel::from_rgba(px)));
        nexterr.fill(f_pixel::default());

        let mut last_match: PalIndex = 0;
        let mut col = if scan_forward { 0 } else { width - 1 };
        loop {
            let input_px = row_f[col];
            let spx = get_dithered_pixel(dither_level, max_dither_error, thiserr[col + 1], input_px);
            let (matched, _) = n.search(&spx, last_match);
            last_match = matched;
            output_row[col] = matched;

            let output_px = colors[usize::from(matched)];
            remapping_error += f64::from(input_px.diff(&output_px));

            let mut err = spx.0 - output_px.0;
            if err.r * err.r + err.g * err.g + err.b * err.b + err.a * err.a > max_dither_error {
                err = err * 0.75;
            }
            if scan_forward {
                thiserr[col + 2].0 += err * (7. / 16.);
                nexterr[col + 2].0 = err * (1. / 16.);
                nexterr[col + 1].0 += err * (5. / 16.);
                nexterr[col].0 += err * (3. / 16.);
                col += 1;
                if col >= width {
                    break;
                }
            } else {
                thiserr[col].0 += err * (7. / 16.);
                nexterr[col + 2].0 += err * (3. / 16.);
                nexterr[col + 1].0 += err * (5. / 16.);
                nexterr[col].0 = err * (1. / 16.);
                if col == 0 {
                    break;
                }
                col -= 1;
            }
        }
        std::mem::swap(&mut thiserr, &mut nexterr);
        scan_forward = !scan_forward;
    }
    Ok(remapping_error / pixels.len() as f64)
}

#[cfg(test)]
fn palette_of(colors: &[crate::RGBA]) -> PalF {
    use crate::pal::PalPop;
    let mut pal = PalF::new();
    for (i, &c) in colors.iter().enumerate() {
        pal.push(f_pixel::from_rgba(c), PalPop::new(1., i as u64));
    }
    pal
}

#[test]
fn send() {
    fn is_send<T: Send>() {}
    is_send::<crate::QuantizationResult>();
    is_send::<Image<'static>>();
}

#[test]
fn exact_colors_map_exactly() {
    use crate::RGBA;
    let colors = [RGBA::new(0, 0, 0, 255), RGBA::new(255, 255, 255, 255), RGBA::new(255, 0, 0, 0), RGBA::new(0, 0, 255, 0)];
    let pal = palette_of(&colors);
    let attr = crate::Attributes::new();
    let pixels: Vec<_> = (0..60 * 7).map(|n| colors[(n * 7 + n / 13) % 4]).collect();
    let img = attr.new_image_borrowed(&pixels, 60, 7).unwrap();

    for mode in [RemapMode::Exact, RemapMode::Approximate] {
        let mut out = vec![0; pixels.len()];
        assert_eq!(0., remap_to_palette(&img, &mut out, &pal, mode).unwrap());
        for (px, &idx) in pixels.iter().zip(&out) {
            assert_eq!(*px, colors[usize::from(idx)]);
        }
    }

    let mut dithered = vec![0; pixels.len()];
    assert_eq!(0., remap_to_palette_floyd(&img, &mut dithered, &pal, 1., 0., |_| false).unwrap());
    for (px, &idx) in pixels.iter().zip(&dithered) {
        assert_eq!(*px, colors[usize::from(idx)]);
    }
}

#[test]
fn dithering_mixes_colors() {
    use crate::RGBA;
    let pal = palette_of(&[RGBA::new(0, 0, 0, 255), RGBA::new(255, 255, 255, 255)]);
    let attr = crate::Attributes::new();
    let pixels = vec![RGBA::new(128, 128, 128, 255); 32 * 32];
    let img = attr.new_image_borrowed(&pixels, 32, 32).unwrap();

    let mut flat = vec![0; pixels.len()];
    remap_to_palette(&img, &mut flat, &pal, RemapMode::Exact).unwrap();
    assert!(flat.iter().all(|&i| i == flat[0]));

    let mut dithered = vec![0; pixels.len()];
    remap_to_palette_floyd(&img, &mut dithered, &pal, 1., 0.25, |_| false).unwrap();
    let whites = dithered.iter().filter(|&&i| i == 1).count();
    assert!(whites > pixels.len() / 4 && whites < pixels.len() * 3 / 4, "{whites}");

    let mut again = vec![0; pixels.len()];
    remap_to_palette_floyd(&img, &mut again, &pal, 1., 0.25, |_| false).unwrap();
    assert_eq!(dithered, again);
}

#[test]
fn floyd_can_abort() {
    use crate::RGBA;
    let pal = palette_of(&[RGBA::new(0, 0, 0, 255)]);
    let attr = crate::Attributes::new();
    let pixels = vec![RGBA::new(1, 2, 3, 255); 16];
    let img = attr.new_image_borrowed(&pixels, 4, 4).unwrap();
    let mut out = vec![0; 16];
    assert_eq!(Err(Aborted), remap_to_palette_floyd(&img, &mut out, &pal, 1., 0., |p| p > 40.));
}
