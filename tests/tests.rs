use palquant::*;

fn to_bytes(pixels: &[RGBA]) -> Vec<u8> {
    pixels.iter().flat_map(|px| [px.r, px.g, px.b, px.a]).collect()
}

fn from_indices(out: &Quantized) -> Vec<RGBA> {
    out.indices.iter().map(|&i| out.palette[usize::from(i)]).collect()
}

/// Smooth two-channel gradient with a translucent band, thousands of colors
fn gradient(width: usize, height: usize) -> Vec<RGBA> {
    (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        let a = if y < height / 4 { (x * 255 / width) as u8 } else { 255 };
        RGBA::new((x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) * 3) as u8, a)
    }).collect()
}

fn check_invariants(out: &Quantized, width: usize, height: usize) {
    assert_eq!(width * height, out.indices.len());
    assert!(!out.palette.is_empty() && out.palette.len() <= 256);
    assert!(out.indices.iter().all(|&i| usize::from(i) < out.palette.len()));
    assert!((0. ..=100.).contains(&out.score));
    for (i, a) in out.palette.iter().enumerate() {
        assert!(!out.palette[i + 1..].contains(a), "duplicate {a:?}");
    }
}

#[test]
fn indices_are_valid_at_every_speed() {
    let (w, h) = (97, 61);
    let pixels = gradient(w, h);
    let bytes = to_bytes(&pixels);
    for speed in 1..=11 {
        let out = quantize(&bytes, w, h, 0, 100, speed).unwrap();
        check_invariants(&out, w, h);
        assert!(out.palette.len() > 128, "speed {speed}");
        assert!(out.score > 0.);
    }
}

#[test]
fn two_by_two() {
    let pixels = [RGBA::new(255, 0, 0, 255), RGBA::new(0, 255, 0, 255), RGBA::new(0, 0, 255, 255), RGBA::new(255, 255, 255, 255)];
    let out = quantize(&to_bytes(&pixels), 2, 2, 0, 100, 1).unwrap();
    assert_eq!(4, out.palette.len());
    assert_eq!(vec![0, 1, 2, 3], out.indices);
    assert_eq!(&pixels[..], &out.palette[..]);
    assert_eq!(0., out.score);
}

#[test]
fn one_and_two_colors() {
    let a = RGBA::new(10, 20, 30, 255);
    let b = RGBA::new(250, 128, 0, 100);
    for speed in [1, 4, 8, 11] {
        let out = quantize(&to_bytes(&vec![a; 50]), 10, 5, 0, 100, speed).unwrap();
        assert_eq!(vec![a], out.palette);
        assert!(out.indices.iter().all(|&i| i == 0));
        assert_eq!(0., out.score);

        let pixels: Vec<_> = (0..50).map(|i| if i % 3 == 0 { b } else { a }).collect();
        let out = quantize(&to_bytes(&pixels), 10, 5, 0, 100, speed).unwrap();
        assert_eq!(vec![a, b], out.palette);
        assert_eq!(pixels, from_indices(&out));
        assert_eq!(0., out.score);
    }
}

#[test]
fn deterministic() {
    let (w, h) = (120, 80);
    let bytes = to_bytes(&gradient(w, h));
    for speed in [1, 5, 9] {
        let first = quantize(&bytes, w, h, 5, 60, speed).unwrap();
        let second = quantize(&bytes, w, h, 5, 60, speed).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn idempotent() {
    let (w, h) = (64, 48);
    let bytes = to_bytes(&gradient(w, h));
    for speed in [1, 4, 10] {
        let lossy = quantize(&bytes, w, h, 0, 100, speed).unwrap();
        let quantized_pixels = from_indices(&lossy);

        let again = quantize(&to_bytes(&quantized_pixels), w, h, 0, 100, speed).unwrap();
        assert_eq!(0., again.score);
        assert_eq!(quantized_pixels, from_indices(&again));
        let mut pal1 = lossy.palette.clone();
        let mut pal2 = again.palette.clone();
        // colors the dithering never picked don't come back
        pal1.retain(|c| quantized_pixels.contains(c));
        pal1.sort_by_key(|c| (c.r, c.g, c.b, c.a));
        pal2.sort_by_key(|c| (c.r, c.g, c.b, c.a));
        assert_eq!(pal1, pal2);
    }
}

#[test]
fn lossless_or_nothing() {
    let few: Vec<_> = (0..300).map(|i| RGBA::new((i % 17) as u8 * 15, (i % 11) as u8 * 20, 0, 255)).collect();
    let out = quantize(&to_bytes(&few), 20, 15, 0, 0, 6).unwrap();
    assert_eq!(0., out.score);
    assert_eq!(few, from_indices(&out));

    let (w, h) = (40, 30);
    let many = gradient(w, h);
    assert_eq!(Err(Error::QualityUnattainable), quantize(&to_bytes(&many), w, h, 0, 0, 6));
}

#[test]
fn quality_limits() {
    let (w, h) = (80, 80);
    let bytes = to_bytes(&gradient(w, h));
    let loose = quantize(&bytes, w, h, 20, 50, 3).unwrap();
    assert!(loose.score <= 50.);
    let tight = quantize(&bytes, w, h, 2, 50, 3).unwrap();
    assert!(tight.palette.len() >= loose.palette.len());
    check_invariants(&tight, w, h);

    let mut attr = Attributes::new();
    attr.set_max_colors(2).unwrap();
    attr.set_quality(0, 5).unwrap();
    let img = Image::from_rgba_bytes(&attr, &bytes, w, h).unwrap();
    assert_eq!(Error::QualityUnattainable, attr.quantize(&img).unwrap_err());
}

#[test]
fn shared_palette() {
    let attr = Attributes::new();
    let first = gradient(30, 30);
    let second: Vec<_> = first.iter().map(|px| RGBA::new(px.g, px.r, px.b, 255)).collect();
    let img1 = attr.new_image_borrowed(&first, 30, 30).unwrap();
    let img2 = attr.new_image_borrowed(&second, 30, 30).unwrap();

    let mut hist = Histogram::new(&attr);
    hist.add_image(&attr, &img1).unwrap();
    hist.add_image(&attr, &img2).unwrap();
    let mut res = hist.quantize(&attr).unwrap();
    let (pal1, idx1) = res.remapped(&img1).unwrap();
    let (pal2, idx2) = res.remapped(&img2).unwrap();
    assert_eq!(pal1, pal2);
    assert!(idx1.iter().chain(&idx2).all(|&i| usize::from(i) < pal1.len()));
}

#[test]
fn dithering_level() {
    let (w, h) = (50, 50);
    let pixels = gradient(w, h);
    let mut attr = Attributes::new();
    attr.set_max_colors(8).unwrap();
    let img = attr.new_image_borrowed(&pixels, w, h).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    assert_eq!(1., res.dithering_level());

    let (_, dithered) = res.remapped(&img).unwrap();
    let dithered_score = res.remapping_score().unwrap();
    res.set_dithering_level(0.).unwrap();
    let (_, flat) = res.remapped(&img).unwrap();
    let flat_score = res.remapping_score().unwrap();
    assert_ne!(dithered, flat);
    // without dithering every pixel gets its closest color
    assert!(flat_score <= dithered_score);
}

#[cfg(feature = "png")]
#[test]
fn png_round_trip() {
    let (w, h) = (31, 17);
    let pixels = gradient(w, h);
    let png = lodepng::encode32(&pixels, w, h).unwrap();
    let out = palquant::png::quantize_png(&png, 0, 100, 5).unwrap();
    let decoded = lodepng::decode_memory(&out, lodepng::ColorType::PALETTE, 8).unwrap();
    match decoded {
        lodepng::Image::RawData(bitmap) => assert_eq!(w * h, bitmap.buffer.len()),
        _ => panic!("expected palette image"),
    }
}
