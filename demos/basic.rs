fn main() {
    // Image loading/saving is outside scope of this example, see the `png` feature for that
    let width = 64usize;
    let height = 64usize;
    let bitmap: Vec<u8> = (0..width * height).flat_map(|i| {
        let (x, y) = (i % width, i / width);
        [(x * 4) as u8, (y * 4) as u8, 128, 255]
    }).collect();

    // Configure the library
    let mut liq = palquant::Attributes::new();
    liq.set_speed(5).unwrap();
    liq.set_quality(5, 40).unwrap();
    liq.set_log_callback(|_, msg| println!("{msg}"));

    // Describe the bitmap
    let img = palquant::Image::from_rgba_bytes(&liq, &bitmap, width, height).unwrap();

    // The magic happens in quantize()
    let mut res = match liq.quantize(&img) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err}"),
    };

    // Enable dithering for subsequent remappings
    res.set_dithering_level(1.0).unwrap();

    // You can reuse the result to generate several images with the same palette
    let (palette, pixels) = res.remapped(&img).unwrap();

    println!(
        "Done! Got {} colors and {} pixels, palette score {:.2}, remapped score {:.2}",
        palette.len(),
        pixels.len(),
        res.quantization_score(),
        res.remapping_score().unwrap_or_default()
    );

    // Or all of it in one call
    let out = palquant::quantize(&bitmap, width, height, 5, 40, 5).unwrap();
    println!("{} colors, score {:.2}", out.palette.len(), out.score);
}
