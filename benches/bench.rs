#![feature(test)]

extern crate test;
use test::Bencher;

use palquant::*;

fn test_image() -> (Vec<RGBA>, usize, usize) {
    let (width, height) = (640, 480);
    let pixels = (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        let a = if y < 100 { (x * 255 / width) as u8 } else { 255 };
        RGBA::new((x * 255 / width) as u8, (y * 255 / height) as u8, ((x ^ y) & 0xFF) as u8, a)
    }).collect();
    (pixels, width, height)
}

#[bench]
fn histogram(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let liq = Attributes::new();
    b.iter(move || {
        let img = liq.new_image_borrowed(&pixels, width, height).unwrap();
        let mut hist = Histogram::new(&liq);
        hist.add_image(&liq, &img).unwrap();
    });
}

#[bench]
fn remap_approximate(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let mut buf = Vec::new();
    let mut liq = Attributes::new();
    liq.set_speed(10).unwrap();
    let img = liq.new_image(pixels, width, height).unwrap();
    let mut res = liq.quantize(&img).unwrap();
    b.iter(move || {
        res.remap_into_vec(&img, &mut buf).unwrap();
    });
}

#[bench]
fn remap_exact(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let mut buf = Vec::new();
    let mut liq = Attributes::new();
    liq.set_speed(4).unwrap();
    let img = liq.new_image(pixels, width, height).unwrap();
    let mut res = liq.quantize(&img).unwrap();
    res.set_dithering_level(0.).unwrap();
    b.iter(move || {
        res.remap_into_vec(&img, &mut buf).unwrap();
    });
}

#[bench]
fn remap_floyd(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let mut buf = Vec::new();
    let mut liq = Attributes::new();
    liq.set_speed(4).unwrap();
    let img = liq.new_image(pixels, width, height).unwrap();
    let mut res = liq.quantize(&img).unwrap();
    res.set_dithering_level(1.).unwrap();
    b.iter(move || {
        res.remap_into_vec(&img, &mut buf).unwrap();
    });
}

#[bench]
fn quantize_s8(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let mut liq = Attributes::new();
    liq.set_speed(8).unwrap();
    b.iter(move || {
        let img = liq.new_image_borrowed(&pixels, width, height).unwrap();
        liq.quantize(&img).unwrap();
    });
}

#[bench]
fn quantize_s1(b: &mut Bencher) {
    let (pixels, width, height) = test_image();
    let mut liq = Attributes::new();
    liq.set_speed(1).unwrap();
    b.iter(move || {
        let img = liq.new_image_borrowed(&pixels, width, height).unwrap();
        liq.quantize(&img).unwrap();
    });
}
