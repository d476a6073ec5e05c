use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imgrelay::transform::{palette, Fit, Format, Processor, TransformSpec};

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn resize_and_encode_jpeg() {
    let input = png_bytes(&DynamicImage::new_rgb8(800, 600));
    let spec = TransformSpec {
        width: 400,
        format: Some(Format::Jpeg),
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    let decoded = image::load_from_memory(&out).unwrap();
    assert_eq!(decoded.dimensions(), (400, 300));
    assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
}

#[test]
fn contain_halves_the_narrow_axis() {
    let input = png_bytes(&DynamicImage::new_rgb8(200, 400));
    let spec = TransformSpec {
        width: 100,
        height: 100,
        fit: Some(Fit::Contain),
        format: Some(Format::Png),
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    let decoded = image::load_from_memory(&out).unwrap();
    assert_eq!(decoded.dimensions(), (50, 100));
}

#[test]
fn same_size_roundtrip_keeps_dimensions() {
    let input = png_bytes(&DynamicImage::new_rgb8(120, 90));
    let spec = TransformSpec {
        width: 120,
        height: 90,
        quality: 80,
        format: Some(Format::Jpeg),
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (120, 90));
}

#[test]
fn webp_output_is_webp() {
    let input = png_bytes(&DynamicImage::new_rgb8(64, 64));
    let spec = TransformSpec {
        format: Some(Format::Webp),
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::WebP);
}

#[test]
fn blurhash_equals_hash_of_prescaled_input() {
    let mut img = RgbImage::new(64, 64);
    for y in 0..64 {
        for x in 0..64 {
            img.put_pixel(x, y, Rgb([(x * 4) as u8, (y * 4) as u8, 77]));
        }
    }
    let img = DynamicImage::ImageRgb8(img);

    let spec = TransformSpec {
        blurhash: true,
        ..Default::default()
    };
    let out = Processor::default()
        .process(&png_bytes(&img), &spec, "img/a.png")
        .unwrap();
    let hash = String::from_utf8(out).unwrap();

    let prescaled = img.resize_exact(32, 32, image::imageops::FilterType::Lanczos3);
    assert_eq!(hash, palette::blurhash_string(&prescaled, None).unwrap());
}

#[test]
fn sepia_tints_white() {
    let input = png_bytes(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
        8,
        8,
        Rgb([255, 255, 255]),
    )));
    let spec = TransformSpec {
        format: Some(Format::Png),
        effect: imgrelay::transform::Effect::Sepia,
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
    let p = decoded.get_pixel(4, 4).0;
    // White through the sepia matrix: R and G saturate, B lands near 204.
    assert_eq!(p[0], 255);
    assert_eq!(p[1], 255);
    assert!(p[2] >= 200 && p[2] <= 208);
}

#[test]
fn watermark_is_composited() {
    let base = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])));
    let wm = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        10,
        10,
        image::Rgba([255, 255, 255, 255]),
    ));

    let processor = Processor {
        watermark: Some((std::sync::Arc::new(wm), 1.0)),
        ..Default::default()
    };
    let spec = TransformSpec {
        format: Some(Format::Png),
        ..Default::default()
    };

    let out = processor.process(&png_bytes(&base), &spec, "img/a.png").unwrap();
    let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
    // Watermark corner region is white, the rest stays black.
    assert_eq!(decoded.get_pixel(85, 85).0, [255, 255, 255]);
    assert_eq!(decoded.get_pixel(10, 10).0, [0, 0, 0]);
}

#[test]
fn text_overlay_does_not_fail() {
    let input = png_bytes(&DynamicImage::new_rgb8(200, 100));
    let spec = TransformSpec {
        text: "sale".to_string(),
        format: Some(Format::Png),
        ..Default::default()
    };

    let out = Processor::default().process(&input, &spec, "img/a.png").unwrap();
    assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (200, 100));
}

#[test]
fn palette_finds_dominant_colors() {
    let mut img = RgbImage::new(100, 100);
    for y in 0..100 {
        for x in 0..100 {
            let color = if x < 80 { Rgb([10, 20, 30]) } else { Rgb([240, 10, 10]) };
            img.put_pixel(x, y, color);
        }
    }
    let colors = palette::extract_palette(&png_bytes(&DynamicImage::ImageRgb8(img))).unwrap();
    assert_eq!(colors[0], "#0a141e");
    assert!(colors.len() <= 5);
}

#[test]
fn gif_page_selection_picks_requested_frame() {
    // Two-frame GIF: red then blue.
    let mut buf = Vec::new();
    {
        let mut encoder = image::codecs::gif::GifEncoder::new(&mut buf);
        let red = image::RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255]));
        let blue = image::RgbaImage::from_pixel(10, 10, image::Rgba([0, 0, 255, 255]));
        encoder
            .encode_frames(vec![image::Frame::new(red), image::Frame::new(blue)])
            .unwrap();
    }

    let spec = TransformSpec {
        page: 2,
        format: Some(Format::Png),
        ..Default::default()
    };
    let out = Processor::default().process(&buf, &spec, "img/a.gif").unwrap();
    let decoded = image::load_from_memory(&out).unwrap().to_rgba8();
    let p = decoded.get_pixel(5, 5).0;
    assert!(p[2] > p[0], "expected the second (blue) frame, got {:?}", p);
}
