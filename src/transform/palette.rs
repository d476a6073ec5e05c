use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder};
use std::collections::HashMap;
use std::io::Cursor;

use crate::{RelayError, Result};

/// Dominant-colour extraction: downsample to 100×100, force sRGB, bucket
/// exact 24-bit colours, return the top five as `#rrggbb`, most frequent
/// first. Ties break on the hex string so the output is deterministic.
pub fn extract_palette(data: &[u8]) -> Result<Vec<String>> {
    let img = image::load_from_memory(data)
        .map_err(|e| RelayError::Transform(format!("palette decode: {}", e)))?;
    let icc = embedded_icc(data);
    Ok(dominant_colors(&img, icc.as_deref()))
}

pub fn dominant_colors(img: &DynamicImage, icc: Option<&[u8]>) -> Vec<String> {
    let thumb = img.resize_exact(100, 100, FilterType::Lanczos3);
    let thumb = force_srgb(thumb, icc).to_rgb8();

    let mut counts: HashMap<[u8; 3], u32> = HashMap::new();
    for pixel in thumb.pixels() {
        *counts.entry(pixel.0).or_insert(0) += 1;
    }

    let mut frequencies: Vec<([u8; 3], u32)> = counts.into_iter().collect();
    frequencies.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    frequencies
        .into_iter()
        .take(5)
        .map(|(rgb, _)| format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]))
        .collect()
}

/// Blurhash of the pipeline result: a forced 32×32 sRGB thumbnail encoded
/// with (4, 3) components. The output is the ASCII hash, not an image.
pub fn blurhash_string(img: &DynamicImage, icc: Option<&[u8]>) -> Result<String> {
    let thumb = img.resize_exact(32, 32, FilterType::Lanczos3);
    let rgba = force_srgb(thumb, icc).to_rgba8();
    blurhash::encode(4, 3, 32, 32, rgba.as_raw())
        .map_err(|e| RelayError::Transform(format!("blurhash encode: {}", e)))
}

/// ICC profile embedded in an encoded image, when the container carries one.
pub fn embedded_icc(data: &[u8]) -> Option<Vec<u8>> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    let mut decoder = reader.into_decoder().ok()?;
    decoder.icc_profile().ok().flatten()
}

/// Convert pixel data to sRGB using the source's embedded profile. Inputs
/// without a profile, or with one qcms cannot parse, are treated as
/// already-sRGB.
pub fn force_srgb(img: DynamicImage, icc: Option<&[u8]>) -> DynamicImage {
    let Some(profile_bytes) = icc else {
        return img;
    };
    let Some(input) = qcms::Profile::new_from_slice(profile_bytes, false) else {
        tracing::debug!("unparseable icc profile, assuming srgb");
        return img;
    };
    let output = qcms::Profile::new_sRGB();
    let Some(transform) = qcms::Transform::new(
        &input,
        &output,
        qcms::DataType::RGBA8,
        qcms::Intent::Perceptual,
    ) else {
        tracing::debug!("icc transform unavailable, assuming srgb");
        return img;
    };

    let mut rgba = img.to_rgba8();
    transform.apply(&mut rgba);
    DynamicImage::ImageRgba8(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn solid_image_has_single_dominant_color() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 0, 0])));
        let colors = dominant_colors(&img, None);
        assert_eq!(colors[0], "#ff0000");
        assert!(colors.len() <= 5);
    }

    #[test]
    fn split_image_ranks_by_frequency() {
        // Left three quarters red, right quarter blue.
        let mut img = RgbImage::new(100, 100);
        for y in 0..100 {
            for x in 0..100 {
                let color = if x < 75 { Rgb([200, 0, 0]) } else { Rgb([0, 0, 200]) };
                img.put_pixel(x, y, color);
            }
        }
        let colors = dominant_colors(&DynamicImage::ImageRgb8(img), None);
        assert_eq!(colors[0], "#c80000");
        assert!(colors.contains(&"#0000c8".to_string()));
    }

    #[test]
    fn blurhash_matches_prescaled_input() {
        let mut img = RgbImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                img.put_pixel(x, y, Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
            }
        }
        let img = DynamicImage::ImageRgb8(img);

        let direct = blurhash_string(&img, None).unwrap();
        let prescaled =
            blurhash_string(&img.resize_exact(32, 32, FilterType::Lanczos3), None).unwrap();
        assert_eq!(direct, prescaled);
        assert!(!direct.is_empty());
    }

    #[test]
    fn profile_less_input_passes_through_unchanged() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])));
        let out = force_srgb(img.clone(), None);
        assert_eq!(out.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn garbage_profile_is_ignored() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])));
        let out = force_srgb(img, Some(b"not an icc profile"));
        assert_eq!(out.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn profile_less_source_has_no_embedded_icc() {
        let mut png = Vec::new();
        DynamicImage::new_rgb8(8, 8)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert!(embedded_icc(&png).is_none());
    }
}
