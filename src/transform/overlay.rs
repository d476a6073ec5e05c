use image::{DynamicImage, GenericImageView, RgbaImage};
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::path::Path;
use std::sync::Arc;

use crate::transform::TransformSpec;
use crate::{RelayError, Result};

/// Bundled font directory, resolved relative to the working directory so a
/// deployment ships its own faces instead of depending on the host.
const BUNDLED_FONTS_DIR: &str = "assets/fonts";

// One font database for the process: bundled faces first, so overlay
// rendering resolves the same glyphs on every host, then whatever the
// system provides as a fallback.
static FONTDB: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();

    let bundled = Path::new(BUNDLED_FONTS_DIR);
    if bundled.is_dir() {
        db.load_fonts_dir(bundled);
        // Point the generic families at a bundled face so "sans-serif"
        // resolves deterministically.
        let default_family = db
            .faces()
            .next()
            .and_then(|face| face.families.first().map(|(name, _)| name.clone()));
        if let Some(family) = default_family {
            tracing::debug!(family = %family, "bundled fonts loaded");
            db.set_sans_serif_family(family.clone());
            db.set_serif_family(family);
        }
    }

    db.load_system_fonts();
    if db.len() == 0 {
        tracing::warn!(
            dir = BUNDLED_FONTS_DIR,
            "no fonts available, text overlays will render without glyphs"
        );
    }
    Arc::new(db)
});

/// Composite the watermark at the bottom-right corner with 10px padding,
/// clamped to the top-left for undersized bases. Opacity scales the
/// watermark's alpha band linearly.
pub fn apply_watermark(img: &mut DynamicImage, watermark: &DynamicImage, opacity: f32) {
    let mut wm = watermark.to_rgba8();
    if opacity < 1.0 {
        let opacity = opacity.clamp(0.0, 1.0);
        for pixel in wm.pixels_mut() {
            pixel.0[3] = (pixel.0[3] as f32 * opacity) as u8;
        }
    }

    let (base_w, base_h) = img.dimensions();
    let x = (base_w as i64 - wm.width() as i64 - 10).max(0);
    let y = (base_h as i64 - wm.height() as i64 - 10).max(0);

    let mut base = img.to_rgba8();
    image::imageops::overlay(&mut base, &wm, x, y);
    *img = DynamicImage::ImageRgba8(base);
}

/// Centered text overlay, rendered as an inline SVG and rasterised onto
/// the image. Font names are restricted to `[A-Za-z0-9 _-]`; anything
/// else falls back to sans-serif so attribute injection is impossible.
pub fn draw_text(img: &mut DynamicImage, spec: &TransformSpec) -> Result<()> {
    let (width, height) = img.dimensions();

    let size = if spec.text_size > 0.0 { spec.text_size } else { 24.0 };
    let color = if spec.text_color.is_empty() {
        "red".to_string()
    } else {
        escape_xml(&spec.text_color)
    };
    let opacity = if spec.text_opacity > 0.0 {
        spec.text_opacity.min(1.0)
    } else {
        1.0
    };
    let font = sanitize_font(&spec.font);

    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}"><text x="50%" y="50%" font-family="{font}" font-size="{size}" fill="{color}" text-anchor="middle" dominant-baseline="middle" opacity="{opacity}">{text}</text></svg>"#,
        text = escape_xml(&spec.text),
    );

    let mut options = usvg::Options::default();
    options.fontdb = FONTDB.clone();
    let tree = usvg::Tree::from_str(&svg, &options)
        .map_err(|e| RelayError::Transform(format!("text overlay svg: {}", e)))?;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| RelayError::Transform("text overlay canvas allocation".into()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    let mut text_layer = RgbaImage::new(width, height);
    for (i, pixel) in pixmap.pixels().iter().enumerate() {
        let demul = pixel.demultiply();
        let x = (i as u32) % width;
        let y = (i as u32) / width;
        text_layer.put_pixel(
            x,
            y,
            image::Rgba([demul.red(), demul.green(), demul.blue(), demul.alpha()]),
        );
    }

    let mut base = img.to_rgba8();
    image::imageops::overlay(&mut base, &text_layer, 0, 0);
    *img = DynamicImage::ImageRgba8(base);
    Ok(())
}

fn sanitize_font(font: &str) -> &str {
    if font.is_empty() {
        return "sans-serif";
    }
    let safe = font
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_');
    if safe {
        font
    } else {
        "sans-serif"
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_lands_bottom_right() {
        let mut base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            100,
            image::Rgba([0, 0, 0, 255]),
        ));
        let wm = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            10,
            10,
            image::Rgba([255, 255, 255, 255]),
        ));

        apply_watermark(&mut base, &wm, 1.0);
        let out = base.to_rgba8();
        // Inside the pasted region: (W-ww-10, H-wh-10) = (80, 80).
        assert_eq!(out.get_pixel(85, 85).0, [255, 255, 255, 255]);
        // Outside it.
        assert_eq!(out.get_pixel(50, 50).0, [0, 0, 0, 255]);
    }

    #[test]
    fn watermark_opacity_scales_alpha() {
        let mut base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            100,
            image::Rgba([0, 0, 0, 255]),
        ));
        let wm = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            10,
            10,
            image::Rgba([255, 255, 255, 255]),
        ));

        apply_watermark(&mut base, &wm, 0.5);
        let out = base.to_rgba8();
        let p = out.get_pixel(85, 85).0;
        // Half-opaque white over black blends towards mid-grey.
        assert!(p[0] > 100 && p[0] < 150);
    }

    #[test]
    fn unsafe_font_names_fall_back() {
        assert_eq!(sanitize_font("DejaVu Sans"), "DejaVu Sans");
        assert_eq!(sanitize_font("Ev<il>"), "sans-serif");
        assert_eq!(sanitize_font(""), "sans-serif");
    }

    #[test]
    fn draw_text_renders_without_error() {
        let mut img = DynamicImage::new_rgb8(120, 60);
        let spec = TransformSpec {
            text: "hello & <world>".to_string(),
            ..Default::default()
        };
        draw_text(&mut img, &spec).unwrap();
        assert_eq!(img.dimensions(), (120, 60));
    }
}
