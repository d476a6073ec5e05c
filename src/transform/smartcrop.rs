use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};

use crate::Result;

/// Object-detection model configuration for smart cropping.
#[derive(Debug, Clone)]
pub struct AiModelConfig {
    pub path: PathBuf,
    pub input: String,
    pub output: String,
}

/// `fit=cover, focus=smart`: crop to the most interesting region, then
/// resize to the exact target. Tries AI object detection when a model is
/// configured, otherwise an entropy-weighted window.
pub fn smart_crop(
    img: DynamicImage,
    width: u32,
    height: u32,
    ai: Option<&AiModelConfig>,
) -> Result<DynamicImage> {
    if let Some(config) = ai {
        if let Some((x, y, w, h)) = ai::detect(&img, config) {
            let cropped = img.crop_imm(x, y, w.max(1), h.max(1));
            return Ok(cropped.resize_exact(width, height, FilterType::Lanczos3));
        }
    }
    Ok(entropy_crop(img, width, height))
}

/// `fit=cover, focus=face`: largest cascade detection anchors the crop
/// window; no cascade or no face falls back to centre-crop.
pub fn face_crop(
    img: DynamicImage,
    width: u32,
    height: u32,
    cascade: Option<&Path>,
) -> Result<DynamicImage> {
    let Some(path) = cascade.and_then(|p| p.to_str()) else {
        return Ok(img.resize_to_fill(width, height, FilterType::Lanczos3));
    };

    let mut detector = match rustface::create_detector(path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = ?e, "face cascade unavailable, using centre crop");
            return Ok(img.resize_to_fill(width, height, FilterType::Lanczos3));
        }
    };
    detector.set_min_face_size(20);
    detector.set_score_thresh(2.0);
    detector.set_pyramid_scale_factor(0.8);
    detector.set_slide_window_step(4, 4);

    let gray = img.to_luma8();
    let mut frame = rustface::ImageData::new(gray.as_raw(), gray.width(), gray.height());
    let faces = detector.detect(&mut frame);

    let largest = faces
        .iter()
        .max_by_key(|f| f.bbox().width() as u64 * f.bbox().height() as u64);

    let Some(face) = largest else {
        return Ok(img.resize_to_fill(width, height, FilterType::Lanczos3));
    };

    let bbox = face.bbox();
    let center_x = bbox.x() + bbox.width() as i32 / 2;
    let center_y = bbox.y() + bbox.height() as i32 / 2;

    let (src_w, src_h) = img.dimensions();
    let (crop_w, crop_h) = cover_window(src_w, src_h, width, height);
    let (x, y) = clamp_window(center_x, center_y, crop_w, crop_h, src_w, src_h);

    let cropped = img.crop_imm(x, y, crop_w, crop_h);
    Ok(cropped.resize_exact(width, height, FilterType::Lanczos3))
}

/// Largest window inside (src_w, src_h) whose aspect equals target_w/target_h.
fn cover_window(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let target_ratio = target_w as f64 / target_h as f64;
    let src_ratio = src_w as f64 / src_h as f64;

    if src_ratio > target_ratio {
        let h = src_h;
        let w = ((h as f64) * target_ratio).round() as u32;
        (w.clamp(1, src_w), h)
    } else {
        let w = src_w;
        let h = ((w as f64) / target_ratio).round() as u32;
        (w, h.clamp(1, src_h))
    }
}

/// Top-left corner for a window centred on (cx, cy), clamped to bounds.
fn clamp_window(cx: i32, cy: i32, w: u32, h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let x = (cx - w as i32 / 2)
        .clamp(0, (src_w.saturating_sub(w)) as i32);
    let y = (cy - h as i32 / 2)
        .clamp(0, (src_h.saturating_sub(h)) as i32);
    (x as u32, y as u32)
}

/// Slide an aspect-correct window across the free axis and keep the one
/// with the highest luminance entropy.
fn entropy_crop(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let (crop_w, crop_h) = cover_window(src_w, src_h, width, height);

    let gray = img.to_luma8();

    const STEPS: u32 = 16;
    let mut best = (0u32, 0u32);
    let mut best_entropy = f64::MIN;

    let free_x = src_w - crop_w;
    let free_y = src_h - crop_h;

    for step in 0..=STEPS {
        let x = free_x * step / STEPS;
        let y = free_y * step / STEPS;
        let entropy = window_entropy(&gray, x, y, crop_w, crop_h);
        if entropy > best_entropy {
            best_entropy = entropy;
            best = (x, y);
        }
    }

    img.crop_imm(best.0, best.1, crop_w, crop_h)
        .resize_exact(width, height, FilterType::Lanczos3)
}

/// Shannon entropy of a subsampled luminance histogram.
fn window_entropy(gray: &image::GrayImage, x: u32, y: u32, w: u32, h: u32) -> f64 {
    const SAMPLE_STEP: u32 = 4;
    let mut histogram = [0u64; 256];
    let mut total = 0u64;

    let mut yy = y;
    while yy < y + h {
        let mut xx = x;
        while xx < x + w {
            histogram[gray.get_pixel(xx, yy).0[0] as usize] += 1;
            total += 1;
            xx += SAMPLE_STEP;
        }
        yy += SAMPLE_STEP;
    }

    if total == 0 {
        return 0.0;
    }

    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

#[cfg(feature = "ai-detect")]
mod ai {
    use super::AiModelConfig;
    use image::{DynamicImage, GenericImageView};
    use once_cell::sync::OnceCell;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::sync::Mutex;

    const INPUT_SIZE: u32 = 640;
    const CONFIDENCE_THRESHOLD: f32 = 0.4;

    // Process-wide inference session; Detect calls are serialised through
    // the mutex.
    static SESSION: OnceCell<Option<Mutex<Session>>> = OnceCell::new();

    pub fn detect(img: &DynamicImage, config: &AiModelConfig) -> Option<(u32, u32, u32, u32)> {
        let session = SESSION
            .get_or_init(|| match Session::builder()
                .and_then(|b| b.commit_from_file(&config.path))
            {
                Ok(session) => Some(Mutex::new(session)),
                Err(e) => {
                    tracing::warn!(error = %e, "object detection session init failed");
                    None
                }
            })
            .as_ref()?;

        let resized = img.resize_exact(
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        // Planar RRR…GGG…BBB layout normalised to 0..1.
        let pixels = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut tensor_data = vec![0f32; 3 * pixels];
        for (i, pixel) in rgb.pixels().enumerate() {
            tensor_data[i] = pixel.0[0] as f32 / 255.0;
            tensor_data[pixels + i] = pixel.0[1] as f32 / 255.0;
            tensor_data[2 * pixels + i] = pixel.0[2] as f32 / 255.0;
        }

        let input = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            tensor_data,
        ))
        .ok()?;

        let mut session = session.lock().ok()?;
        let outputs = session
            .run(ort::inputs![config.input.as_str() => input].ok()?)
            .ok()?;
        let (shape, data) = outputs
            .get(config.output.as_str())?
            .try_extract_raw_tensor::<f32>()
            .ok()?;

        if shape.len() < 3 {
            return None;
        }
        let channels = shape[1] as usize;
        let anchors = shape[2] as usize;

        // Rows 0..4 are cx, cy, w, h; the rest are class scores.
        let mut best = (0f32, usize::MAX);
        for anchor in 0..anchors {
            let mut class_conf = 0f32;
            for c in 4..channels {
                let v = data[c * anchors + anchor];
                if v > class_conf {
                    class_conf = v;
                }
            }
            if class_conf > best.0 {
                best = (class_conf, anchor);
            }
        }

        if best.0 < CONFIDENCE_THRESHOLD || best.1 == usize::MAX {
            return None;
        }

        let anchor = best.1;
        let cx = data[anchor];
        let cy = data[anchors + anchor];
        let w = data[2 * anchors + anchor];
        let h = data[3 * anchors + anchor];

        let (orig_w, orig_h) = img.dimensions();
        let scale_x = orig_w as f32 / INPUT_SIZE as f32;
        let scale_y = orig_h as f32 / INPUT_SIZE as f32;

        let x = ((cx - w / 2.0) * scale_x).max(0.0) as u32;
        let y = ((cy - h / 2.0) * scale_y).max(0.0) as u32;
        let bw = (w * scale_x) as u32;
        let bh = (h * scale_y) as u32;

        let x = x.min(orig_w.saturating_sub(1));
        let y = y.min(orig_h.saturating_sub(1));
        let bw = bw.min(orig_w - x);
        let bh = bh.min(orig_h - y);

        tracing::info!(confidence = best.0, x, y, w = bw, h = bh, "smart crop found object");
        Some((x, y, bw, bh))
    }
}

#[cfg(not(feature = "ai-detect"))]
mod ai {
    use super::AiModelConfig;
    use image::DynamicImage;

    pub fn detect(_img: &DynamicImage, _config: &AiModelConfig) -> Option<(u32, u32, u32, u32)> {
        None
    }
}
