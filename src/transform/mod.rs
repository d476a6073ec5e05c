pub mod overlay;
pub mod palette;
pub mod smartcrop;
pub mod video;

use image::codecs::avif::AvifEncoder;
use image::codecs::gif::{GifDecoder, GifEncoder};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{
    AnimationDecoder, DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder,
};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::{metrics, RelayError, Result};

/// Supported output codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
    Jxl,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Webp => "webp",
            Format::Avif => "avif",
            Format::Jxl => "jxl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Format::Jpeg),
            "png" => Some(Format::Png),
            "gif" => Some(Format::Gif),
            "webp" => Some(Format::Webp),
            "avif" => Some(Format::Avif),
            "jxl" => Some(Format::Jxl),
            _ => None,
        }
    }

    /// Output format inferred from an object key's extension when the
    /// request did not force one. Unknown extensions encode as JPEG.
    pub fn from_key(object_key: &str) -> Self {
        let ext = object_key.rsplit('.').next().unwrap_or("");
        Format::parse(ext).unwrap_or(Format::Jpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Cover,
    Contain,
    Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    Smart,
    Face,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    Grayscale,
    Sepia,
    #[default]
    None,
}

/// Parsed transform request. Zero width/height means "unconstrained,
/// preserve aspect"; `fit == None` means the default independent-axis
/// stretch; `page == 0` means unset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformSpec {
    pub width: u32,
    pub height: u32,
    pub fit: Option<Fit>,
    pub focus: Focus,
    pub format: Option<Format>,
    pub quality: u8,
    pub text: String,
    pub text_color: String,
    pub text_size: f32,
    pub text_opacity: f32,
    pub font: String,
    pub effect: Effect,
    pub brightness: f32,
    pub contrast: f32,
    pub blurhash: bool,
    pub palette: bool,
    pub animated: bool,
    pub page: u32,
}

impl TransformSpec {
    /// Parse query parameters into a spec. When `preset` names a configured
    /// preset, the preset's query fragment becomes the sole source of
    /// transform parameters: caller-supplied options are discarded.
    pub fn from_params(
        params: &BTreeMap<String, String>,
        presets: &HashMap<String, String>,
    ) -> Self {
        if let Some(name) = params.get("preset") {
            if let Some(fragment) = presets.get(name) {
                if let Ok(preset_params) =
                    serde_urlencoded::from_str::<BTreeMap<String, String>>(fragment)
                {
                    return Self::from_params(&preset_params, &HashMap::new());
                }
            }
        }

        let get = |k: &str| params.get(k).map(String::as_str).unwrap_or("");
        let flag = |k: &str| matches!(get(k), "true" | "1");

        let mut spec = TransformSpec {
            width: get("w").parse().or_else(|_| get("width").parse()).unwrap_or(0),
            height: get("h").parse().or_else(|_| get("height").parse()).unwrap_or(0),
            fit: match get("fit") {
                "cover" => Some(Fit::Cover),
                "contain" => Some(Fit::Contain),
                "fill" => Some(Fit::Fill),
                _ => None,
            },
            focus: match get("focus") {
                "smart" => Focus::Smart,
                "face" => Focus::Face,
                _ => Focus::None,
            },
            format: Format::parse(get("format")),
            quality: get("q").parse().or_else(|_| get("quality").parse()).unwrap_or(0),
            text: get("text").to_string(),
            text_color: if params.contains_key("textColor") {
                get("textColor").to_string()
            } else {
                get("color").to_string()
            },
            text_size: get("textSize").parse().unwrap_or(0.0),
            text_opacity: get("textOpacity").parse().unwrap_or(0.0),
            font: get("font").to_string(),
            effect: match get("effect") {
                "grayscale" => Effect::Grayscale,
                "sepia" => Effect::Sepia,
                _ => Effect::None,
            },
            brightness: get("brightness").parse().unwrap_or(0.0),
            contrast: get("contrast").parse().unwrap_or(0.0),
            blurhash: flag("blurhash"),
            palette: flag("palette"),
            animated: flag("animated"),
            page: get("page").parse().unwrap_or(0),
        };
        if spec.quality > 100 {
            spec.quality = 100;
        }
        spec
    }

    /// Whether this spec asks for any processing of an image input.
    pub fn wants_processing(&self) -> bool {
        self.width > 0
            || self.height > 0
            || self.fit.is_some()
            || self.format.is_some()
            || self.blurhash
    }

    pub fn format_str(&self) -> &'static str {
        self.format.map(|f| f.as_str()).unwrap_or("")
    }
}

/// Extensions the image pipeline can decode.
pub fn is_image_key(object_key: &str) -> bool {
    let ext = object_key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp")
}

/// Extensions handled by the video frame-extraction path.
pub fn is_video_key(object_key: &str) -> bool {
    let ext = object_key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    matches!(ext.as_str(), "mp4" | "mov" | "webm")
}

/// Output format negotiated from an `Accept` header: AVIF wins over WebP.
pub fn negotiate_format(accept: &str) -> Option<Format> {
    if accept.contains("image/avif") {
        Some(Format::Avif)
    } else if accept.contains("image/webp") {
        Some(Format::Webp)
    } else {
        None
    }
}

/// Shared, immutable inputs of the image pipeline: the watermark snapshot,
/// detector configuration and encoder policy for this request.
#[derive(Clone, Default)]
pub struct Processor {
    pub watermark: Option<(Arc<DynamicImage>, f32)>,
    pub face_cascade: Option<PathBuf>,
    pub ai_model: Option<smartcrop::AiModelConfig>,
    pub smart_compression: bool,
}

impl Processor {
    /// Run the fixed transform pipeline: decode, geometry, effects,
    /// watermark, text overlay, encode. CPU-bound; callers run it on a
    /// blocking thread. Pure given (input bytes, spec, watermark bytes).
    pub fn process(&self, data: &[u8], spec: &TransformSpec, object_key: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.process_inner(data, spec, object_key);
        metrics::TRANSFORM_DURATION.observe(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::TRANSFORM_ERRORS_TOTAL.inc();
        }
        result
    }

    fn process_inner(
        &self,
        data: &[u8],
        spec: &TransformSpec,
        object_key: &str,
    ) -> Result<Vec<u8>> {
        let mut img = decode(data, spec.page)?;

        if spec.width > 0 || spec.height > 0 {
            img = apply_geometry(img, spec, self)?;
        }

        img = apply_effects(img, spec);

        // Blurhash is computed on the geometry/effects result, before any
        // watermark or text would pollute the hash. The source's embedded
        // profile drives the forced-sRGB read.
        if spec.blurhash {
            let icc = palette::embedded_icc(data);
            return palette::blurhash_string(&img, icc.as_deref()).map(String::into_bytes);
        }

        if let Some((wm, opacity)) = &self.watermark {
            overlay::apply_watermark(&mut img, wm, *opacity);
        }

        if !spec.text.is_empty() {
            overlay::draw_text(&mut img, spec)?;
        }

        let format = spec.format.unwrap_or_else(|| Format::from_key(object_key));
        let quality = if spec.quality == 0 { 80 } else { spec.quality };
        encode_image(&img, format, quality, self.smart_compression)
    }
}

/// Decode from a full buffer. Buffering is required because format
/// detection and page selection both need the whole container. `page`
/// (1-indexed) selects a frame of an animated GIF.
pub fn decode(data: &[u8], page: u32) -> Result<DynamicImage> {
    let format = image::guess_format(data)
        .map_err(|e| RelayError::Transform(format!("format detection: {}", e)))?;

    if format == image::ImageFormat::Gif && page > 0 {
        let decoder = GifDecoder::new(Cursor::new(data))
            .map_err(|e| RelayError::Transform(format!("gif decode: {}", e)))?;
        let frame = decoder
            .into_frames()
            .nth(page as usize - 1)
            .transpose()
            .map_err(|e| RelayError::Transform(format!("gif frame decode: {}", e)))?;
        if let Some(frame) = frame {
            return Ok(DynamicImage::ImageRgba8(frame.into_buffer()));
        }
        // Page beyond the last frame falls back to the first.
    }

    image::load_from_memory_with_format(data, format)
        .map_err(|e| RelayError::Transform(format!("decode: {}", e)))
}

fn apply_geometry(img: DynamicImage, spec: &TransformSpec, proc: &Processor) -> Result<DynamicImage> {
    let (w, h) = (spec.width, spec.height);

    // With one axis unconstrained every fit degenerates to an
    // aspect-preserving resize.
    if w == 0 || h == 0 {
        return Ok(resize_aspect(img, w, h));
    }

    match spec.fit.unwrap_or(Fit::Fill) {
        Fit::Cover => match spec.focus {
            Focus::Smart => smartcrop::smart_crop(img, w, h, proc.ai_model.as_ref()),
            Focus::Face => smartcrop::face_crop(img, w, h, proc.face_cascade.as_deref()),
            Focus::None => Ok(img.resize_to_fill(w, h, FilterType::Lanczos3)),
        },
        Fit::Contain => Ok(img.resize(w, h, FilterType::Lanczos3)),
        Fit::Fill => Ok(img.resize_exact(w, h, FilterType::Lanczos3)),
    }
}

/// Aspect-preserving resize with at most one constrained axis.
fn resize_aspect(img: DynamicImage, w: u32, h: u32) -> DynamicImage {
    if w == 0 && h == 0 {
        return img;
    }
    let (orig_w, orig_h) = img.dimensions();
    let target_w = if w > 0 {
        w
    } else {
        ((orig_w as f32) * (h as f32 / orig_h as f32)).round() as u32
    };
    let target_h = if h > 0 {
        h
    } else {
        ((orig_h as f32) * (w as f32 / orig_w as f32)).round() as u32
    };
    img.resize_exact(target_w.max(1), target_h.max(1), FilterType::Lanczos3)
}

/// Sepia coefficients, row-major over (R, G, B).
const SEPIA: [[f32; 3]; 3] = [
    [0.3588, 0.7044, 0.1368],
    [0.2990, 0.5870, 0.1140],
    [0.2392, 0.4696, 0.0912],
];

fn apply_effects(img: DynamicImage, spec: &TransformSpec) -> DynamicImage {
    let mut img = match spec.effect {
        Effect::Grayscale => img.grayscale(),
        Effect::Sepia => sepia(img),
        Effect::None => img,
    };

    if spec.brightness != 0.0 {
        img = linear_rgb(img, 1.0, spec.brightness);
    }

    if spec.contrast != 0.0 && spec.contrast != 1.0 {
        let c = spec.contrast;
        // Multiplicative around mid-grey: v' = (v - 128)·c + 128.
        img = linear_rgb(img, c, 128.0 * (1.0 - c));
    }

    img
}

fn sepia(img: DynamicImage) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        pixel.0 = [
            (SEPIA[0][0] * rf + SEPIA[0][1] * gf + SEPIA[0][2] * bf).min(255.0) as u8,
            (SEPIA[1][0] * rf + SEPIA[1][1] * gf + SEPIA[1][2] * bf).min(255.0) as u8,
            (SEPIA[2][0] * rf + SEPIA[2][1] * gf + SEPIA[2][2] * bf).min(255.0) as u8,
            a,
        ];
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Per-channel linear adjustment `v' = v·a + b` on RGB, alpha untouched.
fn linear_rgb(img: DynamicImage, a: f32, b: f32) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        for channel in 0..3 {
            let v = pixel.0[channel] as f32 * a + b;
            pixel.0[channel] = v.clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Encode with quality routing per codec. Metadata is never carried over.
/// Smart compression trades encode time for maximum-effort settings.
pub fn encode_image(img: &DynamicImage, format: Format, quality: u8, smart: bool) -> Result<Vec<u8>> {
    let quality = quality.clamp(1, 100);
    let mut out = Vec::new();

    match format {
        Format::Jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, quality);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| RelayError::Transform(format!("jpeg encode: {}", e)))?;
        }
        Format::Png => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let compression = if smart {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let enc = PngEncoder::new_with_quality(&mut out, compression, PngFilterType::Adaptive);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| RelayError::Transform(format!("png encode: {}", e)))?;
        }
        Format::Gif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let mut enc = GifEncoder::new(&mut out);
            enc.encode(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| RelayError::Transform(format!("gif encode: {}", e)))?;
        }
        Format::Webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoder = webp::Encoder::from_rgb(rgb.as_raw(), w, h);
            out.extend_from_slice(&encoder.encode(quality as f32));
        }
        Format::Avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encode time and density; smart mode pays
            // for the denser output.
            let speed = if smart { 1 } else { 4 };
            let enc = AvifEncoder::new_with_speed_quality(&mut out, speed, quality);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| RelayError::Transform(format!("avif encode: {}", e)))?;
        }
        Format::Jxl => {
            #[cfg(feature = "jxl")]
            {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                let mut encoder = jpegxl_rs::encoder_builder()
                    .quality(quality as f32 / 100.0 * 15.0)
                    .build()
                    .map_err(|e| RelayError::Transform(format!("jxl encoder: {}", e)))?;
                let encoded: jpegxl_rs::encode::EncoderResult<u8> = encoder
                    .encode(rgb.as_raw(), w, h)
                    .map_err(|e| RelayError::Transform(format!("jxl encode: {}", e)))?;
                out.extend_from_slice(&encoded);
            }
            #[cfg(not(feature = "jxl"))]
            {
                return Err(RelayError::Transform(
                    "jxl output requires the jxl build feature".into(),
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn spec_parses_core_options() {
        let p = params(&[
            ("w", "200"),
            ("h", "100"),
            ("fit", "cover"),
            ("focus", "face"),
            ("format", "webp"),
            ("q", "90"),
            ("effect", "sepia"),
            ("blurhash", "1"),
            ("page", "3"),
        ]);
        let spec = TransformSpec::from_params(&p, &HashMap::new());
        assert_eq!(spec.width, 200);
        assert_eq!(spec.height, 100);
        assert_eq!(spec.fit, Some(Fit::Cover));
        assert_eq!(spec.focus, Focus::Face);
        assert_eq!(spec.format, Some(Format::Webp));
        assert_eq!(spec.quality, 90);
        assert_eq!(spec.effect, Effect::Sepia);
        assert!(spec.blurhash);
        assert_eq!(spec.page, 3);
        assert!(spec.wants_processing());
    }

    #[test]
    fn preset_replaces_all_caller_params() {
        let mut presets = HashMap::new();
        presets.insert("thumb".to_string(), "w=64&h=64&fit=cover".to_string());

        let p = params(&[("preset", "thumb"), ("w", "4000"), ("format", "png")]);
        let spec = TransformSpec::from_params(&p, &presets);
        assert_eq!(spec.width, 64);
        assert_eq!(spec.height, 64);
        assert_eq!(spec.fit, Some(Fit::Cover));
        // Caller-supplied format is discarded.
        assert_eq!(spec.format, None);
    }

    #[test]
    fn bare_params_do_not_process() {
        let spec = TransformSpec::from_params(&params(&[]), &HashMap::new());
        assert!(!spec.wants_processing());
    }

    #[test]
    fn negotiation_prefers_avif() {
        assert_eq!(negotiate_format("image/avif,image/webp,*/*"), Some(Format::Avif));
        assert_eq!(negotiate_format("image/webp,*/*"), Some(Format::Webp));
        assert_eq!(negotiate_format("*/*"), None);
    }

    #[test]
    fn key_classification() {
        assert!(is_image_key("img/a.JPG"));
        assert!(is_image_key("a.webp"));
        assert!(!is_image_key("doc/report.pdf"));
        assert!(is_video_key("clips/a.mp4"));
        assert!(!is_video_key("a.png"));
    }

    #[test]
    fn contain_fits_inside_box() {
        let img = DynamicImage::new_rgb8(200, 400);
        let spec = TransformSpec {
            width: 100,
            height: 100,
            fit: Some(Fit::Contain),
            ..Default::default()
        };
        let out = apply_geometry(img, &spec, &Processor::default()).unwrap();
        assert_eq!(out.dimensions(), (50, 100));
    }

    #[test]
    fn fill_stretches_both_axes() {
        let img = DynamicImage::new_rgb8(200, 400);
        let spec = TransformSpec {
            width: 100,
            height: 100,
            fit: Some(Fit::Fill),
            ..Default::default()
        };
        let out = apply_geometry(img, &spec, &Processor::default()).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn cover_fills_both_axes() {
        let img = DynamicImage::new_rgb8(200, 400);
        let spec = TransformSpec {
            width: 100,
            height: 100,
            fit: Some(Fit::Cover),
            ..Default::default()
        };
        let out = apply_geometry(img, &spec, &Processor::default()).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn zero_height_preserves_aspect() {
        let img = DynamicImage::new_rgb8(200, 400);
        let spec = TransformSpec {
            width: 100,
            ..Default::default()
        };
        let out = apply_geometry(img, &spec, &Processor::default()).unwrap();
        assert_eq!(out.dimensions(), (100, 200));
    }

    #[test]
    fn decode_encode_roundtrip_keeps_dimensions() {
        let img = DynamicImage::new_rgb8(64, 48);
        let jpeg = encode_image(&img, Format::Jpeg, 80, false).unwrap();
        let back = decode(&jpeg, 0).unwrap();
        assert_eq!(back.dimensions(), (64, 48));
    }

    #[test]
    fn contrast_pivots_at_mid_grey() {
        let mut rgb = image::RgbaImage::new(1, 1);
        rgb.put_pixel(0, 0, image::Rgba([200, 64, 128, 255]));
        let spec = TransformSpec {
            contrast: 2.0,
            ..Default::default()
        };
        let out = apply_effects(DynamicImage::ImageRgba8(rgb), &spec).to_rgba8();
        let p = out.get_pixel(0, 0).0;
        assert_eq!(p[0], 255); // (200-128)*2 + 128 = 272, clamped
        assert_eq!(p[1], 0); // (64-128)*2 + 128 = 0
        assert_eq!(p[2], 128); // pivot unchanged
    }

    #[test]
    fn grayscale_flattens_channels() {
        let mut rgb = image::RgbaImage::new(1, 1);
        rgb.put_pixel(0, 0, image::Rgba([10, 200, 30, 255]));
        let spec = TransformSpec {
            effect: Effect::Grayscale,
            ..Default::default()
        };
        let out = apply_effects(DynamicImage::ImageRgba8(rgb), &spec).to_rgba8();
        let p = out.get_pixel(0, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn jxl_without_feature_is_a_typed_error() {
        #[cfg(not(feature = "jxl"))]
        {
            let img = DynamicImage::new_rgb8(4, 4);
            assert!(matches!(
                encode_image(&img, Format::Jxl, 80, false),
                Err(RelayError::Transform(_))
            ));
        }
    }
}
