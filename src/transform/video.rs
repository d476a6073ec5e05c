use std::process::Stdio;
use tokio::process::Command;

use crate::{RelayError, Result};

/// Default seek position for still thumbnails.
pub const DEFAULT_TIMESTAMP: &str = "00:00:01";

/// Clip length for animated thumbnails, in seconds.
pub const ANIMATED_SECONDS: u32 = 3;

const ANIMATED_FPS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedFormat {
    Gif,
    Webp,
}

/// Extract a single frame at `timestamp` as MJPEG on stdout. The input may
/// be a pre-signed URL or a local file path.
pub async fn still_frame(input: &str, timestamp: &str) -> Result<Vec<u8>> {
    let ts = if timestamp.is_empty() {
        DEFAULT_TIMESTAMP
    } else {
        timestamp
    };
    run_ffmpeg(&still_args(input, ts)).await
}

/// Extract the first [`ANIMATED_SECONDS`] as a palette-optimised GIF or
/// lossy WebP at 10 fps, scaled per the requested dimensions.
pub async fn animated(input: &str, width: u32, height: u32, format: AnimatedFormat) -> Result<Vec<u8>> {
    run_ffmpeg(&animated_args(input, width, height, format)).await
}

fn still_args(input: &str, timestamp: &str) -> Vec<String> {
    vec![
        "-ss".into(),
        timestamp.into(),
        "-i".into(),
        input.into(),
        "-vframes".into(),
        "1".into(),
        "-f".into(),
        "image2".into(),
        "-c:v".into(),
        "mjpeg".into(),
        "-".into(),
    ]
}

fn animated_args(input: &str, width: u32, height: u32, format: AnimatedFormat) -> Vec<String> {
    let mut filter = format!("fps={}", ANIMATED_FPS);
    if width > 0 || height > 0 {
        let w = if width > 0 { width as i64 } else { -1 };
        let h = if height > 0 { height as i64 } else { -1 };
        filter.push_str(&format!(",scale={}:{}:flags=lanczos", w, h));
    }

    let mut args: Vec<String> = vec![
        "-i".into(),
        input.into(),
        "-t".into(),
        ANIMATED_SECONDS.to_string(),
    ];

    match format {
        AnimatedFormat::Gif => {
            filter.push_str(",split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse");
            args.extend(["-vf".into(), filter, "-f".into(), "gif".into()]);
        }
        AnimatedFormat::Webp => {
            args.extend([
                "-vf".into(),
                filter,
                "-c:v".into(),
                "libwebp".into(),
                "-lossless".into(),
                "0".into(),
                "-loop".into(),
                "0".into(),
                "-f".into(),
                "webp".into(),
            ]);
        }
    }

    args.push("-".into());
    args
}

async fn run_ffmpeg(args: &[String]) -> Result<Vec<u8>> {
    let output = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the request must take the subprocess down with it.
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RelayError::Dependency(format!("ffmpeg spawn: {}", e)))?;

    if !output.status.success() || output.stdout.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().last().unwrap_or("no output");
        return Err(RelayError::Transform(format!(
            "ffmpeg exited with {}: {}",
            output.status, detail
        )));
    }

    Ok(output.stdout)
}
