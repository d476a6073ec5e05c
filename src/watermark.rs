use image::DynamicImage;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Lazily loaded watermark image, re-read when the source file's mtime
/// advances. Readers share one snapshot; reloads take the write lock.
/// Load failures log and leave requests unwatermarked.
pub struct WatermarkManager {
    path: Option<PathBuf>,
    opacity: f32,
    state: RwLock<Option<(SystemTime, Arc<DynamicImage>)>>,
}

impl WatermarkManager {
    pub fn new(path: Option<PathBuf>, opacity: f32) -> Self {
        Self {
            path,
            opacity,
            state: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Option<(Arc<DynamicImage>, f32)> {
        let path = self.path.as_ref()?;

        let mtime = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "watermark unreadable");
                return None;
            }
        };

        {
            let state = self.state.read().expect("watermark lock poisoned");
            if let Some((cached_at, img)) = state.as_ref() {
                if *cached_at >= mtime {
                    return Some((img.clone(), self.opacity));
                }
            }
        }

        let mut state = self.state.write().expect("watermark lock poisoned");
        if let Some((cached_at, img)) = state.as_ref() {
            if *cached_at >= mtime {
                return Some((img.clone(), self.opacity));
            }
        }

        match image::open(path) {
            Ok(img) => {
                let img = Arc::new(img);
                *state = Some((mtime, img.clone()));
                tracing::debug!(path = %path.display(), "watermark loaded");
                Some((img, self.opacity))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "watermark load failed");
                None
            }
        }
    }
}
