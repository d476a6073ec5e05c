use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::ConfigHandle;

/// Periodic disk-cache garbage collector. Removes entries older than the
/// hard TTL, then prunes empty shard subdirectories, deepest first.
/// Runs until the process exits; each tick reads a fresh config snapshot
/// so a SIGHUP reload adjusts the interval and TTL.
pub async fn run(config: Arc<ConfigHandle>) {
    loop {
        let cfg = config.snapshot();
        tokio::time::sleep(cfg.cleanup_interval).await;

        let dir = cfg.cache_dir.clone();
        let hard_ttl = cfg.hard_ttl;
        let result = tokio::task::spawn_blocking(move || sweep(&dir, hard_ttl)).await;

        match result {
            Ok((files, dirs)) if files > 0 || dirs > 0 => {
                tracing::debug!(removed_files = files, removed_dirs = dirs, "cache cleanup finished");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "cache cleanup task panicked"),
        }
    }
}

/// One cleanup pass. Returns (files removed, directories removed).
pub fn sweep(dir: &Path, hard_ttl: Duration) -> (usize, usize) {
    let mut removed_files = 0;
    let mut dirs = Vec::new();
    let now = SystemTime::now();

    walk(dir, &mut |path, is_dir| {
        if is_dir {
            if path != dir {
                dirs.push(path.to_path_buf());
            }
            return;
        }
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());
        if let Some(age) = age {
            if age > hard_ttl && std::fs::remove_file(path).is_ok() {
                removed_files += 1;
            }
        }
    });

    // Deepest directories first so emptied parents can be removed too.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    let removed_dirs = dirs
        .iter()
        .filter(|d| std::fs::remove_dir(d).is_ok())
        .count();

    (removed_files, removed_dirs)
}

fn walk(dir: &Path, visit: &mut impl FnMut(&Path, bool)) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, visit);
            visit(&path, true);
        } else {
            visit(&path, false);
        }
    }
}
