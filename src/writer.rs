use async_compression::tokio::write::{BrotliEncoder, GzipEncoder};
use async_compression::Level;
use filetime::FileTime;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::keys::Encoding;
use crate::{RelayError, Result};

/// Commit a payload to its destination via write-then-rename.
///
/// The temporary file is created in the destination's own directory:
/// cross-filesystem rename is not atomic, so same-directory placement is
/// mandatory. Bytes stream through the selected compressor (brotli at best
/// level, gzip at default level, or passthrough). On any failure, including
/// cancellation, dropping the temp path removes the partial file, so a
/// reader never observes a half-written destination.
pub async fn commit<R>(dest: &Path, reader: &mut R, encoding: Encoding) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let dir = dest
        .parent()
        .ok_or_else(|| RelayError::Dependency("destination has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RelayError::Dependency(format!("create cache dir: {}", e)))?;

    let tmp = tempfile::Builder::new()
        .prefix("imgrelay_tmp_")
        .tempfile_in(dir)
        .map_err(|e| RelayError::Dependency(format!("create temp file: {}", e)))?;
    let (file, tmp_path) = tmp.into_parts();
    let file = tokio::fs::File::from_std(file);

    let write_result = match encoding {
        Encoding::Brotli => {
            let mut enc = BrotliEncoder::with_quality(file, Level::Best);
            match tokio::io::copy(reader, &mut enc).await {
                Ok(_) => enc.shutdown().await,
                Err(e) => Err(e),
            }
        }
        Encoding::Gzip => {
            let mut enc = GzipEncoder::new(file);
            match tokio::io::copy(reader, &mut enc).await {
                Ok(_) => enc.shutdown().await,
                Err(e) => Err(e),
            }
        }
        Encoding::Identity => {
            let mut file = file;
            match tokio::io::copy(reader, &mut file).await {
                Ok(_) => file.shutdown().await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = write_result {
        // tmp_path drop removes the partial file
        return Err(RelayError::Dependency(format!("write temp file: {}", e)));
    }

    if tokio::fs::metadata(dest).await.is_ok() {
        let _ = tokio::fs::remove_file(dest).await;
    }

    tmp_path
        .persist(dest)
        .map_err(|e| RelayError::Dependency(format!("rename into place: {}", e)))?;

    touch(dest);
    Ok(())
}

/// Reset a file's atime/mtime to now. Serving refreshes the timestamp so
/// the hard-TTL cleaner measures idle age rather than write age.
pub fn touch(path: &Path) {
    let now = FileTime::now();
    if let Err(e) = filetime::set_file_times(path, now, now) {
        tracing::debug!(path = %path.display(), error = %e, "failed to touch cache entry");
    }
}
