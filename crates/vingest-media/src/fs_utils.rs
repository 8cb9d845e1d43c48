//! Local file helpers for materialising sources and cleaning up.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Concatenate `parts` byte-for-byte into `dst`, in the given order.
///
/// Returns the total number of bytes written.
pub async fn concat_files(parts: &[PathBuf], dst: impl AsRef<Path>) -> MediaResult<u64> {
    let dst = dst.as_ref();
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut out = fs::File::create(dst).await?;
    let mut total = 0u64;
    for part in parts {
        let mut input = fs::File::open(part)
            .await
            .map_err(|_| MediaError::FileNotFound(part.clone()))?;
        total += tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;

    debug!("Concatenated {} parts into {} ({} bytes)", parts.len(), dst.display(), total);
    Ok(total)
}

/// Size of a file in bytes.
pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))
}

/// Remove a directory tree, logging instead of failing.
pub async fn remove_dir_quietly(dir: impl AsRef<Path>) {
    let dir = dir.as_ref();
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concat_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut parts = Vec::new();
        for (i, chunk) in [b"aa".as_slice(), b"bbb", b"c"].iter().enumerate() {
            let p = dir.path().join(format!("part{}", i));
            tokio::fs::write(&p, chunk).await.unwrap();
            parts.push(p);
        }
        let dst = dir.path().join("out/joined.bin");
        assert_eq!(concat_files(&parts, &dst).await.unwrap(), 6);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"aabbbc");
    }

    #[tokio::test]
    async fn test_concat_missing_part() {
        let dir = tempfile::tempdir().unwrap();
        let result = concat_files(&[dir.path().join("nope")], dir.path().join("out")).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_dir_quietly_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        tokio::fs::create_dir_all(work.join("nested")).await.unwrap();
        tokio::fs::write(work.join("nested/f"), b"x").await.unwrap();
        remove_dir_quietly(&work).await;
        assert!(!work.exists());
        remove_dir_quietly(&work).await;
    }
}
