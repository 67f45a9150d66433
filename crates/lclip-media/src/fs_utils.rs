//! Promotion of rendered files to their final location.
//!
//! Outputs are rendered next to the job's intermediates and only moved into
//! place once complete, so a failed render never exists at a final path.
//! Work and output directories may live on different filesystems.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const CROSS_DEVICE_LINK: i32 = 18;

/// Sibling path a render writes to before promotion.
pub fn partial_path(work_dir: &Path, final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    work_dir.join(format!("{}.partial", name))
}

/// Move `src` onto `dst`, replacing any previous file there.
///
/// Falls back to copy-then-rename when the paths are on different devices;
/// the copy lands in a temporary sibling of `dst` first so `dst` only ever
/// holds a complete file.
pub async fn promote(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_then_rename(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

async fn copy_then_rename(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("incoming");

    if let Err(e) = fs::copy(src, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    fs::remove_file(src).await?;
    Ok(())
}
