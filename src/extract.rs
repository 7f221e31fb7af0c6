//! Unpacking of downloaded scene bundles.
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::info;

pub const BUNDLE_SUFFIX: &str = ".tar.gz";

/// Unpacks the gzipped tarball `archive` into `dest`, creating it if needed.
pub fn extract_bundle(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Unable to create directory {}", dest.display()))?;
    let file =
        File::open(archive).with_context(|| format!("Unable to open {}", archive.display()))?;
    Archive::new(GzDecoder::new(file))
        .unpack(dest)
        .with_context(|| format!("Unable to extract {}", archive.display()))?;
    Ok(())
}

/// Extracts on the blocking pool and removes the archive afterwards when asked to.
/// The archive is kept whenever extraction fails.
pub async fn extract_and_cleanup(archive: PathBuf, dest: PathBuf, delete_archive: bool) -> Result<()> {
    let src = archive.clone();
    let target = dest.clone();
    tokio::task::spawn_blocking(move || extract_bundle(&src, &target)).await??;
    info!(archive = %archive.display(), dest = %dest.display(), "Extracted");

    if delete_archive {
        tokio::fs::remove_file(&archive).await?;
        info!(archive = %archive.display(), "Deleted archive");
    }
    Ok(())
}
