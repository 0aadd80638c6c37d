//! Archive unpacking.
//!
//! Zip decompression is CPU-bound, so it runs on the blocking pool rather
//! than a transfer worker.

use std::path::PathBuf;

use crate::error::{ContentError, Result};

/// Unpack `archive` into `destination`, creating it if needed.
pub async fn unpack_archive(archive: PathBuf, destination: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|err| ContentError::Extraction(format!("unreadable archive: {}", err)))?;
        std::fs::create_dir_all(&destination)?;
        zip.extract(&destination)
            .map_err(|err| ContentError::Extraction(err.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|err| ContentError::Extraction(format!("extraction task failed: {}", err)))?
}

/// Unpack `archive` into `destination` and verify the expected payload file
/// came out of it.
pub async fn unpack_archive_expecting(
    archive: PathBuf,
    destination: PathBuf,
    payload: &str,
) -> Result<PathBuf> {
    unpack_archive(archive, destination.clone()).await?;
    let payload_path = destination.join(payload);
    if !payload_path.is_file() {
        return Err(ContentError::missing_payload(&payload_path));
    }
    Ok(payload_path)
}
