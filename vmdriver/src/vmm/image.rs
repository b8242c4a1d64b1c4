//! Disk image copy for images that need no format conversion.

use crate::errors::{DriverError, DriverResult};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Copy `source` to `destination` byte for byte, truncating any existing
/// destination. Returns the number of bytes copied.
///
/// The source is opened first, so a missing source never creates or
/// truncates the destination.
pub async fn copy_image(source: &Path, destination: &Path) -> DriverResult<u64> {
    let mut src = File::open(source).await.map_err(|e| {
        DriverError::Storage(format!(
            "Error opening source image {} for copy: {}",
            source.display(),
            e
        ))
    })?;

    let mut dst = File::create(destination).await.map_err(|e| {
        DriverError::Storage(format!(
            "Error creating disk image {}: {}",
            destination.display(),
            e
        ))
    })?;

    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        "Copying disk image"
    );

    let copy_err = |e: std::io::Error| {
        DriverError::Storage(format!(
            "Error copying {} to {}: {}",
            source.display(),
            destination.display(),
            e
        ))
    };
    let bytes = tokio::io::copy(&mut src, &mut dst).await.map_err(copy_err)?;
    dst.flush().await.map_err(copy_err)?;

    tracing::info!(bytes, "Copied disk image");
    Ok(bytes)
}
