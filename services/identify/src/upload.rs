//! Ephemeral spool for decoded uploads.
//!
//! Every accepted image is written to `<temp_dir>/<uuid>.<ext>` for the
//! lifetime of one request. [`TempImage::remove`] is the normal exit; the
//! `Drop` impl only catches paths where the request future was dropped.

use crate::error::{ServiceError, ServiceResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MISSING_FIELDS: &str = "Missing required fields: mimeType, imageData";

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

/// Validate the upload fields without touching anything external
pub fn validate_upload(mime_type: &str, image_data: &str) -> ServiceResult<ImageFormat> {
    if mime_type.trim().is_empty() || image_data.trim().is_empty() {
        return Err(ServiceError::invalid(MISSING_FIELDS));
    }

    ImageFormat::from_mime_type(mime_type.trim()).ok_or_else(|| {
        ServiceError::invalid(format!("Unsupported mimeType: {}", mime_type))
    })
}

/// Decode base64 image data, tolerating a `data:<mime>;base64,` prefix
pub fn decode_image_data(image_data: &str) -> ServiceResult<Bytes> {
    let payload = match image_data.find("base64,") {
        Some(idx) if image_data.starts_with("data:") => &image_data[idx + "base64,".len()..],
        _ => image_data,
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ServiceError::invalid(format!("Malformed imageData: {}", e)))?;

    if bytes.is_empty() {
        return Err(ServiceError::invalid(MISSING_FIELDS));
    }

    Ok(Bytes::from(bytes))
}

/// A decoded upload spooled to local disk
#[derive(Debug)]
pub struct TempImage {
    path: PathBuf,
    filename: String,
    format: ImageFormat,
    data: Bytes,
    removed: bool,
}

impl TempImage {
    /// Write decoded bytes to a freshly named file under `dir`
    pub async fn spool(dir: &Path, format: ImageFormat, data: Bytes) -> anyhow::Result<Self> {
        use anyhow::Context;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

        let filename = format!("{}.{}", Uuid::new_v4(), format.extension());
        let path = dir.join(&filename);

        // Constructed before the write so a partial file is removed on drop
        let image = Self {
            path,
            filename,
            format,
            data,
            removed: false,
        };

        tokio::fs::write(&image.path, &image.data)
            .await
            .context("Failed to write upload to disk")?;

        info!(path = %image.path.display(), size_bytes = image.data.len(), "Upload spooled");

        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generated `<uuid>.<ext>` name, reused for the stored object
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Decoded bytes, cheap to clone
    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    /// Remove the spooled file. Failures are logged, never returned.
    pub async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Temporary upload removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary upload"
            ),
        }
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary upload");
            }
        }
    }
}
