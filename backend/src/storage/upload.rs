use actix_multipart::{Field, Multipart, MultipartError};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::namer::{StagingError, StorageNamer};

pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub generated_name: String,
    pub original_name: String,
    pub storage_path: PathBuf,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No `{0}` file field in request")]
    Missing(&'static str),
    #[error("Malformed multipart body: {0}")]
    Malformed(#[from] MultipartError),
    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Streams the `image` field of `payload` into the staging directory.
///
/// Other fields, and an `image` part sent without a filename, are skipped. Nothing is
/// written to disk when no file part is present.
pub async fn receive_upload(
    mut payload: Multipart,
    namer: &StorageNamer,
) -> Result<UploadedImage, UploadError> {
    while let Some(field) = payload.try_next().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // A part without a filename is a plain form value, not a file.
        let Some(original_name) = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
        else {
            continue;
        };
        let received_at = Utc::now();
        let (generated_name, storage_path) = namer.stage_path(&original_name).await?;

        if let Err(e) = write_field(field, &storage_path).await {
            if let Err(rm_err) = tokio::fs::remove_file(&storage_path).await {
                log::warn!(
                    "Failed to remove partial upload {}: {}",
                    storage_path.display(),
                    rm_err
                );
            }
            return Err(e);
        }

        return Ok(UploadedImage {
            generated_name,
            original_name,
            storage_path: crate::config::absolutize(&storage_path),
            received_at,
        });
    }

    Err(UploadError::Missing(IMAGE_FIELD))
}

async fn write_field(mut field: Field, path: &Path) -> Result<(), UploadError> {
    let write_err = |source| StagingError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).await.map_err(write_err)?;
    while let Some(chunk) = field.try_next().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)?;
    Ok(())
}
