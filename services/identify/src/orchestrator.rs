//! Per-request identification flow.
//!
//! ```text
//!                 ┌──────────────┐
//!  base64 ───────▶│ TempImage    │
//!                 └──────────────┘
//!                   │          │
//!          spawned  ▼          ▼  request task
//!  ┌──────────────────┐   ┌──────────────┐
//!  │ BlobStore put    │   │ Classifier   │
//!  │ RecordStore      │   └──────────────┘
//!  │   create         │          │ awaited first
//!  └──────────────────┘          ▼
//!          │ awaited second ┌──────────────┐
//!          └───────────────▶│ set_result   │
//!                           └──────────────┘
//! ```
//!
//! The classifier outcome decides the response. The storage path always runs
//! to completion, but its failures only cost the history entry.

use crate::auth::OwnerId;
use crate::blob_store::{image_key, BlobStore};
use crate::classification::ClassificationResult;
use crate::classifier::Classifier;
use crate::error::ServiceResult;
use crate::record_store::RecordStore;
use crate::upload::{decode_image_data, validate_upload, ImageFormat, TempImage};
use anyhow::Result;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Coordinates upload, classification and persistence for one request
pub struct Orchestrator {
    classifier: Arc<dyn Classifier>,
    blob_store: Arc<dyn BlobStore>,
    record_store: Arc<dyn RecordStore>,
    upload_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        blob_store: Arc<dyn BlobStore>,
        record_store: Arc<dyn RecordStore>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            classifier,
            blob_store,
            record_store,
            upload_dir: upload_dir.into(),
        }
    }

    /// Classify a base64 image for `owner`, recording it in their history
    #[instrument(skip_all, fields(owner = %owner, mime_type = %mime_type))]
    pub async fn classify(
        &self,
        owner: &OwnerId,
        mime_type: &str,
        image_data: &str,
    ) -> ServiceResult<ClassificationResult> {
        let outcome = self.classify_upload(owner, mime_type, image_data).await;

        metrics::counter!(
            "identify.requests",
            "outcome" => if outcome.is_ok() { "success" } else { "failure" }
        )
        .increment(1);

        outcome
    }

    async fn classify_upload(
        &self,
        owner: &OwnerId,
        mime_type: &str,
        image_data: &str,
    ) -> ServiceResult<ClassificationResult> {
        let format = validate_upload(mime_type, image_data)?;
        let data = decode_image_data(image_data)?;
        let image = TempImage::spool(&self.upload_dir, format, data).await?;

        let outcome = self.classify_spooled(owner, &image).await;

        image.remove().await;

        outcome
    }

    async fn classify_spooled(
        &self,
        owner: &OwnerId,
        image: &TempImage,
    ) -> ServiceResult<ClassificationResult> {
        let key = image_key(owner.as_str(), image.filename());

        let persist = tokio::spawn(persist_upload(
            self.blob_store.clone(),
            self.record_store.clone(),
            owner.to_string(),
            key.clone(),
            image.format(),
            image.data(),
        ));

        let classified = self
            .classifier
            .classify(image.path(), image.format().mime_type())
            .await
            .and_then(|result| result.validate().map(|_| result));

        // Never abandon the storage path, even when classification failed
        let record_id = match persist.await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                warn!(error = ?e, key = %key, "Failed to persist upload, history entry will be missing");
                metrics::counter!("identify.history.write_failures").increment(1);
                None
            }
            Err(e) => {
                error!(error = %e, key = %key, "Upload persistence task failed");
                metrics::counter!("identify.history.write_failures").increment(1);
                None
            }
        };

        let result = match classified {
            Ok(result) => result,
            Err(e) => {
                metrics::counter!("identify.classifier.failures").increment(1);
                return Err(e.context("Plant identification failed").into());
            }
        };

        if let Some(id) = record_id {
            if let Err(e) = self
                .record_store
                .set_result(owner.as_str(), id, &result)
                .await
            {
                warn!(error = ?e, record_id = %id, "Failed to store classification result");
                metrics::counter!("identify.history.write_failures").increment(1);
            }
        }

        info!(
            key = %key,
            scientific_name = %result.scientific_name,
            confidence = result.confidence_probability,
            "Plant identified"
        );

        Ok(result)
    }
}

/// Store the image, then create its pending history record
async fn persist_upload(
    blob_store: Arc<dyn BlobStore>,
    record_store: Arc<dyn RecordStore>,
    owner: String,
    key: String,
    format: ImageFormat,
    data: Bytes,
) -> Result<Uuid> {
    blob_store
        .put_image(&key, data, format.mime_type(), &owner)
        .await?;
    record_store.create_request(&owner, &key).await
}
