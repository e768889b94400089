use crate::auth::OwnerId;
use crate::blob_store::{image_key, BlobStore, StoredImage, DEFAULT_CONTENT_TYPE};
use crate::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use tracing::instrument;

/// Reads previously uploaded images back to their owner
pub struct ImageService {
    blob_store: Arc<dyn BlobStore>,
}

/// Only bare generated names are accepted, never paths
pub fn validate_filename(filename: &str) -> ServiceResult<&str> {
    let valid = !filename.is_empty()
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if valid {
        Ok(filename)
    } else {
        Err(ServiceError::invalid(format!("Invalid filename: {}", filename)))
    }
}

impl ImageService {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self { blob_store }
    }

    /// Open `filename` from the owner's image folder
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn fetch_image(&self, owner: &OwnerId, filename: &str) -> ServiceResult<StoredImage> {
        let filename = validate_filename(filename)?;
        let key = image_key(owner.as_str(), filename);

        let mut image = self
            .blob_store
            .open_image(&key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(filename.to_string()))?;

        if image.content_type.as_deref().map_or(true, str::is_empty) {
            image.content_type = Some(DEFAULT_CONTENT_TYPE.to_string());
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MockBlobStore;
    use bytes::Bytes;
    use futures::StreamExt;

    fn stored(content_type: Option<&str>, body: &'static [u8]) -> StoredImage {
        StoredImage {
            content_type: content_type.map(String::from),
            content_length: Some(body.len() as i64),
            body: futures::stream::iter(vec![Ok(Bytes::from_static(body))]).boxed(),
        }
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("550e8400-e29b-41d4-a716-446655440000.jpeg").is_ok());
        assert!(validate_filename("a_b.png").is_ok());

        assert!(validate_filename("").is_err());
        assert!(validate_filename("../uid-2/images/a.png").is_err());
        assert!(validate_filename("users/uid-2/images/a.png").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("a b.png").is_err());
    }

    #[tokio::test]
    async fn test_fetch_image_uses_owner_scoped_key() {
        let mut blob_store = MockBlobStore::new();
        blob_store
            .expect_open_image()
            .withf(|key| key == "users/uid-1/images/leaf.png")
            .times(1)
            .returning(|_| Ok(Some(stored(Some("image/png"), b"png-bytes"))));

        let service = ImageService::new(Arc::new(blob_store));
        let image = service
            .fetch_image(&OwnerId::new("uid-1"), "leaf.png")
            .await
            .unwrap();

        assert_eq!(image.content_type.as_deref(), Some("image/png"));
        let chunks: Vec<_> = image.body.collect().await;
        assert_eq!(&chunks[0].as_ref().unwrap()[..], b"png-bytes");
    }

    #[tokio::test]
    async fn test_fetch_image_defaults_content_type() {
        let mut blob_store = MockBlobStore::new();
        blob_store
            .expect_open_image()
            .returning(|_| Ok(Some(stored(None, b"raw"))));

        let service = ImageService::new(Arc::new(blob_store));
        let image = service
            .fetch_image(&OwnerId::new("uid-1"), "leaf.jpeg")
            .await
            .unwrap();

        assert_eq!(image.content_type.as_deref(), Some(DEFAULT_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_fetch_image_not_found() {
        let mut blob_store = MockBlobStore::new();
        blob_store.expect_open_image().returning(|_| Ok(None));

        let service = ImageService::new(Arc::new(blob_store));
        let err = service
            .fetch_image(&OwnerId::new("uid-1"), "missing.jpeg")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_image_rejects_paths_before_reading() {
        let service = ImageService::new(Arc::new(MockBlobStore::new()));
        let err = service
            .fetch_image(&OwnerId::new("uid-1"), "../uid-2/images/a.png")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }
}
