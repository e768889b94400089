use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Byte stream of a stored image
pub type ImageStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A stored image opened for reading
pub struct StoredImage {
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub body: ImageStream,
}

/// Binary object storage for uploaded images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the image under `key`
    async fn put_image(&self, key: &str, data: Bytes, content_type: &str, owner: &str) -> Result<()>;

    /// Open the image under `key`, `None` if it does not exist
    async fn open_image(&self, key: &str) -> Result<Option<StoredImage>>;
}

/// Owner-scoped object key for an uploaded image.
/// Format: users/{owner}/images/{filename}
pub fn image_key(owner: &str, filename: &str) -> String {
    format!(
        "users/{owner}/images/{filename}",
        owner = encode_path_component(owner),
        filename = filename
    )
}

/// Last path segment of a stored key, as shown to clients
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// S3-backed image store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 image store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 image store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn put_image(&self, key: &str, data: Bytes, content_type: &str, owner: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .metadata("owner-id", owner)
            .send()
            .await
            .context("Failed to upload image to S3")?;

        debug!(key = %key, "Image uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn open_image(&self, key: &str) -> Result<Option<StoredImage>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(e).context("Failed to read image from S3");
            }
        };

        let content_type = output.content_type().map(String::from);
        let content_length = output.content_length();
        let body = ReaderStream::new(output.body.into_async_read()).boxed();

        Ok(Some(StoredImage {
            content_type,
            content_length,
            body,
        }))
    }
}

/// Encode a path component so it cannot traverse or collide.
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, which keeps distinct inputs distinct.
fn encode_path_component(component: &str) -> String {
    let mut encoded = String::with_capacity(component.len());
    for byte in component.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key_is_owner_scoped() {
        assert_eq!(
            image_key("uid-123", "5f1c.jpeg"),
            "users/uid-123/images/5f1c.jpeg"
        );
    }

    #[test]
    fn test_image_key_encodes_owner() {
        assert_eq!(
            image_key("../other", "a.png"),
            "users/%2E%2E%2Fother/images/a.png"
        );
    }

    #[test]
    fn test_image_key_keeps_similar_owners_apart() {
        assert_ne!(image_key("alice.b", "x.jpeg"), image_key("alice_b", "x.jpeg"));
        assert_ne!(image_key("a%2Eb", "x.jpeg"), image_key("a.b", "x.jpeg"));
    }

    #[test]
    fn test_filename_of() {
        assert_eq!(filename_of("users/u/images/a.png"), "a.png");
        assert_eq!(filename_of("a.png"), "a.png");
    }

    #[test]
    fn test_encode_path_component() {
        assert_eq!(encode_path_component("glasses-001"), "glasses-001");
        assert_eq!(encode_path_component("user/path"), "user%2Fpath");
        assert_eq!(encode_path_component("us..er"), "us%2E%2Eer");
        assert_eq!(encode_path_component("hello world"), "hello%20world");
        assert_eq!(encode_path_component("100%"), "100%25");
        assert_eq!(encode_path_component("é"), "%C3%A9");
    }
}
