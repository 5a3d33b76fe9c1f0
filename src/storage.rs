use async_trait::async_trait;
use aws_sdk_s3 as s3;
use axum::body::Bytes;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Extensions accepted for book covers and profile photos.
const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The upload is not an acceptable image (wrong extension, empty, too large).
    #[error("{0}")]
    InvalidImage(String),
    #[error("image backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// ImageUpload
///
/// A file received in a multipart request, before it is handed to an `ImageStore`.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    fn mime_type(&self) -> String {
        match &self.content_type {
            Some(ct) if ct.starts_with("image/") => ct.clone(),
            _ => match self.extension().as_deref() {
                Some("png") => "image/png".to_string(),
                _ => "image/jpeg".to_string(),
            },
        }
    }
}

/// validate_image
///
/// Accepts `.jpg`, `.jpeg` and `.png` files of at most `max_bytes`.
pub fn validate_image(image: &ImageUpload, max_bytes: usize) -> Result<(), StorageError> {
    let allowed = image
        .extension()
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if !allowed || image.bytes.is_empty() {
        return Err(StorageError::InvalidImage("Please upload an image".to_string()));
    }
    if image.bytes.len() > max_bytes {
        return Err(StorageError::InvalidImage(format!(
            "image is larger than {max_bytes} bytes"
        )));
    }
    Ok(())
}

/// sanitize_stem
///
/// Reduces a client-supplied file name to a safe stem: no directories, no dots,
/// only ASCII alphanumerics, `-` and `_`.
fn sanitize_stem(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let stem: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() { "image".to_string() } else { stem }
}

/// Builds `<stem>-<millis>.<ext>`, the on-disk name for an upload.
pub fn object_name(image: &ImageUpload, millis: i64) -> String {
    let ext = image.extension().unwrap_or_else(|| "jpg".to_string());
    format!("{}-{}.{}", sanitize_stem(&image.file_name), millis, ext)
}

// 1. ImageStore Contract
/// ImageStore
///
/// The image hosting capability: store bytes and get back a reference, release a
/// reference. The concrete backend (local disk, S3-compatible bucket, in-memory mock)
/// is chosen by configuration.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Prepares the backend (creates the upload directory or bucket). Idempotent.
    async fn ensure_ready(&self) -> Result<(), StorageError>;

    /// Stores the image and returns the reference to persist on the owning record.
    async fn upload(&self, image: &ImageUpload) -> Result<String, StorageError>;

    /// Releases a previously returned reference. Unknown references are not an error.
    async fn delete(&self, reference: &str) -> Result<(), StorageError>;
}

// 2. Local Disk Implementation
/// LocalDiskImageStore
///
/// Writes uploads into a single directory. References are the relative file paths.
#[derive(Clone)]
pub struct LocalDiskImageStore {
    dir: PathBuf,
}

impl LocalDiskImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolves a reference to a path inside the upload directory. Only the file name
    /// component is honoured, so a reference can never escape the directory.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        Path::new(reference)
            .file_name()
            .map(|name| self.dir.join(name))
    }
}

#[async_trait]
impl ImageStore for LocalDiskImageStore {
    async fn ensure_ready(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn upload(&self, image: &ImageUpload) -> Result<String, StorageError> {
        self.ensure_ready().await?;
        let name = object_name(image, chrono::Utc::now().timestamp_millis());
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &image.bytes).await?;
        tracing::debug!(path = %path.display(), bytes = image.bytes.len(), "stored image on disk");
        Ok(path.to_string_lossy().into_owned())
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let Some(path) = self.resolve(reference) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// 3. The S3 Implementation (S3/MinIO)
/// S3ImageStore
///
/// Stores images in an S3-compatible bucket. References are object keys.
///
/// `force_path_style(true)` is required for MinIO compatibility.
#[derive(Clone)]
pub struct S3ImageStore {
    client: s3::Client,
    bucket_name: String,
}

impl S3ImageStore {
    /// Constructs the S3 client using credentials and configuration from AppConfig.
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    /// CreateBucket fails harmlessly when the bucket already exists, so the result is
    /// only logged.
    async fn ensure_ready(&self) -> Result<(), StorageError> {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket for {}: {}", self.bucket_name, e);
        }
        Ok(())
    }

    async fn upload(&self, image: &ImageUpload) -> Result<String, StorageError> {
        let ext = image.extension().unwrap_or_else(|| "jpg".to_string());
        let key = format!("images/{}.{}", Uuid::new_v4(), ext);

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(image.mime_type())
            .body(ByteStream::from(image.bytes.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(key)
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(reference)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

// 4. The Mock Implementation (For Tests)
/// MockImageStore
///
/// Keeps uploads in memory so handler tests can assert what was stored and released
/// without a filesystem or network.
#[derive(Clone, Default)]
pub struct MockImageStore {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MockImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub async fn contains(&self, reference: &str) -> bool {
        self.objects.lock().await.contains_key(reference)
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn ensure_ready(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn upload(&self, image: &ImageUpload) -> Result<String, StorageError> {
        if self.should_fail {
            return Err(StorageError::Backend(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        let reference = format!("mock/{}/{}", Uuid::new_v4(), object_name(image, 0));
        self.objects
            .lock()
            .await
            .insert(reference.clone(), image.bytes.clone());
        Ok(reference)
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        if self.should_fail {
            return Err(StorageError::Backend(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        self.objects.lock().await.remove(reference);
        Ok(())
    }
}

/// ImageStoreState
///
/// The concrete type used to share the image store across the application state.
pub type ImageStoreState = Arc<dyn ImageStore>;
