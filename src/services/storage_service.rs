//! src/services/storage_service.rs
//!
//! Object storage seam. `ObjectStorage` is the per-user bucket API the rest
//! of the application talks to; `LocalObjectStorage` keeps buckets as plain
//! directories beneath `base_path/{bucket}/{name}`. The Supabase backend lives
//! in `supabase_storage.rs`.

use crate::models::stored_file::StoredFile;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use reqwest::Url;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("`{name}` already exists in bucket `{bucket}`")]
    NameCollision { bucket: String, name: String },
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("storage API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Per-user bucket operations.
///
/// Buckets are named after the user id. `upload` never overwrites: an
/// existing name yields [`StorageError::NameCollision`] so callers can pick
/// another one. `remove` of a missing file succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create `bucket`; [`StorageError::BucketAlreadyExists`] if it is there.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// List the files of `bucket`, ordered by name.
    async fn list(&self, bucket: &str) -> StorageResult<Vec<StoredFile>>;

    /// Store the file at `local_path` as `name`.
    async fn upload(&self, bucket: &str, name: &str, local_path: &Path) -> StorageResult<()>;

    /// Fetch the content of `name`.
    async fn download(&self, bucket: &str, name: &str) -> StorageResult<Bytes>;

    /// Delete `name` from `bucket`.
    async fn remove(&self, bucket: &str, name: &str) -> StorageResult<()>;

    /// URL under which `name` can be fetched without credentials.
    fn public_url(&self, bucket: &str, name: &str) -> String;
}

const MAX_NAME_LEN: usize = 255;

/// Validate a bucket or file name that ends up as a single path component.
///
/// Rejects empty names, separators, `..` and control characters. Both user
/// ids and filenames come straight from requests, so everything that joins
/// them onto a local directory goes through here first.
pub fn ensure_name_safe(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    if name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Best-effort MIME type from the file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "org" | "txt" | "md" | "rst" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        _ => "application/octet-stream",
    }
}

/// Append `segments` to `base`, percent-encoding each one.
pub fn url_with_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Buckets as directories on local disk.
///
/// Used for development without a Supabase project and as the storage
/// double in tests. Public URLs point back at this application's `/public`
/// route.
#[derive(Clone, Debug)]
pub struct LocalObjectStorage {
    /// Directory holding one sub-directory per bucket.
    pub base_path: PathBuf,

    /// Base of the URLs returned by `public_url`, e.g. `http://host/public`.
    pub public_base: Url,
}

impl LocalObjectStorage {
    pub fn new(base_path: impl Into<PathBuf>, public_base: Url) -> Self {
        Self {
            base_path: base_path.into(),
            public_base,
        }
    }

    /// Compute the physical folder of a bucket. Does not check existence.
    fn bucket_root(&self, bucket: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket);
        path
    }

    /// Validated path of `name` inside `bucket`.
    fn object_path(&self, bucket: &str, name: &str) -> StorageResult<PathBuf> {
        ensure_name_safe(bucket)?;
        ensure_name_safe(name)?;
        Ok(self.bucket_root(bucket).join(name))
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<PathBuf> {
        ensure_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(StorageError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Open a stored file for streaming out.
    pub async fn open(&self, bucket: &str, name: &str) -> StorageResult<File> {
        let path = self.object_path(bucket, name)?;
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        ensure_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        fs::create_dir_all(&self.base_path).await?;
        match fs::create_dir(&root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<StoredFile>> {
        let root = self.ensure_bucket_exists(bucket).await?;
        let mut entries = fs::read_dir(&root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                debug!("skipping non UTF-8 entry in bucket {}", bucket);
                continue;
            };
            files.push(StoredFile {
                mimetype: Some(content_type_for(&name).to_string()),
                id: None,
                created_at: meta.created().ok().map(DateTime::<Utc>::from),
                updated_at: meta.modified().ok().map(DateTime::<Utc>::from),
                size: Some(meta.len()),
                name,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Copy `local_path` into the bucket.
    ///
    /// The target is opened with `create_new`, so the name is reserved
    /// atomically and a concurrent upload of the same name loses with
    /// `NameCollision`. A partially written target is removed on failure.
    async fn upload(&self, bucket: &str, name: &str, local_path: &Path) -> StorageResult<()> {
        let path = self.object_path(bucket, name)?;
        self.ensure_bucket_exists(bucket).await?;

        let mut source = File::open(local_path).await?;
        let mut target = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::NameCollision {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                });
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        let written = async {
            tokio::io::copy(&mut source, &mut target).await?;
            target.flush().await?;
            target.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&path).await;
            return Err(StorageError::Io(err));
        }

        debug!("stored {} in bucket {}", name, bucket);
        Ok(())
    }

    async fn download(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            }),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn remove(&self, bucket: &str, name: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, name)?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        url_with_segments(&self.public_base, &[bucket, name]).to_string()
    }
}
