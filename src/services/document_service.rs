//! DocumentService: the upload, preview, fetch and save workflows.
//!
//! Every workflow shuffles files between three places: a per-request
//! scratch directory under `temp_dir` (removed when the `TempDir` guard
//! drops, whatever the outcome), the per-user mirror under
//! `save_dir/{user_id}/`, and the user's bucket in object storage. Nothing
//! here is transactional: a failure between the local write and the remote
//! call leaves the two sides out of step.

use crate::{
    models::stored_file::StoredFile,
    services::{
        converter_service::{ConvertError, DocumentConverter, TargetFormat},
        storage_service::{ObjectStorage, StorageError, ensure_name_safe},
    },
};
use std::{io, path::PathBuf, sync::Arc};
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Name given to the sample file seeded into empty buckets.
pub const SAMPLE_FILE_NAME: &str = "test.org";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("no free name for `{name}` after {attempts} attempts")]
    CollisionRetriesExhausted { name: String, attempts: u32 },
    #[error("`{0}` is not a UTF-8 text file")]
    NotText(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Name the converted document was stored under.
    pub stored_name: String,
}

#[derive(Clone)]
pub struct DocumentService {
    storage: Arc<dyn ObjectStorage>,
    converter: Arc<dyn DocumentConverter>,
    save_dir: PathBuf,
    temp_dir: PathBuf,
    sample_file: PathBuf,
    max_upload_attempts: u32,
}

impl DocumentService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        converter: Arc<dyn DocumentConverter>,
        save_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        sample_file: impl Into<PathBuf>,
        max_upload_attempts: u32,
    ) -> Self {
        Self {
            storage,
            converter,
            save_dir: save_dir.into(),
            temp_dir: temp_dir.into(),
            sample_file: sample_file.into(),
            max_upload_attempts: max_upload_attempts.max(1),
        }
    }

    /// Local mirror directory of `user_id`, created on demand.
    async fn user_dir(&self, user_id: &str) -> DocumentResult<PathBuf> {
        ensure_name_safe(user_id)?;
        let dir = self.save_dir.join(user_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Fresh scratch directory, unique to the calling request.
    async fn scratch(&self) -> DocumentResult<TempDir> {
        fs::create_dir_all(&self.temp_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix("scratch-")
            .tempdir_in(&self.temp_dir)?;
        Ok(dir)
    }

    /// Make sure the bucket of `user_id` exists and list it.
    ///
    /// An empty bucket is seeded with the sample file first, so a new user
    /// always has something to open in the editor.
    pub async fn ensure_bucket(&self, user_id: &str) -> DocumentResult<Vec<StoredFile>> {
        ensure_name_safe(user_id)?;
        match self.storage.create_bucket(user_id).await {
            Ok(()) => info!(user_id, "created bucket"),
            Err(StorageError::BucketAlreadyExists(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let files = self.storage.list(user_id).await?;
        if !files.is_empty() {
            return Ok(files);
        }

        if fs::try_exists(&self.sample_file).await.unwrap_or(false) {
            match self
                .storage
                .upload(user_id, SAMPLE_FILE_NAME, &self.sample_file)
                .await
            {
                Ok(()) | Err(StorageError::NameCollision { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            warn!(
                "sample file {} missing, bucket {} left empty",
                self.sample_file.display(),
                user_id
            );
        }
        Ok(self.storage.list(user_id).await?)
    }

    /// Convert an uploaded document to Org and store it in the user's bucket.
    ///
    /// The stored name is `<stem>.org`; when taken, `<stem>_1.org`,
    /// `<stem>_2.org` and so on, up to `max_upload_attempts` names.
    pub async fn upload(
        &self,
        user_id: &str,
        original_name: &str,
        data: &[u8],
    ) -> DocumentResult<UploadOutcome> {
        let original_name = base_name(original_name);
        ensure_name_safe(original_name)?;
        let user_dir = self.user_dir(user_id).await?;

        let scratch = self.scratch().await?;
        let source_dir = scratch.path().join("source");
        fs::create_dir(&source_dir).await?;
        let staged = source_dir.join(original_name);
        fs::write(&staged, data).await?;

        let converted = self.converter.convert(&staged, TargetFormat::Org).await?;

        let stem = file_stem(original_name);
        let ext = TargetFormat::Org.extension();
        let first_name = format!("{}.{}", stem, ext);

        // the mirror copy is written only under the name that was won
        let out_dir = scratch.path().join("converted");
        fs::create_dir(&out_dir).await?;
        let converted_path = out_dir.join(&first_name);
        fs::write(&converted_path, converted.as_bytes()).await?;

        for attempt in 0..self.max_upload_attempts {
            let candidate = if attempt == 0 {
                first_name.clone()
            } else {
                format!("{}_{}.{}", stem, attempt, ext)
            };
            match self.storage.upload(user_id, &candidate, &converted_path).await {
                Ok(()) => {
                    fs::copy(&converted_path, user_dir.join(&candidate)).await?;
                    info!(user_id, stored = %candidate, "stored upload of {}", original_name);
                    return Ok(UploadOutcome {
                        stored_name: candidate,
                    });
                }
                Err(StorageError::NameCollision { .. }) => {
                    debug!("name {} taken in bucket {}", candidate, user_id);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DocumentError::CollisionRetriesExhausted {
            name: first_name,
            attempts: self.max_upload_attempts,
        })
    }

    /// Download `filename` into the user's mirror, overwriting any copy.
    async fn fetch_to_local(&self, user_id: &str, filename: &str) -> DocumentResult<(PathBuf, Vec<u8>)> {
        ensure_name_safe(filename)?;
        let user_dir = self.user_dir(user_id).await?;
        let data = self.storage.download(user_id, filename).await?;
        let local_path = user_dir.join(filename);
        fs::write(&local_path, &data).await?;
        Ok((local_path, data.to_vec()))
    }

    /// HTML fragment previewing `filename` of `user_id`.
    ///
    /// Files the converter does not accept (images, mostly) are shown as an
    /// `<img>` pointing at their public URL instead.
    pub async fn preview(&self, user_id: &str, filename: &str) -> DocumentResult<String> {
        let (local_path, _) = self.fetch_to_local(user_id, filename).await?;
        match self.converter.convert(&local_path, TargetFormat::Html).await {
            Ok(html) => Ok(html),
            Err(ConvertError::UnsupportedInput { reason, .. }) => {
                debug!("previewing {} as image: {}", filename, reason);
                let url = self.storage.public_url(user_id, filename);
                Ok(format!("<img src='{}' />", escape_attr(&url)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Text of `filename`, refreshed from storage on every call.
    pub async fn content(&self, user_id: &str, filename: &str) -> DocumentResult<String> {
        let (_, data) = self.fetch_to_local(user_id, filename).await?;
        String::from_utf8(data).map_err(|_| DocumentError::NotText(filename.to_string()))
    }

    /// Replace the stored `filename` with `data`.
    ///
    /// Remove-then-upload: if the upload fails after the removal, the file
    /// is gone from the bucket.
    pub async fn save(&self, user_id: &str, filename: &str, data: &str) -> DocumentResult<()> {
        ensure_name_safe(user_id)?;
        ensure_name_safe(filename)?;

        let scratch = self.scratch().await?;
        let staged = scratch.path().join(filename);
        fs::write(&staged, data.as_bytes()).await?;

        self.storage.remove(user_id, filename).await?;
        if let Err(err) = self.storage.upload(user_id, filename, &staged).await {
            error!(user_id, "{} was removed but could not be re-uploaded: {}", filename, err);
            return Err(err.into());
        }
        debug!(user_id, "saved {} ({} bytes)", filename, data.len());
        Ok(())
    }
}

/// Last path component of a client-supplied filename.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Everything before the last `.`; the whole name when there is none.
pub fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        converter_service::MockDocumentConverter, storage_service::LocalObjectStorage,
    };
    use reqwest::Url;

    struct Fixture {
        dir: TempDir,
        storage: Arc<LocalObjectStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(LocalObjectStorage::new(
                dir.path().join("buckets"),
                Url::parse("http://localhost:8080/public").unwrap(),
            ));
            Self { dir, storage }
        }

        fn service(&self, converter: MockDocumentConverter, attempts: u32) -> DocumentService {
            DocumentService::new(
                self.storage.clone(),
                Arc::new(converter),
                self.dir.path().join("save"),
                self.dir.path().join("temp"),
                self.dir.path().join("sample.org"),
                attempts,
            )
        }

        fn scratch_entries(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("temp"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    /// Converter that prefixes the source text with its target format.
    fn echo_converter() -> MockDocumentConverter {
        let mut converter = MockDocumentConverter::new();
        converter.expect_convert().returning(|input, target| {
            let text = std::fs::read_to_string(input).map_err(ConvertError::Io)?;
            Ok(format!("{}:{}", target.writer(), text))
        });
        converter
    }

    fn unsupported_converter() -> MockDocumentConverter {
        let mut converter = MockDocumentConverter::new();
        converter.expect_convert().returning(|input, _| {
            Err(ConvertError::UnsupportedInput {
                path: input.to_path_buf(),
                reason: "not a text document".into(),
            })
        });
        converter
    }

    #[test]
    fn stems_drop_only_the_last_extension() {
        assert_eq!(file_stem("report.docx"), "report");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("README"), "README");
        assert_eq!(file_stem(".profile"), ".profile");
        assert_eq!(base_name("C:\\Users\\me\\report.docx"), "report.docx");
        assert_eq!(base_name("dir/report.docx"), "report.docx");
    }

    #[tokio::test]
    async fn same_upload_twice_gets_a_numeric_suffix() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 10);

        let first = service.upload("u1", "report.docx", b"body").await.unwrap();
        let second = service.upload("u1", "report.docx", b"body").await.unwrap();

        assert_eq!(first.stored_name, "report.org");
        assert_eq!(second.stored_name, "report_1.org");
        assert_eq!(fx.storage.download("u1", "report.org").await.unwrap(), "org:body");
        assert_eq!(fx.storage.download("u1", "report_1.org").await.unwrap(), "org:body");

        let save = fx.dir.path().join("save").join("u1");
        assert!(save.join("report.org").exists());
        assert!(save.join("report_1.org").exists());
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn second_upload_leaves_the_first_mirror_alone() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 10);

        service.upload("u1", "report.docx", b"first").await.unwrap();
        service.upload("u1", "report.docx", b"second").await.unwrap();

        let save = fx.dir.path().join("save").join("u1");
        assert_eq!(std::fs::read_to_string(save.join("report.org")).unwrap(), "org:first");
        assert_eq!(std::fs::read_to_string(save.join("report_1.org")).unwrap(), "org:second");
    }

    #[tokio::test]
    async fn concurrent_uploads_store_their_own_content() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 10);

        let (a, b) = tokio::join!(
            service.upload("u1", "report.docx", b"A"),
            service.upload("u1", "report.docx", b"B"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.stored_name, b.stored_name);
        assert_eq!(fx.storage.download("u1", &a.stored_name).await.unwrap(), "org:A");
        assert_eq!(fx.storage.download("u1", &b.stored_name).await.unwrap(), "org:B");
        let save = fx.dir.path().join("save").join("u1");
        assert_eq!(std::fs::read_to_string(save.join(&a.stored_name)).unwrap(), "org:A");
        assert_eq!(std::fs::read_to_string(save.join(&b.stored_name)).unwrap(), "org:B");
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn collision_retries_are_bounded() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 2);
        service.upload("u1", "a.md", b"x").await.unwrap();
        service.upload("u1", "a.md", b"x").await.unwrap();

        let err = service.upload("u1", "a.md", b"x").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::CollisionRetriesExhausted { ref name, attempts: 2 } if name == "a.org"
        ));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn conversion_failure_stores_nothing_and_cleans_scratch() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(unsupported_converter(), 10);

        let err = service.upload("u1", "photo.png", b"\x89PNG").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Convert(ConvertError::UnsupportedInput { .. })
        ));
        assert!(fx.storage.list("u1").await.unwrap().is_empty());
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn upload_rejects_unsafe_names() {
        let fx = Fixture::new();
        let service = fx.service(MockDocumentConverter::new(), 10);
        let err = service.upload("../u1", "a.md", b"x").await.unwrap_err();
        assert!(matches!(err, DocumentError::Storage(StorageError::InvalidName(_))));
        let err = service.upload("u1", "..", b"x").await.unwrap_err();
        assert!(matches!(err, DocumentError::Storage(StorageError::InvalidName(_))));
    }

    #[tokio::test]
    async fn ensure_bucket_seeds_an_empty_bucket_once() {
        let fx = Fixture::new();
        std::fs::write(fx.dir.path().join("sample.org"), "* sample").unwrap();
        let service = fx.service(MockDocumentConverter::new(), 10);

        let files = service.ensure_bucket("u1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, SAMPLE_FILE_NAME);

        let again = service.ensure_bucket("u1").await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn preview_converts_text_to_html() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 10);
        service.save("u1", "a.org", "* hi").await.unwrap();

        let html = service.preview("u1", "a.org").await.unwrap();
        assert_eq!(html, "html:* hi");
    }

    #[tokio::test]
    async fn preview_of_non_text_falls_back_to_an_image() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let src = fx.dir.path().join("pic.png");
        std::fs::write(&src, b"\x89PNG").unwrap();
        fx.storage.upload("u1", "pic.png", &src).await.unwrap();
        let service = fx.service(unsupported_converter(), 10);

        let html = service.preview("u1", "pic.png").await.unwrap();
        assert_eq!(html, "<img src='http://localhost:8080/public/u1/pic.png' />");
    }

    #[tokio::test]
    async fn preview_of_missing_file_is_an_error() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(echo_converter(), 10);
        let err = service.preview("u1", "nope.org").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Storage(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn content_refreshes_the_local_mirror() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(MockDocumentConverter::new(), 10);
        let local = fx.dir.path().join("save").join("u1").join("a.org");
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "stale").unwrap();
        service.save("u1", "a.org", "* fresh").await.unwrap();

        assert_eq!(service.content("u1", "a.org").await.unwrap(), "* fresh");
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "* fresh");
    }

    #[tokio::test]
    async fn save_replaces_the_stored_file() {
        let fx = Fixture::new();
        fx.storage.create_bucket("u1").await.unwrap();
        let service = fx.service(MockDocumentConverter::new(), 10);
        service.save("u1", "a.org", "* old").await.unwrap();

        service.save("u1", "a.org", "* hi").await.unwrap();

        assert_eq!(fx.storage.download("u1", "a.org").await.unwrap(), "* hi");
        assert_eq!(fx.scratch_entries(), 0);
    }
}
