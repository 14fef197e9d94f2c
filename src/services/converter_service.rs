//! Document conversion seam and the pandoc-backed implementation.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input is not a text document the converter understands.
    #[error("cannot convert '{}': {reason}", path.display())]
    UnsupportedInput { path: PathBuf, reason: String },

    /// The converter binary could not be started.
    #[error("failed to run converter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Formats documents are converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// Emacs Org, the format files are stored in.
    Org,
    /// HTML fragment used for previews.
    Html,
}

impl TargetFormat {
    /// Writer name understood by pandoc.
    pub fn writer(self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Html => "html",
        }
    }

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Html => "html",
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the file at `input` to `target` and return the text.
    ///
    /// Returns [`ConvertError::UnsupportedInput`] when `input` is not a
    /// recognised text document.
    async fn convert(&self, input: &Path, target: TargetFormat) -> ConvertResult<String>;
}

/// Input format (pandoc reader) for a file, detected from its extension.
pub fn detect_input_format(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let reader = match ext.as_str() {
        "org" => "org",
        "md" | "markdown" | "txt" => "markdown",
        "rst" => "rst",
        "html" | "htm" => "html",
        "docx" => "docx",
        "odt" => "odt",
        "epub" => "epub",
        "tex" | "latex" => "latex",
        "textile" => "textile",
        "rtf" => "rtf",
        "ipynb" => "ipynb",
        "csv" => "csv",
        "wiki" | "mediawiki" => "mediawiki",
        "adoc" | "asciidoc" => "asciidoc",
        "opml" => "opml",
        "t2t" => "t2t",
        _ => return None,
    };
    Some(reader)
}

/// Runs the `pandoc` binary, reading its output from stdout.
#[derive(Clone, Debug)]
pub struct PandocConverter {
    program: String,
}

impl PandocConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    async fn convert(&self, input: &Path, target: TargetFormat) -> ConvertResult<String> {
        let reader = detect_input_format(input).ok_or_else(|| ConvertError::UnsupportedInput {
            path: input.to_path_buf(),
            reason: "unrecognised file extension".into(),
        })?;

        debug!(
            "converting {} from {} to {}",
            input.display(),
            reader,
            target.writer()
        );
        let output = Command::new(&self.program)
            .arg("--from")
            .arg(reader)
            .arg("--to")
            .arg(target.writer())
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConvertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::UnsupportedInput {
                path: input.to_path_buf(),
                reason: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| ConvertError::UnsupportedInput {
            path: input.to_path_buf(),
            reason: "converter output is not UTF-8".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_readers_from_extensions() {
        assert_eq!(detect_input_format(Path::new("a.DOCX")), Some("docx"));
        assert_eq!(detect_input_format(Path::new("notes.md")), Some("markdown"));
        assert_eq!(detect_input_format(Path::new("x/y/z.org")), Some("org"));
        assert_eq!(detect_input_format(Path::new("photo.png")), None);
        assert_eq!(detect_input_format(Path::new("README")), None);
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected_before_running_pandoc() {
        let converter = PandocConverter::new("pandoc-that-does-not-exist");
        let err = converter
            .convert(Path::new("photo.png"), TargetFormat::Html)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let converter = PandocConverter::new("pandoc-that-does-not-exist");
        let err = converter
            .convert(Path::new("notes.md"), TargetFormat::Org)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod with_stub_binary {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn stub(dir: &TempDir, script: &str) -> String {
            let path = dir.path().join("pandoc-stub");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        #[tokio::test]
        async fn passes_reader_writer_and_input_to_the_binary() {
            let dir = TempDir::new().unwrap();
            let program = stub(&dir, r#"echo "$2 -> $4"; cat "$5""#);
            let input = dir.path().join("notes.md");
            std::fs::write(&input, "hello").unwrap();

            let out = PandocConverter::new(program)
                .convert(&input, TargetFormat::Org)
                .await
                .unwrap();
            assert_eq!(out, "markdown -> org\nhello");
        }

        #[tokio::test]
        async fn failing_binary_reports_unsupported_input() {
            let dir = TempDir::new().unwrap();
            let program = stub(&dir, "echo 'unknown reader' >&2; exit 64");
            let input = dir.path().join("broken.docx");
            std::fs::write(&input, "not a zip").unwrap();

            let err = PandocConverter::new(program)
                .convert(&input, TargetFormat::Html)
                .await
                .unwrap_err();
            match err {
                ConvertError::UnsupportedInput { reason, .. } => {
                    assert!(reason.contains("unknown reader"))
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
