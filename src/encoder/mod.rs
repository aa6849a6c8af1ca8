//! File encoder — turns attachments into base64 payloads for transport.
//!
//! Reads happen on the async runtime and the base64 pass runs on the
//! blocking pool, so callers never stall the session loop. A batch is
//! all-or-nothing: one unreadable or rejected file fails the whole send.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::try_join_all;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::config::FileUploadConfig;
use crate::protocol::OutboundFilePayload;
use crate::transcript::Attachment;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("maximum {max} files allowed (got {count})")]
    TooManyFiles { count: usize, max: usize },

    #[error("file {name} is too large ({size} bytes). Maximum size is {max} bytes")]
    TooLarge { name: String, size: u64, max: u64 },

    #[error("file type {media_type} is not supported ({name})")]
    UnsupportedType { name: String, media_type: String },

    #[error("encoding task failed: {0}")]
    Task(String),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// A file the user wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    pub path: PathBuf,
    /// Overrides the extension-based guess.
    pub media_type: Option<String>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            media_type: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Final path component, as sent on the wire.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn media_type(&self) -> String {
        self.media_type
            .clone()
            .unwrap_or_else(|| guess_media_type(&self.path).to_string())
    }

    fn read_error(&self, source: std::io::Error) -> EncodeError {
        EncodeError::Read {
            name: self.name(),
            source,
        }
    }
}

/// Media type from the file extension.
pub fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => "application/json",
        "txt" | "md" | "log" => "text/plain",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Check count, size and type limits without reading file contents.
/// Returns the descriptors recorded in the transcript.
pub async fn validate(files: &[FileSource], limits: &FileUploadConfig) -> EncodeResult<Vec<Attachment>> {
    if files.len() > limits.max_files {
        return Err(EncodeError::TooManyFiles {
            count: files.len(),
            max: limits.max_files,
        });
    }

    let mut attachments = Vec::with_capacity(files.len());
    for file in files {
        let name = file.name();
        let media_type = file.media_type();
        if !limits.allowed_types.is_empty() && !limits.allowed_types.contains(&media_type) {
            return Err(EncodeError::UnsupportedType { name, media_type });
        }

        let meta = tokio::fs::metadata(&file.path)
            .await
            .map_err(|e| file.read_error(e))?;
        if meta.len() > limits.max_file_size {
            return Err(EncodeError::TooLarge {
                name,
                size: meta.len(),
                max: limits.max_file_size,
            });
        }

        attachments.push(Attachment {
            name,
            size: meta.len(),
            media_type,
        });
    }
    Ok(attachments)
}

/// Read and base64-encode one file, refusing more than `max_size` bytes.
///
/// The limit applies to the bytes actually read: metadata can under-report
/// (pseudo files, pipes, files still growing).
pub async fn encode(file: &FileSource, max_size: u64) -> EncodeResult<OutboundFilePayload> {
    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(|e| file.read_error(e))?;
    let mut bytes = Vec::new();
    handle
        .take(max_size.saturating_add(1))
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| file.read_error(e))?;
    let size = bytes.len() as u64;
    if size > max_size {
        return Err(EncodeError::TooLarge {
            name: file.name(),
            size,
            max: max_size,
        });
    }

    let encoded_content = tokio::task::spawn_blocking(move || STANDARD.encode(bytes))
        .await
        .map_err(|e| EncodeError::Task(e.to_string()))?;

    debug!(name = %file.name(), size, "encoded attachment");
    Ok(OutboundFilePayload {
        name: file.name(),
        encoded_content,
        size,
        media_type: file.media_type(),
    })
}

/// Encode every file concurrently. Fails on the first error.
pub async fn encode_all(files: &[FileSource], max_size: u64) -> EncodeResult<Vec<OutboundFilePayload>> {
    try_join_all(files.iter().map(|f| encode(f, max_size))).await
}

/// Validate, then encode. What the send path runs off the session loop.
/// The returned descriptors are taken from the encoded payloads, so the
/// echoed sizes are the transmitted ones.
pub async fn prepare(
    files: &[FileSource],
    limits: &FileUploadConfig,
) -> EncodeResult<(Vec<Attachment>, Vec<OutboundFilePayload>)> {
    validate(files, limits).await?;
    let payloads = encode_all(files, limits.max_file_size).await?;
    let attachments = payloads
        .iter()
        .map(|p| Attachment {
            name: p.name.clone(),
            size: p.size,
            media_type: p.media_type.clone(),
        })
        .collect();
    Ok((attachments, payloads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> FileSource {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        FileSource::new(path)
    }

    #[test]
    fn media_type_guessing() {
        assert_eq!(guess_media_type(Path::new("a.JSON")), "application/json");
        assert_eq!(guess_media_type(Path::new("data.csv")), "text/csv");
        assert_eq!(
            guess_media_type(Path::new("sheet.xlsx")),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(guess_media_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn explicit_media_type_wins() {
        let src = FileSource::new("/tmp/x.bin").with_media_type("text/plain");
        assert_eq!(src.media_type(), "text/plain");
        assert_eq!(src.name(), "x.bin");
    }

    #[tokio::test]
    async fn encode_preserves_metadata() {
        let dir = TempDir::new().unwrap();
        let src = write(&dir, "hello.txt", b"hello world");
        let payload = encode(&src, 1024).await.unwrap();
        assert_eq!(payload.name, "hello.txt");
        assert_eq!(payload.size, 11);
        assert_eq!(payload.media_type, "text/plain");
        assert_eq!(payload.encoded_content, "aGVsbG8gd29ybGQ=");
    }

    #[tokio::test]
    async fn binary_bytes_are_text_safe() {
        let dir = TempDir::new().unwrap();
        let bytes: Vec<u8> = (0..=255).collect();
        let src = write(&dir, "all.bin", &bytes);
        let payload = encode(&src, 1024).await.unwrap();
        assert!(payload.encoded_content.is_ascii());
        assert_eq!(STANDARD.decode(&payload.encoded_content).unwrap(), bytes);
    }

    #[tokio::test]
    async fn encode_all_keeps_order() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "a.csv", b"a,b"),
            write(&dir, "b.json", b"{}"),
            write(&dir, "c.txt", b"c"),
        ];
        let payloads = encode_all(&files, 1024).await.unwrap();
        let names: Vec<_> = payloads.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a.csv", "b.json", "c.txt"]);
    }

    #[tokio::test]
    async fn one_missing_file_fails_the_batch() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "a.csv", b"a,b"),
            FileSource::new(dir.path().join("missing.csv")),
        ];
        let err = encode_all(&files, 1024).await.unwrap_err();
        match err {
            EncodeError::Read { name, .. } => assert_eq!(name, "missing.csv"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_enforces_limits() {
        let dir = TempDir::new().unwrap();
        let limits = FileUploadConfig {
            max_file_size: 4,
            max_files: 2,
            allowed_types: vec!["text/csv".into()],
        };

        let too_many = vec![
            write(&dir, "1.csv", b"1"),
            write(&dir, "2.csv", b"2"),
            write(&dir, "3.csv", b"3"),
        ];
        assert!(matches!(
            validate(&too_many, &limits).await,
            Err(EncodeError::TooManyFiles { count: 3, max: 2 })
        ));

        let big = vec![write(&dir, "big.csv", b"123456")];
        assert!(matches!(
            validate(&big, &limits).await,
            Err(EncodeError::TooLarge { size: 6, .. })
        ));

        let wrong = vec![write(&dir, "x.pdf", b"%PDF")];
        assert!(matches!(
            validate(&wrong, &limits).await,
            Err(EncodeError::UnsupportedType { .. })
        ));

        let ok = vec![write(&dir, "ok.csv", b"a,b")];
        let attachments = validate(&ok, &limits).await.unwrap();
        assert_eq!(
            attachments,
            vec![Attachment {
                name: "ok.csv".into(),
                size: 3,
                media_type: "text/csv".into(),
            }]
        );
    }

    #[tokio::test]
    async fn limit_applies_to_bytes_read() {
        let dir = TempDir::new().unwrap();
        let src = write(&dir, "five.txt", b"12345");
        assert!(matches!(
            encode(&src, 4).await,
            Err(EncodeError::TooLarge { size: 5, max: 4, .. })
        ));
        assert_eq!(encode(&src, 5).await.unwrap().size, 5);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn under_reported_size_is_still_capped() {
        // procfs reports length 0 but yields real content.
        let limits = FileUploadConfig {
            max_file_size: 4,
            allowed_types: vec![],
            ..FileUploadConfig::default()
        };
        let files = vec![FileSource::new("/proc/self/status")];
        assert!(matches!(
            prepare(&files, &limits).await,
            Err(EncodeError::TooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn echoed_sizes_match_payloads() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(&dir, "a.csv", b"a,b\n"), write(&dir, "b.json", b"{}")];
        let (attachments, payloads) = prepare(&files, &FileUploadConfig::default()).await.unwrap();
        assert_eq!(attachments.len(), payloads.len());
        for (a, p) in attachments.iter().zip(&payloads) {
            assert_eq!((a.name.as_str(), a.size), (p.name.as_str(), p.size));
        }
    }

    #[tokio::test]
    async fn empty_allow_list_accepts_anything() {
        let dir = TempDir::new().unwrap();
        let limits = FileUploadConfig {
            allowed_types: vec![],
            ..FileUploadConfig::default()
        };
        let files = vec![write(&dir, "blob", b"\x00\x01")];
        let (attachments, payloads) = prepare(&files, &limits).await.unwrap();
        assert_eq!(attachments[0].media_type, "application/octet-stream");
        assert_eq!(payloads[0].encoded_content, "AAE=");
    }
}
