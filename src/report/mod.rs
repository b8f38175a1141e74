//! Report sink for artifacts collected from workers and actions.
//!
//! Images are attached inline. Everything else, notably logs, is attached as
//! a path reference so large files never get loaded into memory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::error::ReportError;

/// Index file appended by `FileReportSink`.
pub const INDEX_FILE: &str = "attachments.jsonl";

/// Attachment kind, inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Png,
    Jpg,
    Text,
    Json,
    Xml,
    Html,
    Csv,
    Mp4,
}

impl AttachmentKind {
    /// Map an extension to a kind; unknown extensions are treated as text.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpg,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "html" => Self::Html,
            "csv" => Self::Csv,
            "mp4" => Self::Mp4,
            _ => Self::Text,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Png | Self::Jpg)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Text => "txt",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Mp4 => "mp4",
        }
    }
}

/// Destination for report attachments.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn attach_bytes(
        &self,
        name: &str,
        kind: AttachmentKind,
        bytes: Vec<u8>,
    ) -> Result<(), ReportError>;

    async fn attach_text(&self, name: &str, text: &str) -> Result<(), ReportError>;

    /// Make every attachment durable. Called once at session teardown.
    async fn flush(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Hand a worker's output file to the sink.
///
/// Images are read and attached inline; other files are attached as a note
/// carrying the absolute path. Failures are logged and never propagated.
pub async fn collect_artifact(sink: &dyn ReportSink, owner: &str, path: &Path) {
    if !fs::try_exists(path).await.unwrap_or(false) {
        info!(owner, path = %path.display(), "Artifact missing, nothing to attach");
        return;
    }

    let kind = AttachmentKind::from_path(path);
    info!(owner, path = %path.display(), ?kind, "Collecting artifact");

    let result = if kind.is_image() {
        match fs::read(path).await {
            Ok(bytes) => {
                sink.attach_bytes(&format!("{owner}_screenshot"), kind, bytes)
                    .await
            }
            Err(e) => Err(ReportError::Io(e)),
        }
    } else {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let note = format!(
            "File not inlined to keep the report small.\n\nOpen locally:\n{}",
            absolute.display()
        );
        sink.attach_text(&format!("path_{owner}"), &note).await
    };

    if let Err(e) = result {
        error!(owner, path = %path.display(), error = %e, "Failed to attach artifact");
    }
}

/// One recorded attachment.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentRecord {
    pub name: String,
    pub kind: AttachmentKind,
    /// File written under the report directory.
    pub file: PathBuf,
    pub attached_at: chrono::DateTime<Utc>,
}

/// Writes attachments under a report directory with a JSON-lines index.
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn write(&self, name: &str, kind: AttachmentKind, bytes: &[u8]) -> Result<(), ReportError> {
        fs::create_dir_all(&self.dir).await?;
        let stamp = Utc::now();
        let file = self.dir.join(format!(
            "{}_{}.{}",
            stamp.format("%Y%m%d_%H%M%S%3f"),
            sanitize(name),
            kind.extension()
        ));
        fs::write(&file, bytes).await?;

        let record = AttachmentRecord {
            name: name.to_string(),
            kind,
            file,
            attached_at: stamp,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut index = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(INDEX_FILE))
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn attach_bytes(
        &self,
        name: &str,
        kind: AttachmentKind,
        bytes: Vec<u8>,
    ) -> Result<(), ReportError> {
        self.write(name, kind, &bytes).await
    }

    async fn attach_text(&self, name: &str, text: &str) -> Result<(), ReportError> {
        self.write(name, AttachmentKind::Text, text.as_bytes()).await
    }
}

/// An attachment held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAttachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub content: Vec<u8>,
}

/// Keeps attachments in memory, for embedding and tests.
#[derive(Default)]
pub struct MemoryReportSink {
    attachments: Mutex<Vec<MemoryAttachment>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachments(&self) -> Vec<MemoryAttachment> {
        self.attachments
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    fn push(&self, attachment: MemoryAttachment) {
        if let Ok(mut attachments) = self.attachments.lock() {
            attachments.push(attachment);
        }
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn attach_bytes(
        &self,
        name: &str,
        kind: AttachmentKind,
        bytes: Vec<u8>,
    ) -> Result<(), ReportError> {
        self.push(MemoryAttachment {
            name: name.to_string(),
            kind,
            content: bytes,
        });
        Ok(())
    }

    async fn attach_text(&self, name: &str, text: &str) -> Result<(), ReportError> {
        self.push(MemoryAttachment {
            name: name.to_string(),
            kind: AttachmentKind::Text,
            content: text.as_bytes().to_vec(),
        });
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_kind_from_extension() {
        assert_eq!(AttachmentKind::from_path(Path::new("a/shot.PNG")), AttachmentKind::Png);
        assert_eq!(AttachmentKind::from_path(Path::new("b.jpeg")), AttachmentKind::Jpg);
        assert_eq!(AttachmentKind::from_path(Path::new("perf.csv")), AttachmentKind::Csv);
        assert_eq!(AttachmentKind::from_path(Path::new("monitor.log")), AttachmentKind::Text);
        assert_eq!(AttachmentKind::from_path(Path::new("noext")), AttachmentKind::Text);
    }

    #[tokio::test]
    async fn images_are_attached_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let sink = MemoryReportSink::new();
        collect_artifact(&sink, "camera", &path).await;

        let attachments = sink.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].kind, AttachmentKind::Png);
        assert_eq!(attachments[0].content, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn logs_are_attached_by_path_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        std::fs::write(&path, "secret log body that must not be inlined").unwrap();

        let sink = MemoryReportSink::new();
        collect_artifact(&sink, "logcat_monitor", &path).await;

        let attachments = sink.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "path_logcat_monitor");
        let note = String::from_utf8(attachments[0].content.clone()).unwrap();
        assert!(note.contains("monitor.log"));
        assert!(!note.contains("secret log body"));
    }

    #[tokio::test]
    async fn missing_artifact_is_ignored() {
        let sink = MemoryReportSink::new();
        collect_artifact(&sink, "perf", Path::new("/nonexistent/perf.csv")).await;
        assert!(sink.attachments().is_empty());
    }

    #[tokio::test]
    async fn file_sink_writes_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileReportSink::new(dir.path().join("report"));
        sink.attach_text("path_perf", "see /tmp/perf.csv").await.unwrap();
        sink.attach_bytes("shot", AttachmentKind::Png, vec![1, 2, 3]).await.unwrap();

        let index = std::fs::read_to_string(dir.path().join("report").join(INDEX_FILE)).unwrap();
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"text\""));
        assert!(lines[1].contains("\"kind\":\"png\""));
    }
}
