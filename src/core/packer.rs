//! Archive creation and submission.
//!
//! The output directory is collected into memory, compressed at the maximum
//! deflate level and written as `<dir>-<timestamp>.zip` under the archive
//! directory. Submission uploads the archive, then responds to the owning job
//! when one is known.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::adapters::{Marketplace, RemoteError};
use crate::domain::{SubmissionResult, Upload, ZipResult};

/// Packing and submission errors
#[derive(Debug, Error)]
pub enum PackError {
    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to add '{entry}' to archive: {source}")]
    Zip {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> PackError + 'a {
    move |source| PackError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Creates archives and hands them to the marketplace
pub struct Packer {
    archive_dir: PathBuf,
    marketplace: Arc<dyn Marketplace>,
    agent_id: String,
}

impl Packer {
    pub fn new(
        archive_dir: impl Into<PathBuf>,
        marketplace: Arc<dyn Marketplace>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            marketplace,
            agent_id: agent_id.into(),
        }
    }

    /// Archive every regular file below `source_dir`
    #[instrument(skip(self), fields(source = %source_dir.display()))]
    pub async fn create_zip(&self, source_dir: &Path) -> Result<ZipResult, PackError> {
        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(io_err("create archive directory", &self.archive_dir))?;

        let entries = collect_files(source_dir).await?;
        let bytes = compress(&entries)?;

        let zip_path = self.archive_dir.join(archive_name(source_dir));
        tokio::fs::write(&zip_path, &bytes)
            .await
            .map_err(io_err("write archive", &zip_path))?;

        info!(
            path = %zip_path.display(),
            entries = entries.len(),
            bytes = bytes.len(),
            "Archive written"
        );
        Ok(ZipResult {
            zip_path,
            bytes: bytes.len() as u64,
        })
    }

    /// Upload the archive and, if `job_id` is known, respond to that job
    #[instrument(skip(self), fields(zip = %zip_path.display()))]
    pub async fn submit(
        &self,
        zip_path: &Path,
        job_id: Option<&str>,
    ) -> Result<SubmissionResult, PackError> {
        let Upload { file: uploaded, raw } = self.marketplace.upload_file(zip_path).await?;

        let Some(job_id) = job_id else {
            info!(url = %uploaded.url, "No job id, upload only");
            return Ok(SubmissionResult {
                submission_id: None,
                raw,
            });
        };

        let content = format!(
            "Submitted by {}. Archive: {}",
            self.agent_id, uploaded.name
        );
        let result = self
            .marketplace
            .submit_response(job_id, &content, std::slice::from_ref(&uploaded))
            .await?;
        Ok(result)
    }
}

/// `<dir basename>-<ISO-8601 with ':' and '.' replaced by '-'>.zip`
pub fn archive_name(source_dir: &Path) -> String {
    let base = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "output".to_string());
    let stamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}.zip", base, stamp)
}

/// Regular files below `root`, keyed by forward-slash relative path
pub async fn collect_files(root: &Path) -> Result<BTreeMap<String, Vec<u8>>, PackError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(io_err("read directory", &dir))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err("read directory", &dir))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(io_err("inspect", &path))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let bytes = tokio::fs::read(&path).await.map_err(io_err("read", &path))?;
                files.insert(relative_key(root, &path), bytes);
            }
        }
    }

    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn compress(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, PackError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|source| PackError::Zip {
                entry: name.clone(),
                source,
            })?;
        writer.write_all(bytes).map_err(|source| PackError::Io {
            action: "compress",
            path: PathBuf::from(name),
            source,
        })?;
    }

    let finished = writer.finish().map_err(|source| PackError::Zip {
        entry: "<central directory>".to_string(),
        source,
    })?;
    Ok(finished.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_name_shape() {
        let name = archive_name(Path::new("/tmp/runs/current"));
        assert!(name.starts_with("current-"));
        assert!(name.ends_with("Z.zip"));
        let stamp = &name["current-".len()..name.len() - ".zip".len()];
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains('.'));
    }

    #[tokio::test]
    async fn test_collect_uses_forward_slash_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/components")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html/>").unwrap();
        std::fs::write(dir.path().join("src/components/App.tsx"), "export {}").unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        let keys: Vec<_> = files.keys().cloned().collect();
        assert_eq!(keys, vec!["index.html", "src/components/App.tsx"]);
        assert_eq!(files["index.html"], b"<html/>");
    }

    #[tokio::test]
    async fn test_missing_source_dir_fails() {
        let dir = TempDir::new().unwrap();
        let err = collect_files(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, PackError::Io { action: "read directory", .. }));
    }
}
