//! NDJSON file writer for bulk export
//!
//! One file set per resource type under `<export_path>/<job_id>/`, split
//! when the per-file limit is reached: `Patient.ndjson`, `Patient.1.ndjson`, ...

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::jobs::JobId;

/// Errors that can occur during NDJSON writing
#[derive(Debug, Error)]
pub enum NdjsonWriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A finished output file and the number of lines in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub count: usize,
}

impl WrittenFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Writer state for a specific resource type
struct TypeWriter {
    resource_type: String,
    /// Current file index (for splitting)
    file_index: usize,
    /// Resources written to current file
    current_count: usize,
    writer: Option<BufWriter<File>>,
    files: Vec<WrittenFile>,
    max_per_file: usize,
    job_dir: PathBuf,
}

impl TypeWriter {
    fn new(resource_type: &str, job_dir: PathBuf, max_per_file: usize) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            file_index: 0,
            current_count: 0,
            writer: None,
            files: Vec::new(),
            max_per_file: max_per_file.max(1),
            job_dir,
        }
    }

    /// Open the next file when none is open or the current one is full.
    async fn rotate_if_needed(&mut self) -> Result<(), NdjsonWriterError> {
        if self.writer.is_some() && self.current_count < self.max_per_file {
            return Ok(());
        }

        if let Some(mut w) = self.writer.take() {
            w.flush().await?;
            self.file_index += 1;
        }
        self.current_count = 0;

        let filename = if self.file_index == 0 {
            format!("{}.ndjson", self.resource_type)
        } else {
            format!("{}.{}.ndjson", self.resource_type, self.file_index)
        };

        let path = self.job_dir.join(&filename);
        let file = File::create(&path).await?;
        self.files.push(WrittenFile { path, count: 0 });
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn write_resource(&mut self, resource: &Value) -> Result<(), NdjsonWriterError> {
        let mut line = serde_json::to_vec(resource)?;
        line.push(b'\n');

        self.rotate_if_needed().await?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(&line).await?;
        }

        self.current_count += 1;
        if let Some(file) = self.files.last_mut() {
            file.count += 1;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), NdjsonWriterError> {
        if let Some(mut w) = self.writer.take() {
            w.flush().await?;
        }
        Ok(())
    }

    fn total_count(&self) -> usize {
        self.files.iter().map(|f| f.count).sum()
    }
}

/// NDJSON writer for one export job
pub struct NdjsonWriter {
    job_dir: PathBuf,
    max_resources_per_file: usize,
    writers: HashMap<String, TypeWriter>,
}

impl NdjsonWriter {
    /// Create the job directory and an empty writer.
    pub async fn new(
        base_path: impl AsRef<Path>,
        job_id: JobId,
        max_resources_per_file: usize,
    ) -> Result<Self, NdjsonWriterError> {
        let job_dir = base_path.as_ref().join(job_id.to_string());
        fs::create_dir_all(&job_dir).await?;

        Ok(Self {
            job_dir,
            max_resources_per_file,
            writers: HashMap::new(),
        })
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Append one resource to its type's current file.
    pub async fn write_resource(
        &mut self,
        resource_type: &str,
        resource: &Value,
    ) -> Result<(), NdjsonWriterError> {
        let job_dir = self.job_dir.clone();
        let max_per_file = self.max_resources_per_file;

        let writer = self
            .writers
            .entry(resource_type.to_string())
            .or_insert_with(|| TypeWriter::new(resource_type, job_dir, max_per_file));

        writer.write_resource(resource).await
    }

    /// Total resources written so far for one type.
    pub fn count_for(&self, resource_type: &str) -> usize {
        self.writers
            .get(resource_type)
            .map_or(0, TypeWriter::total_count)
    }

    /// Flush everything and return resource type -> files.
    pub async fn finish(mut self) -> Result<HashMap<String, Vec<WrittenFile>>, NdjsonWriterError> {
        let mut result = HashMap::new();

        for (resource_type, mut writer) in self.writers.drain() {
            writer.finish().await?;
            if !writer.files.is_empty() {
                result.insert(resource_type, writer.files);
            }
        }

        Ok(result)
    }
}

/// Remove job directories under `base_path` older than `max_age`.
pub async fn cleanup_expired_exports(
    base_path: impl AsRef<Path>,
    max_age: Duration,
) -> std::io::Result<usize> {
    let base_path = base_path.as_ref();
    let mut cleaned = 0;

    if let Err(err) = fs::metadata(base_path).await {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Ok(0);
        }
        return Err(err);
    }

    let now = std::time::SystemTime::now();

    let mut entries = fs::read_dir(base_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        if entry.file_type().await?.is_dir()
            && let Ok(metadata) = entry.metadata().await
            && let Ok(modified) = metadata.modified()
            && let Ok(age) = now.duration_since(modified)
            && age > max_age
        {
            tracing::info!(
                path = %path.display(),
                age_hours = age.as_secs() / 3600,
                "Cleaning up expired export directory"
            );
            fs::remove_dir_all(&path).await?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
