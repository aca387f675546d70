//! Data sinks - consumers of the finished session log

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use psyflow_core::{DataMap, FlowResult};
use psyflow_data::DataFormat;

/// Participant identifier of the form `ID_YYYYMMDD_HHMMSS_mmm`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    /// Id derived from the current local time
    pub fn generate() -> Self {
        Self::at(Local::now())
    }

    pub fn at(time: DateTime<Local>) -> Self {
        SubjectId(time.format("ID_%Y%m%d_%H%M%S_%3f").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subject({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything handed to a sink when a session finishes
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub subject_id: SubjectId,
    pub subject_info: DataMap,
    pub blocks_order: Option<String>,
    pub format: DataFormat,
    /// The serialized log
    pub data: String,
}

#[async_trait]
pub trait DataSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> FlowResult<()>;
}

/// Writes `<subject_id>.<ext>` into a directory
#[derive(Clone, Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSink { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, submission: &Submission) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            submission.subject_id,
            submission.format.extension()
        ))
    }
}

#[async_trait]
impl DataSink for FileSink {
    async fn submit(&self, submission: &Submission) -> FlowResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(submission);
        tokio::fs::write(&path, submission.data.as_bytes()).await?;
        info!(path = %path.display(), bytes = submission.data.len(), "session log written");
        Ok(())
    }
}

/// Keeps submissions in memory, shared between clones
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    submissions: Arc<Mutex<Vec<Submission>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.submissions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn submit(&self, submission: &Submission) -> FlowResult<()> {
        self.submissions.lock().push(submission.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn submission(format: DataFormat) -> Submission {
        Submission {
            subject_id: SubjectId::new("ID_20240102_030405_006"),
            subject_info: DataMap::new(),
            blocks_order: Some("AB".to_string()),
            format,
            data: "[]".to_string(),
        }
    }

    #[test]
    fn test_subject_id_format() {
        let time = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(6);
        assert_eq!(SubjectId::at(time).as_str(), "ID_20240102_030405_006");
    }

    #[test]
    fn test_generated_ids_have_fixed_width() {
        let id = SubjectId::generate();
        assert!(id.as_str().starts_with("ID_"));
        assert_eq!(id.as_str().len(), "ID_YYYYMMDD_HHMMSS_mmm".len());
    }

    #[tokio::test]
    async fn test_memory_sink_shares_submissions() {
        let sink = MemorySink::new();
        let observer = sink.clone();
        sink.submit(&submission(DataFormat::Json)).await.unwrap();

        assert_eq!(observer.len(), 1);
        assert_eq!(observer.submissions()[0].blocks_order.as_deref(), Some("AB"));
    }

    #[tokio::test]
    async fn test_memory_sink_survives_panicking_holder() {
        let sink = MemorySink::new();
        let shared = sink.clone();
        let holder = std::thread::spawn(move || {
            let _guard = shared.submissions.lock();
            panic!("holder failed");
        });
        assert!(holder.join().is_err());

        sink.submit(&submission(DataFormat::Json)).await.unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_writes_named_file() {
        let dir = std::env::temp_dir().join(format!("psyflow-sink-{}", std::process::id()));
        let sink = FileSink::new(&dir);
        let submission = submission(DataFormat::Csv);
        sink.submit(&submission).await.unwrap();

        let path = dir.join("ID_20240102_030405_006.csv");
        assert_eq!(sink.path_for(&submission), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
