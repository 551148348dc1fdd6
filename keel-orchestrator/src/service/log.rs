//! Log Service
//!
//! Append-only job logs kept as one file per job, plus tailing for live
//! streams. Output is sanitized on the way in so every reader sees plain text.

use regex::Regex;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use keel_core::domain::Job;

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("{0}")]
    ValidationError(String),

    #[error("log storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Append a chunk of output to a job's log
///
/// The first append records the job's public log location.
pub async fn append(store: &dyn Store, logs: &LogStore, job_id: i64, chunk: &str) -> Result<()> {
    if chunk.is_empty() {
        return Err(LogError::ValidationError("chunk is required".to_string()));
    }

    let job = store
        .find_job(job_id)
        .await?
        .ok_or(LogError::JobNotFound(job_id))?;

    let written = logs.append(job_id, chunk).await?;
    tracing::debug!(job_id, "Appended {} bytes of log output", written);

    if job.logs_location.is_none() {
        store
            .set_logs_location(job_id, &Job::logs_path(job_id))
            .await?;
    }

    Ok(())
}

// =============================================================================
// Sanitization
// =============================================================================

// CSI sequences, OSC sequences terminated by BEL or ST, then any other two-byte escape
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-_])")
        .expect("escape sequence pattern is valid")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

// An escape sequence that may still be completed by the next chunk
static OPEN_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*|\][^\x07\x1b]*\x1b?)?$")
        .expect("open escape pattern is valid")
});

/// Longest tail held back waiting for the rest of a sequence
const MAX_CARRY: usize = 4096;

/// Normalize line endings, strip terminal control sequences and collapse blank lines
pub fn sanitize(chunk: &str) -> String {
    let normalized = chunk.replace("\r\n", "\n").replace('\r', "\n");
    let stripped = ESCAPE_SEQUENCE.replace_all(&normalized, "");
    BLANK_LINES.replace_all(&stripped, "\n\n").into_owned()
}

/// Byte index where the unfinished tail of `text` starts
///
/// The tail is an escape sequence cut short or a lone trailing `\r` that
/// may be the first half of `\r\n`. Returns `text.len()` when nothing is open.
fn open_tail_start(text: &str) -> usize {
    let start = match OPEN_ESCAPE.find(text) {
        Some(m) => m.start(),
        None if text.ends_with('\r') => text.len() - 1,
        None => text.len(),
    };
    if text.len() - start > MAX_CARRY {
        text.len()
    } else {
        start
    }
}

// =============================================================================
// Log Store
// =============================================================================

/// Largest slice of a log read by one tail poll
const MAX_TAIL_READ: u64 = 64 * 1024;

/// File-backed log storage, one `<job id>.log` per job
///
/// Each job keeps a small carry of output whose meaning depends on the next
/// chunk. Clones share it.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
    carry: Arc<Mutex<HashMap<i64, String>>>,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            carry: Arc::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, job_id: i64) -> PathBuf {
        self.dir.join(format!("{}.log", job_id))
    }

    /// Sanitize and append a chunk. Returns the number of bytes written.
    ///
    /// An unfinished escape sequence or trailing `\r` is held until the next
    /// chunk of the same job arrives, or until [`LogStore::close`].
    pub async fn append(&self, job_id: i64, chunk: &str) -> std::io::Result<usize> {
        let mut carry = self.carry.lock().await;
        let mut text = carry.remove(&job_id).unwrap_or_default();
        text.push_str(chunk);

        let open = open_tail_start(&text);
        if open < text.len() {
            carry.insert(job_id, text.split_off(open));
        }

        // Held across the write so appends of one job land in order
        self.write(job_id, &sanitize(&text)).await
    }

    /// Write out whatever is still held for a job
    pub async fn close(&self, job_id: i64) -> std::io::Result<usize> {
        let mut carry = self.carry.lock().await;
        match carry.remove(&job_id) {
            Some(rest) => self.write(job_id, &sanitize(&rest)).await,
            None => Ok(0),
        }
    }

    async fn write(&self, job_id: i64, clean: &str) -> std::io::Result<usize> {
        if clean.is_empty() {
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(job_id))
            .await?;
        file.write_all(clean.as_bytes()).await?;
        file.flush().await?;

        Ok(clean.len())
    }

    /// Full content of a job's log. Missing or unreadable logs read as empty.
    pub async fn read_all(&self, job_id: i64) -> String {
        match tokio::fs::read(self.path(job_id)).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!(job_id, "Failed to read log file: {}", e);
                String::new()
            }
        }
    }

    /// Current size of a job's log in bytes
    pub async fn size(&self, job_id: i64) -> u64 {
        tokio::fs::metadata(self.path(job_id))
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Read `offset..end`, at most `MAX_TAIL_READ` bytes of it
    async fn read_range(&self, job_id: i64, offset: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let len = end.saturating_sub(offset).min(MAX_TAIL_READ);
        let mut file = tokio::fs::File::open(self.path(job_id)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Follow a job's log starting at `offset`
    pub fn tail(&self, job_id: i64, offset: u64) -> LogTail {
        LogTail {
            store: self.clone(),
            job_id,
            offset,
            pending: Vec::new(),
        }
    }
}

/// A reader that yields only what was appended since its last poll
#[derive(Debug)]
pub struct LogTail {
    store: LogStore,
    job_id: i64,
    offset: u64,
    pending: Vec<u8>,
}

impl LogTail {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// New text since the previous call, or `None` when nothing complete was added
    ///
    /// Large backlogs come back over several calls. A multi-byte character
    /// split across appends is held back until it is whole.
    pub async fn poll_delta(&mut self) -> Option<String> {
        let size = self.store.size(self.job_id).await;
        if size <= self.offset {
            return None;
        }

        match self.store.read_range(self.job_id, self.offset, size).await {
            Ok(bytes) => {
                self.offset += bytes.len() as u64;
                self.pending.extend_from_slice(&bytes);
            }
            Err(e) => {
                tracing::warn!(job_id = self.job_id, "Failed to read log tail: {}", e);
                return None;
            }
        }

        let text = take_complete_utf8(&mut self.pending);
        if text.is_empty() { None } else { Some(text) }
    }
}

fn take_complete_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(text) => {
            let text = text.to_string();
            buf.clear();
            text
        }
        // Incomplete sequence at the end: keep it for the next poll
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryStore, Store};
    use keel_core::dto::project::{CreatePipeline, CreateProject};
    use keel_core::dto::run::TriggerRun;
    use keel_core::domain::{JobKind, NewJob};

    fn temp_store() -> LogStore {
        LogStore::new(std::env::temp_dir().join(format!("keel-logs-{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn test_sanitize_normalizes_line_endings() {
        assert_eq!(sanitize("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_sanitize_strips_escape_sequences() {
        let colored = "\x1b[1;32mok\x1b[0m \x1b]0;title\x07done\x1b(B";
        assert_eq!(sanitize(colored), "ok done");
    }

    #[test]
    fn test_sanitize_collapses_blank_lines() {
        assert_eq!(sanitize("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(sanitize("a\r\n\r\n\r\nb"), "a\n\nb");
        assert_eq!(sanitize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_take_complete_utf8_holds_partial_character() {
        let euro = "€".as_bytes();
        let mut buf = vec![b'a', euro[0], euro[1]];
        assert_eq!(take_complete_utf8(&mut buf), "a");
        assert_eq!(buf.len(), 2);

        buf.push(euro[2]);
        assert_eq!(take_complete_utf8(&mut buf), "€");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_append_then_read_all() {
        let logs = temp_store();
        logs.append(1, "A").await.unwrap();
        logs.append(1, "B").await.unwrap();

        assert_eq!(logs.read_all(1).await, "AB");
        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[test]
    fn test_open_tail_start() {
        assert_eq!(open_tail_start("plain"), 5);
        assert_eq!(open_tail_start("ok\x1b[3"), 2);
        assert_eq!(open_tail_start("ok\x1b"), 2);
        assert_eq!(open_tail_start("a\x1b]0;title"), 1);
        assert_eq!(open_tail_start("ok\x1b[0m\r"), 6);
        assert_eq!(open_tail_start("\x1b[1mdone\x1b[0m"), 12);
    }

    #[tokio::test]
    async fn test_sequences_split_across_chunks_are_stripped() {
        let logs = temp_store();
        logs.append(5, "\x1b[3").await.unwrap();
        logs.append(5, "2mok\x1b[0m\r").await.unwrap();
        logs.append(5, "\nnext").await.unwrap();

        assert_eq!(logs.read_all(5).await, "ok\nnext");
        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[tokio::test]
    async fn test_close_writes_held_output() {
        let logs = temp_store();
        logs.append(6, "done\r").await.unwrap();
        assert_eq!(logs.read_all(6).await, "done");

        assert_eq!(logs.close(6).await.unwrap(), 1);
        assert_eq!(logs.read_all(6).await, "done\n");
        assert_eq!(logs.close(6).await.unwrap(), 0);
        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[tokio::test]
    async fn test_tail_reads_large_backlog_in_slices() {
        let logs = temp_store();
        let line = format!("{}\n", "x".repeat(1023));
        logs.append(8, &line.repeat(100)).await.unwrap();

        let mut tail = logs.tail(8, 0);
        let first = tail.poll_delta().await.unwrap();
        assert_eq!(first.len() as u64, MAX_TAIL_READ);

        let mut total = first.len();
        while let Some(delta) = tail.poll_delta().await {
            assert!(delta.len() as u64 <= MAX_TAIL_READ);
            total += delta.len();
        }
        assert_eq!(total, 100 * 1024);
        assert_eq!(tail.offset(), 100 * 1024);
        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[tokio::test]
    async fn test_read_missing_log_is_empty() {
        let logs = temp_store();
        assert_eq!(logs.read_all(404).await, "");
        assert_eq!(logs.size(404).await, 0);
    }

    #[tokio::test]
    async fn test_tail_yields_only_new_output() {
        let logs = temp_store();
        logs.append(7, "A").await.unwrap();

        let mut tail = logs.tail(7, logs.size(7).await);
        assert_eq!(tail.poll_delta().await, None);

        logs.append(7, "B").await.unwrap();
        assert_eq!(tail.poll_delta().await.as_deref(), Some("B"));
        assert_eq!(tail.poll_delta().await, None);
        assert_eq!(tail.offset(), 2);

        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[tokio::test]
    async fn test_tail_from_zero_replays_history() {
        let logs = temp_store();
        logs.append(3, "hello\n").await.unwrap();

        let mut tail = logs.tail(3, 0);
        assert_eq!(tail.poll_delta().await.as_deref(), Some("hello\n"));

        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }

    #[tokio::test]
    async fn test_service_append_sets_location_once() {
        let store = MemoryStore::new();
        let logs = temp_store();
        let project = store.create_project(CreateProject {
            name: "p".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        let pipeline = store
            .create_pipeline(
                project.id,
                CreatePipeline {
                    name: "ci".to_string(),
                    yaml: String::new(),
                    version: None,
                },
            )
            .await
            .unwrap();
        let run = store
            .create_run(
                pipeline.id,
                &TriggerRun::default(),
                vec![NewJob {
                    stage: "build".to_string(),
                    name: "build-1".to_string(),
                    kind: JobKind::Step,
                    image: None,
                    command: "true".to_string(),
                }],
            )
            .await
            .unwrap();
        let job = store.list_run_jobs(run.id).await.unwrap().remove(0);

        append(&store, &logs, job.id, "line\n").await.unwrap();
        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(
            job.logs_location,
            Some(format!("/logs/jobs/{}.log", job.id))
        );

        assert!(matches!(
            append(&store, &logs, job.id, "").await,
            Err(LogError::ValidationError(_))
        ));
        assert!(matches!(
            append(&store, &logs, 9999, "x").await,
            Err(LogError::JobNotFound(9999))
        ));

        let _ = tokio::fs::remove_dir_all(logs.dir()).await;
    }
}
