//! Job submission.
//!
//! `submit` validates synchronously, persists the upload under a directory
//! owned by the new job, records the job as `pending` and queues it. It never
//! waits for execution. Validation runs before anything touches the disk or
//! the store, so a rejected request leaves no trace.

use crate::config::PipelineConfig;
use crate::error::ConvertError;
use crate::job::{JobId, JobStore};
use crate::task::{extension_of, FileKind, TaskType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());

/// Per-request knobs for AI tasks. Unset fields fall back to configuration
/// when the job executes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    pub subject: Option<String>,
    pub ai_provider: Option<String>,
    pub ai_model: Option<String>,
    pub ai_api_key: Option<String>,
}

impl fmt::Debug for ConversionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionOptions")
            .field("subject", &self.subject)
            .field("ai_provider", &self.ai_provider)
            .field("ai_model", &self.ai_model)
            .field("ai_api_key", &self.ai_api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A conversion request as received from the HTTP layer.
#[derive(Clone)]
pub struct ConversionRequest {
    pub source: Vec<u8>,
    pub file_name: String,
    pub task_type: String,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(source: Vec<u8>, file_name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            task_type: task_type.into(),
            options: ConversionOptions::default(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.options.subject = Some(subject.into());
        self
    }

    pub fn ai_provider(mut self, provider: impl Into<String>) -> Self {
        self.options.ai_provider = Some(provider.into());
        self
    }

    pub fn ai_model(mut self, model: impl Into<String>) -> Self {
        self.options.ai_model = Some(model.into());
        self
    }

    pub fn ai_api_key(mut self, key: impl Into<String>) -> Self {
        self.options.ai_api_key = Some(key.into());
        self
    }
}

impl fmt::Debug for ConversionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRequest")
            .field("source", &format_args!("{} bytes", self.source.len()))
            .field("file_name", &self.file_name)
            .field("task_type", &self.task_type)
            .field("options", &self.options)
            .finish()
    }
}

/// What a worker pulls off the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub task: TaskType,
    pub kind: FileKind,
    pub options: ConversionOptions,
}

/// Accepts requests and hands them to the worker queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<JobStore>,
    config: Arc<PipelineConfig>,
    queue: mpsc::UnboundedSender<QueuedJob>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        config: Arc<PipelineConfig>,
        queue: mpsc::UnboundedSender<QueuedJob>,
    ) -> Self {
        Self {
            store,
            config,
            queue,
        }
    }

    /// Validate, persist and enqueue. Returns as soon as the job is queued.
    pub async fn submit(&self, request: ConversionRequest) -> Result<JobId, ConvertError> {
        let task: TaskType = request.task_type.parse()?;
        let kind = task.validate_file(&request.file_name)?;

        let stored_name = sanitize_filename(&request.file_name);
        let input_root = self.config.input_dir.clone();
        let job = self
            .store
            .create(task, request.file_name.clone(), |id| {
                input_root.join(id.to_string()).join(&stored_name)
            });
        let id = job.id;
        let output_dir = self.config.output_dir.join(id.to_string());

        if let Err(e) = persist(&job.input_ref, &output_dir, &request.source).await {
            self.discard(&id, &job.input_ref, &output_dir).await;
            return Err(e);
        }

        let queued = QueuedJob {
            id,
            task,
            kind,
            options: request.options,
        };
        if self.queue.send(queued).is_err() {
            self.discard(&id, &job.input_ref, &output_dir).await;
            return Err(ConvertError::Internal(
                "worker queue is closed; service is shutting down".into(),
            ));
        }

        info!(
            "Job {} queued: {} '{}' ({} bytes)",
            id,
            task,
            request.file_name,
            request.source.len()
        );
        Ok(id)
    }

    /// Remove a job that never reached a worker, together with its files.
    async fn discard(&self, id: &JobId, input_ref: &Path, output_dir: &Path) {
        if let Err(e) = self.store.abandon(id) {
            warn!("Could not abandon job {}: {}", id, e);
        }
        if let Some(input_dir) = input_ref.parent() {
            remove_job_dir(input_dir).await;
        }
        remove_job_dir(output_dir).await;
    }
}

/// Remove a job directory. Returns whether it is gone; a directory that never
/// existed counts as gone.
async fn remove_job_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not remove {}: {}", dir.display(), e);
            false
        }
    }
}

fn storage_failed(path: &Path) -> impl FnOnce(std::io::Error) -> ConvertError {
    let path = path.to_path_buf();
    move |source| ConvertError::StorageFailed { path, source }
}

async fn persist(input_ref: &Path, output_dir: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    if let Some(input_dir) = input_ref.parent() {
        tokio::fs::create_dir_all(input_dir)
            .await
            .map_err(storage_failed(input_dir))?;
    }
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(storage_failed(output_dir))?;
    tokio::fs::write(input_ref, bytes)
        .await
        .map_err(storage_failed(input_ref))?;
    debug!("Persisted upload to {}", input_ref.display());
    Ok(())
}

/// Reduce an uploaded name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed and leading dots/underscores are stripped.
/// The extension is kept, lower-cased.
pub fn sanitize_filename(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let extension = extension_of(base);
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = WHITESPACE.replace_all(stem.trim(), "_");
    let stem = UNSAFE_CHARS.replace_all(&stem, "");
    let stem = stem.trim_start_matches(['.', '_']);
    let stem = if stem.is_empty() { "file" } else { stem };

    let extension = UNSAFE_CHARS.replace_all(&extension, "");
    format!("{stem}{extension}")
}

/// Where a job's artifact goes: `{output_dir}/{id}/{stem}{ext}`.
pub fn output_path_for(config: &PipelineConfig, id: &JobId, input_ref: &Path, task: TaskType) -> PathBuf {
    let stem = input_ref
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    config
        .output_dir
        .join(id.to_string())
        .join(format!("{stem}{}", task.output_extension()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(dir: &Path) -> (Dispatcher, Arc<JobStore>, mpsc::UnboundedReceiver<QueuedJob>) {
        let config = PipelineConfig::builder()
            .input_dir(dir.join("in"))
            .output_dir(dir.join("out"))
            .build()
            .unwrap();
        let store = Arc::new(JobStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Dispatcher::new(store.clone(), Arc::new(config), tx),
            store,
            rx,
        )
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_filename("Quarterly Report.PDF"), "Quarterly_Report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd.docx"), "passwd.docx");
        assert_eq!(sanitize_filename(r"C:\Users\me\deck.pptx"), "deck.pptx");
        assert_eq!(sanitize_filename("..hidden.doc"), "hidden.doc");
        assert_eq!(sanitize_filename("报告.docx"), "file.docx");
        assert_eq!(sanitize_filename("a$b%c.pdf"), "abc.pdf");
    }

    #[tokio::test]
    async fn submit_persists_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let (d, store, mut rx) = dispatcher(dir.path());

        let id = d
            .submit(ConversionRequest::new(b"%PDF-1.7".to_vec(), "My Scan.pdf", "pdf_to_markdown").subject("Maths"))
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.source_filename, "My Scan.pdf");
        assert_eq!(
            job.input_ref,
            dir.path().join("in").join(id.to_string()).join("My_Scan.pdf")
        );
        assert_eq!(std::fs::read(&job.input_ref).unwrap(), b"%PDF-1.7");
        assert!(dir.path().join("out").join(id.to_string()).is_dir());

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.id, id);
        assert_eq!(queued.kind, FileKind::Pdf);
        assert_eq!(queued.options.subject.as_deref(), Some("Maths"));
    }

    #[tokio::test]
    async fn rejects_before_any_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let (d, store, mut rx) = dispatcher(dir.path());

        let err = d
            .submit(ConversionRequest::new(b"x".to_vec(), "report.pdf", "ppt_to_pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFileType { .. }));

        let err = d
            .submit(ConversionRequest::new(b"x".to_vec(), "a.docx", "doc_to_markdown_ai"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedTask { .. }));

        assert!(store.is_empty());
        assert!(!dir.path().join("in").exists());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_name_uploads_never_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (d, store, _rx) = dispatcher(dir.path());
        let a = d
            .submit(ConversionRequest::new(b"a".to_vec(), "deck.pptx", "ppt_to_pdf"))
            .await
            .unwrap();
        let b = d
            .submit(ConversionRequest::new(b"b".to_vec(), "deck.pptx", "ppt_to_pdf"))
            .await
            .unwrap();
        let (ja, jb) = (store.get(&a).unwrap(), store.get(&b).unwrap());
        assert_ne!(ja.input_ref.parent(), jb.input_ref.parent());
        assert_eq!(std::fs::read(&ja.input_ref).unwrap(), b"a");
        assert_eq!(std::fs::read(&jb.input_ref).unwrap(), b"b");
    }

    #[tokio::test]
    async fn closed_queue_abandons_job() {
        let dir = tempfile::tempdir().unwrap();
        let (d, store, rx) = dispatcher(dir.path());
        drop(rx);
        let err = d
            .submit(ConversionRequest::new(b"x".to_vec(), "a.docx", "docx_to_markdown"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Internal(_)));
        assert!(store.is_empty());
        for root in ["in", "out"] {
            let left = std::fs::read_dir(dir.path().join(root)).unwrap().count();
            assert_eq!(left, 0, "{root} still holds the discarded job");
        }
    }

    #[tokio::test]
    async fn job_dir_removal_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("job");
        std::fs::create_dir_all(job_dir.join("nested")).unwrap();
        std::fs::write(job_dir.join("nested/a.pdf"), b"%PDF").unwrap();
        assert!(remove_job_dir(&job_dir).await);
        assert!(!job_dir.exists());

        // Already gone is not a failure.
        assert!(remove_job_dir(&job_dir).await);

        // A path under a regular file cannot be removed.
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(!remove_job_dir(&file.join("child")).await);
    }

    #[tokio::test]
    async fn storage_failure_abandons_job() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the input root should be makes create_dir_all fail.
        let blocker = dir.path().join("in");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let (d, store, _rx) = dispatcher(dir.path());

        let err = d
            .submit(ConversionRequest::new(b"x".to_vec(), "a.docx", "docx_to_markdown"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::StorageFailed { .. }), "{err:?}");
        assert!(store.is_empty());
    }

    #[test]
    fn output_path_swaps_extension() {
        let config = PipelineConfig::default();
        let store = JobStore::new();
        let job = store.create(TaskType::PptToPdf, "deck.pptx", |id| {
            PathBuf::from(format!("temp_files/{id}/deck.pptx"))
        });
        let out = output_path_for(&config, &job.id, &job.input_ref, TaskType::PptToPdf);
        assert_eq!(
            out,
            PathBuf::from("output_files")
                .join(job.id.to_string())
                .join("deck.pdf")
        );
    }

    #[test]
    fn request_debug_hides_key_and_bytes() {
        let req = ConversionRequest::new(vec![0; 2048], "a.pdf", "pdf_to_markdown")
            .ai_api_key("sk-live-123");
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("sk-live-123"));
        assert!(dbg.contains("2048 bytes"));
    }
}
