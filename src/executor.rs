//! Per-job orchestration.
//!
//! ```text
//! in_progress ─▶ ppt_to_pdf ............. office engine export ─────────────┐
//!            ─▶ *_to_markdown (AI) ..... extract ─▶ backend ─▶ write .md ────┤─▶ success
//!            ─▶ doc_to_markdown_simple . paragraph styles ─▶ write .md ──────┘
//!                              any error or panic ─────────────────────────────▶ failed
//! ```
//!
//! [`ConversionExecutor::execute`] is the failure boundary: every error and
//! every panic below it becomes a `failed` transition, so no job is ever left
//! `in_progress`.

use crate::ai::{BackendRegistry, BackendSettings};
use crate::automation::AutomationManager;
use crate::config::{PipelineConfig, DEFAULT_SUBJECT};
use crate::dispatch::{output_path_for, ConversionOptions, QueuedJob};
use crate::error::ConvertError;
use crate::extract::{docx, Extractor};
use crate::job::{ConversionArtifact, ConversionFailure, Job, JobResult, JobStatus, JobStore};
use crate::task::{extension_of, FileKind, TaskType};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

const MESSAGE_CONVERTED: &str = "File converted successfully.";
const MESSAGE_CONVERTED_AI: &str = "File converted successfully using AI.";

/// Runs one queued job from `in_progress` to a terminal state.
pub struct ConversionExecutor {
    store: Arc<JobStore>,
    extractor: Extractor,
    automation: AutomationManager,
    registry: BackendRegistry,
    config: Arc<PipelineConfig>,
}

impl ConversionExecutor {
    pub fn new(
        store: Arc<JobStore>,
        extractor: Extractor,
        automation: AutomationManager,
        registry: BackendRegistry,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            extractor,
            automation,
            registry,
            config,
        }
    }

    /// Execute a job and record its outcome. Never returns an error and never
    /// unwinds: failures are written to the store.
    pub async fn execute(&self, queued: QueuedJob) {
        let span = info_span!("job", id = %queued.id, task = %queued.task);
        self.execute_inner(queued).instrument(span).await
    }

    async fn execute_inner(&self, queued: QueuedJob) {
        let job = match self.store.transition(&queued.id, JobStatus::InProgress, None) {
            Ok(job) => job,
            Err(e) => {
                error!("Cannot start job: {}", e);
                return;
            }
        };
        let started = Instant::now();
        info!("Processing '{}'", job.source_filename);

        let outcome = AssertUnwindSafe(self.run(&job, queued.kind, &queued.options))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ConvertError::Internal(format!(
                    "conversion panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let (status, result) = match outcome {
            Ok(artifact) => {
                info!(
                    "Job succeeded in {:.1}s → {} ({} warnings)",
                    started.elapsed().as_secs_f64(),
                    artifact.output_ref.display(),
                    artifact.warnings.len()
                );
                (JobStatus::Success, JobResult::Success(artifact))
            }
            Err(e) => {
                error!(
                    "Job failed after {:.1}s [{}]: {}",
                    started.elapsed().as_secs_f64(),
                    e.kind(),
                    e
                );
                (
                    JobStatus::Failed,
                    JobResult::Failed(ConversionFailure {
                        error_kind: e.kind(),
                        error_message: e.to_string(),
                    }),
                )
            }
        };

        if let Err(e) = self.store.transition(&job.id, status, Some(result)) {
            error!("Cannot record outcome: {}", e);
        }
    }

    async fn run(
        &self,
        job: &Job,
        kind: FileKind,
        options: &ConversionOptions,
    ) -> Result<ConversionArtifact, ConvertError> {
        let output = output_path_for(&self.config, &job.id, &job.input_ref, job.task);

        let (message, warnings) = match job.task {
            TaskType::PptToPdf => {
                self.export_pdf(&job.input_ref, &output).await?;
                (MESSAGE_CONVERTED, Vec::new())
            }
            TaskType::DocToMarkdown | TaskType::DocxToMarkdown | TaskType::PdfToMarkdown => {
                let warnings = self.ai_markdown(job, kind, options, &output).await?;
                (MESSAGE_CONVERTED_AI, warnings)
            }
            TaskType::DocToMarkdownSimple => {
                self.simple_markdown(&job.input_ref, kind, &output).await?;
                (MESSAGE_CONVERTED, Vec::new())
            }
        };

        let output_file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ConversionArtifact {
            output_file_url: format!(
                "{}/{}/{}",
                self.config.download_prefix, job.id, output_file_name
            ),
            output_file_name,
            output_ref: output,
            message: message.to_string(),
            warnings,
        })
    }

    async fn export_pdf(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let automation = self.automation.clone();
        let (src, dest) = (input.to_path_buf(), output.to_path_buf());
        if let Err(e) = blocking(move || automation.convert_to_pdf(&src, &dest)).await {
            remove_partial(output).await;
            return Err(e);
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConvertError::ConversionFailed {
                document: input.display().to_string(),
                reason: "engine reported success but wrote no PDF".into(),
            });
        }
        Ok(())
    }

    /// Extract → backend → write. Returns the backend's warnings.
    async fn ai_markdown(
        &self,
        job: &Job,
        kind: FileKind,
        options: &ConversionOptions,
        output: &Path,
    ) -> Result<Vec<String>, ConvertError> {
        let extraction = self.extractor.extract(&job.input_ref, kind).await?;
        if extraction.text.trim().is_empty() {
            return Err(ConvertError::EmptyExtractedText {
                path: job.input_ref.clone(),
            });
        }
        info!(
            "Extracted {} chars via {:?}",
            extraction.text.len(),
            extraction.tier
        );

        let (provider, settings) = self.resolve_backend(options)?;
        let backend = self.registry.create(&provider, settings)?;

        let subject = options
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT);
        let file_type_hint = extension_of(&job.source_filename).to_uppercase();

        let conversion = backend
            .generate_structured_markdown(&extraction.text, subject, &file_type_hint)
            .await?;
        debug!(
            "{} returned {} chars of markdown",
            backend.name(),
            conversion.markdown_content.len()
        );

        write_atomic(output, conversion.markdown_content.as_bytes()).await?;
        Ok(conversion.warnings)
    }

    async fn simple_markdown(&self, input: &Path, kind: FileKind, output: &Path) -> Result<(), ConvertError> {
        let markdown = match kind {
            FileKind::Docx => {
                let path = input.to_path_buf();
                blocking(move || docx::read_paragraphs(&path).map(|p| docx::render_markdown(&p))).await?
            }
            FileKind::Doc => {
                let automation = self.automation.clone();
                let path = input.to_path_buf();
                let text = blocking(move || automation.read_text(&path)).await?;
                docx::lines_to_markdown(&text)
            }
            other => {
                return Err(ConvertError::UnsupportedFileType {
                    task: TaskType::DocToMarkdownSimple.to_string(),
                    extension: other.extension().to_string(),
                })
            }
        };
        if markdown.trim().is_empty() {
            return Err(ConvertError::EmptyExtractedText {
                path: input.to_path_buf(),
            });
        }
        write_atomic(output, markdown.as_bytes()).await
    }

    /// Provider, model and key: request first, then configuration.
    fn resolve_backend(&self, options: &ConversionOptions) -> Result<(String, BackendSettings), ConvertError> {
        let given = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let provider = given(&options.ai_provider)
            .unwrap_or_else(|| self.config.default_provider.clone())
            .to_ascii_lowercase();
        if !self.registry.contains(&provider) {
            return Err(ConvertError::UnsupportedProvider { provider });
        }

        let model = given(&options.ai_model)
            .or_else(|| self.config.model_for(&provider).map(str::to_string))
            .ok_or_else(|| ConvertError::ProviderNotConfigured {
                provider: provider.clone(),
                hint: "no model name was given or configured".into(),
            })?;
        let api_key = given(&options.ai_api_key)
            .or_else(|| self.config.api_key_for(&provider).map(str::to_string))
            .ok_or_else(|| ConvertError::ProviderNotConfigured {
                provider: provider.clone(),
                hint: format!(
                    "pass an API key or set {}_API_KEY",
                    provider.to_ascii_uppercase()
                ),
            })?;

        let settings = BackendSettings {
            model,
            api_key,
            base_url: self.config.base_url_for(&provider).map(str::to_string),
            timeout: Duration::from_secs(self.config.ai_timeout_secs),
        };
        Ok((provider, settings))
    }
}

/// Write via a sibling temp file and rename, so the artifact either exists
/// complete or not at all.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    let write_failed = |source: std::io::Error| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = tmp_sibling(path);
    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    Ok(())
}

/// Drop whatever an engine left at `path` before failing.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn blocking<T, F>(f: F) -> Result<T, ConvertError>
where
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConvertError::Internal(format!("Conversion task panicked: {e}")))?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
