//! # docconv
//!
//! Asynchronous document conversion: office presentations to PDF, and
//! Word/PDF documents to structured Markdown through an AI backend.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submit ──▶ Dispatcher  validate task + extension, persist upload, job = pending
//!               │
//!               ▼ queue
//!            WorkerPool ──▶ ConversionExecutor  job = in_progress
//!                              │
//!                              ├─ ppt_to_pdf        office engine export (RAII handle)
//!                              ├─ *_to_markdown     extract (direct │ OCR fallback) ─▶ AI backend
//!                              └─ *_simple          paragraph styles → Markdown
//!                              │
//!                              ▼
//!                           job = success │ failed
//!
//! poll ──▶ JobStore  (atomic snapshot, safe under any number of readers)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconv::{ConversionRequest, ConversionService, PipelineConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .api_key("gemini", std::env::var("GEMINI_API_KEY")?)
//!         .build()?;
//!     let service = ConversionService::builder(config).start();
//!
//!     let id = service
//!         .submit(
//!             ConversionRequest::new(std::fs::read("notes.pdf")?, "notes.pdf", "pdf_to_markdown")
//!                 .subject("Thermodynamics"),
//!         )
//!         .await?;
//!     let job = service.wait_for_terminal(&id, Duration::from_millis(250)).await?;
//!     println!("{}", serde_json::to_string_pretty(&docconv::JobStatusView::from(&job))?);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## External tools
//!
//! | Concern | Tool | Config |
//! |---------|------|--------|
//! | PDF text / rendering | pdfium shared library | `PDFIUM_LIB_PATH` |
//! | OCR | `tesseract` CLI | `TESSERACT_PATH`, `DOCCONV_OCR_LANGUAGES` |
//! | Office export, `.doc` text | LibreOffice `soffice` | `LIBREOFFICE_PATH` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod ai;
pub mod automation;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod extract;
pub mod job;
pub mod prompts;
pub mod service;
pub mod task;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use ai::{AiBackend, BackendRegistry, BackendSettings, StructuredConversion};
pub use automation::{AutomationEngine, AutomationHandle, AutomationManager, ExportFormat, OpenMode};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use dispatch::{ConversionOptions, ConversionRequest, Dispatcher};
pub use error::{ConvertError, ErrorKind, JobStoreError, PageError};
pub use executor::ConversionExecutor;
pub use extract::{ExtractionResult, ExtractionTier, Extractor, OcrEngine, PdfBackend};
pub use job::{Job, JobId, JobResult, JobStatus, JobStatusView, JobStore};
pub use service::{ConversionService, ConversionServiceBuilder};
pub use task::{FileKind, TaskType};
