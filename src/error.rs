//! Error types for the docconv pipeline.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`ConvertError`]: **Fatal for one job**: the conversion cannot produce
//!   its artifact (unreadable document, backend contract violation, engine not
//!   installed). Client-input variants are returned synchronously from
//!   [`crate::dispatch::Dispatcher::submit`]; every other variant is caught at
//!   the executor boundary and recorded as a `failed` job.
//!
//! * [`PageError`]: **Non-fatal**: a single PDF page could not be rendered or
//!   OCR'd. Logged and skipped; extraction continues over the remaining pages.
//!
//! * [`JobStoreError`]: misuse of the job store (unknown id, illegal status
//!   edge). These are programming errors, never conversion outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every fatal error a conversion job can end with.
///
/// Each variant maps onto exactly one [`ErrorKind`]; the kind is what gets
/// persisted next to the human-readable message in a failed job result.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Client input errors (rejected before any job exists) ──────────────
    /// Task type is not one of the recognised conversions.
    #[error("Unsupported task type '{task}'")]
    UnsupportedTask { task: String },

    /// The source file's extension is not accepted by the task.
    #[error("File type mismatch: task '{task}' doesn't support '{extension}' files")]
    UnsupportedFileType { task: String, extension: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The document could not be opened or structurally parsed at all.
    #[error("Could not open document '{path}': {detail}")]
    UnreadableDocument { path: PathBuf, detail: String },

    /// Extraction succeeded but produced nothing to hand to the AI backend.
    #[error("Extracted text is empty, cannot proceed with conversion of '{path}'")]
    EmptyExtractedText { path: PathBuf },

    // ── AI backend errors ─────────────────────────────────────────────────
    /// No backend is registered under this name.
    #[error("Unsupported AI provider: '{provider}'")]
    UnsupportedProvider { provider: String },

    /// The backend has no credential or model to work with.
    #[error("AI provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The backend could not be reached or answered with an HTTP error.
    #[error("AI provider '{provider}' request failed: {detail}")]
    AiRequestFailed { provider: String, detail: String },

    /// The backend answered, but not with `{markdown_content, warnings}`.
    #[error("AI provider '{provider}' returned an invalid structured response: {detail}")]
    AiContractViolation { provider: String, detail: String },

    // ── Automation errors ─────────────────────────────────────────────────
    /// The office engine cannot be instantiated (not installed / not licensed).
    #[error("Office automation engine '{engine}' is unavailable: {detail}")]
    AutomationUnavailable { engine: String, detail: String },

    /// The engine was running but open/save/read failed.
    #[error("Failed to convert '{document}' via office automation: {reason}")]
    ConversionFailed { document: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not persist the uploaded source document.
    #[error("Could not save uploaded file '{path}': {source}")]
    StorageFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, cancelled task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// The taxonomy tag recorded alongside the message in a failed job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::UnsupportedTask { .. } => ErrorKind::UnsupportedTask,
            ConvertError::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            ConvertError::UnreadableDocument { .. } => ErrorKind::UnreadableDocument,
            ConvertError::EmptyExtractedText { .. } => ErrorKind::EmptyExtractedText,
            ConvertError::UnsupportedProvider { .. } => ErrorKind::UnsupportedProvider,
            ConvertError::ProviderNotConfigured { .. } => ErrorKind::ProviderNotConfigured,
            ConvertError::AiRequestFailed { .. } => ErrorKind::AiRequestFailed,
            ConvertError::AiContractViolation { .. } => ErrorKind::AiContractViolation,
            ConvertError::AutomationUnavailable { .. } => ErrorKind::AutomationUnavailable,
            ConvertError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            ConvertError::OutputWriteFailed { .. } => ErrorKind::OutputWriteFailed,
            ConvertError::StorageFailed { .. } => ErrorKind::StorageFailed,
            ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Client-input errors are surfaced synchronously and never create a job.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConvertError::UnsupportedTask { .. } | ConvertError::UnsupportedFileType { .. }
        )
    }
}

/// Taxonomy tag for a [`ConvertError`], serialised in job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedTask,
    UnsupportedFileType,
    UnreadableDocument,
    EmptyExtractedText,
    UnsupportedProvider,
    ProviderNotConfigured,
    AiRequestFailed,
    #[serde(rename = "AIContractViolation")]
    AiContractViolation,
    AutomationUnavailable,
    ConversionFailed,
    OutputWriteFailed,
    StorageFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedTask => "UnsupportedTask",
            ErrorKind::UnsupportedFileType => "UnsupportedFileType",
            ErrorKind::UnreadableDocument => "UnreadableDocument",
            ErrorKind::EmptyExtractedText => "EmptyExtractedText",
            ErrorKind::UnsupportedProvider => "UnsupportedProvider",
            ErrorKind::ProviderNotConfigured => "ProviderNotConfigured",
            ErrorKind::AiRequestFailed => "AiRequestFailed",
            ErrorKind::AiContractViolation => "AIContractViolation",
            ErrorKind::AutomationUnavailable => "AutomationUnavailable",
            ErrorKind::ConversionFailed => "ConversionFailed",
            ErrorKind::OutputWriteFailed => "OutputWriteFailed",
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal error for a single PDF page.
///
/// The extraction engine logs these and moves on to the next page.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Page text layer could not be read.
    #[error("Page {page}: text extraction failed: {detail}")]
    TextFailed { page: usize, detail: String },

    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// OCR engine failed on the rendered page.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },
}

/// Job store misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStoreError {
    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_mismatch_display() {
        let e = ConvertError::UnsupportedFileType {
            task: "ppt_to_pdf".into(),
            extension: ".pdf".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("ppt_to_pdf"), "got: {msg}");
        assert!(msg.contains(".pdf"), "got: {msg}");
        assert!(e.is_client_error());
    }

    #[test]
    fn contract_violation_kind_uses_taxonomy_name() {
        let e = ConvertError::AiContractViolation {
            provider: "gemini".into(),
            detail: "expected value at line 1".into(),
        };
        assert_eq!(e.kind(), ErrorKind::AiContractViolation);
        assert_eq!(e.kind().to_string(), "AIContractViolation");
        assert_eq!(
            serde_json::to_string(&e.kind()).unwrap(),
            "\"AIContractViolation\""
        );
        assert!(!e.is_client_error());
    }

    #[test]
    fn automation_unavailable_display() {
        let e = ConvertError::AutomationUnavailable {
            engine: "soffice".into(),
            detail: "No such file or directory".into(),
        };
        assert!(e.to_string().contains("soffice"));
        assert_eq!(e.kind(), ErrorKind::AutomationUnavailable);
    }

    #[test]
    fn config_and_internal_collapse_to_internal_kind() {
        assert_eq!(
            ConvertError::InvalidConfig("x".into()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(ConvertError::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn page_error_display() {
        let e = PageError::OcrFailed {
            page: 2,
            detail: "tesseract exited 1".into(),
        };
        assert!(e.to_string().contains("Page 2"));
    }

    #[test]
    fn invalid_transition_display() {
        let e = JobStoreError::InvalidTransition {
            id: "abc".into(),
            from: "success".into(),
            to: "in_progress".into(),
        };
        assert_eq!(
            e.to_string(),
            "Invalid transition for job abc: success -> in_progress"
        );
    }
}
