//! Tiered text extraction.
//!
//! ```text
//! tier 1 (direct)        .docx paragraph walk │ PDF page-text walk │ .doc via office engine
//!        │
//!        ├─ trimmed length > threshold ──────────────▶ direct
//!        │
//! tier 2 (PDF only)      render pages ─▶ OCR each page ─▶ join with page-break marker
//!        │
//!        ├─ any OCR text ────────────────────────────▶ ocr-fallback
//!        └─ nothing recognised ──────────────────────▶ direct (tier-1 text, possibly empty)
//! ```
//!
//! Short text is never an error here; only a document that cannot be opened
//! fails extraction.

pub mod docx;
pub mod ocr;
pub mod pdf;

pub use ocr::{OcrEngine, TesseractOcr};
pub use pdf::{PdfBackend, PdfiumBackend};

use crate::automation::AutomationManager;
use crate::config::PipelineConfig;
use crate::error::ConvertError;
use crate::task::FileKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inserted between OCR'd pages.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Which strategy produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionTier {
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "ocr-fallback")]
    OcrFallback,
}

/// Extracted text plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub text: String,
    pub tier: ExtractionTier,
}

impl ExtractionResult {
    fn direct(text: String) -> Self {
        Self {
            text,
            tier: ExtractionTier::Direct,
        }
    }
}

/// The extraction engine.
#[derive(Clone)]
pub struct Extractor {
    pdf: Arc<dyn PdfBackend>,
    ocr: Arc<dyn OcrEngine>,
    automation: AutomationManager,
    ocr_threshold: usize,
    ocr_dpi: u32,
}

impl Extractor {
    pub fn new(
        pdf: Arc<dyn PdfBackend>,
        ocr: Arc<dyn OcrEngine>,
        automation: AutomationManager,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            pdf,
            ocr,
            automation,
            ocr_threshold: config.ocr_threshold,
            ocr_dpi: config.ocr_dpi,
        }
    }

    pub async fn extract(&self, path: &Path, kind: FileKind) -> Result<ExtractionResult, ConvertError> {
        match kind {
            FileKind::Pdf => self.extract_pdf(path).await,
            FileKind::Docx => {
                let path = path.to_path_buf();
                let text = blocking(move || docx::read_paragraphs(&path).map(|p| docx::plain_text(&p))).await?;
                Ok(ExtractionResult::direct(text))
            }
            FileKind::Doc => {
                let automation = self.automation.clone();
                let path = path.to_path_buf();
                let text = blocking(move || automation.read_text(&path)).await?;
                Ok(ExtractionResult::direct(text))
            }
            FileKind::Ppt | FileKind::Pptx => Err(ConvertError::UnsupportedFileType {
                task: "text extraction".to_string(),
                extension: kind.extension().to_string(),
            }),
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<ExtractionResult, ConvertError> {
        let direct = {
            let pdf = self.pdf.clone();
            let path = path.to_path_buf();
            blocking(move || pdf.page_texts(&path)).await?.join("\n\n")
        };

        let direct_len = direct.trim().chars().count();
        if direct_len > self.ocr_threshold {
            info!(
                "Direct extraction: {} chars (threshold {}), skipping OCR",
                direct_len, self.ocr_threshold
            );
            return Ok(ExtractionResult::direct(direct));
        }

        info!(
            "Direct extraction yielded {} chars (<= {}), falling back to OCR at {} DPI",
            direct_len, self.ocr_threshold, self.ocr_dpi
        );

        let ocr_text = match self.ocr_pdf(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR fallback unavailable for {}: {}", path.display(), e);
                String::new()
            }
        };

        if ocr_text.trim().is_empty() {
            warn!("OCR produced no text; keeping direct extraction result");
            return Ok(ExtractionResult::direct(direct));
        }

        Ok(ExtractionResult {
            text: ocr_text,
            tier: ExtractionTier::OcrFallback,
        })
    }

    /// Render every page and OCR it; failing pages are skipped.
    async fn ocr_pdf(&self, path: &Path) -> Result<String, ConvertError> {
        let scratch = tempfile::Builder::new()
            .prefix("docconv-ocr-")
            .tempdir()
            .map_err(|e| ConvertError::Internal(format!("cannot create OCR scratch dir: {e}")))?;

        let rendered = {
            let pdf = self.pdf.clone();
            let path = path.to_path_buf();
            let dir = scratch.path().to_path_buf();
            let dpi = self.ocr_dpi;
            blocking(move || pdf.render_pages(&path, dpi, &dir)).await?
        };

        let total = rendered.len();
        let mut pages = Vec::with_capacity(total);
        for (idx, page) in rendered.into_iter().enumerate() {
            let page_num = idx + 1;
            let image = match page {
                Ok(image) => image,
                Err(e) => {
                    warn!("{e}; skipping");
                    continue;
                }
            };
            match self.ocr.recognize(page_num, &image).await {
                Ok(text) if !text.trim().is_empty() => pages.push(text.trim().to_string()),
                Ok(_) => debug!("OCR page {}/{}: no text", page_num, total),
                Err(e) => warn!("{e}; skipping"),
            }
        }

        info!("OCR recognised text on {}/{} pages", pages.len(), total);
        Ok(pages.join(PAGE_BREAK))
    }
}

/// Run blocking work (pdfium, zip, office engine) off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ConvertError>
where
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConvertError::Internal(format!("Extraction task panicked: {e}")))?
}
