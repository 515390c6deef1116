//! Office automation: scoped acquisition of an external document engine.
//!
//! An [`AutomationHandle`] owns one application instance and the one document
//! opened in it. Dropping the handle closes the document and then quits the
//! application, on every path out of the scope, unwinding included. Release
//! errors are logged, never raised, so they cannot mask the conversion
//! outcome.
//!
//! Office engines are single-apartment in nature: at most one handle may be
//! live per thread, and instances are never pooled or shared across jobs.

pub mod soffice;

pub use soffice::SofficeEngine;

use crate::error::ConvertError;
use crate::task::FileKind;
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Engine surface ───────────────────────────────────────────────────────

/// Which application a document needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFamily {
    Presentation,
    WordProcessor,
}

impl DocumentFamily {
    /// `None` for kinds no office engine handles (PDF).
    pub fn of(kind: FileKind) -> Option<Self> {
        match kind {
            FileKind::Ppt | FileKind::Pptx => Some(DocumentFamily::Presentation),
            FileKind::Doc | FileKind::Docx => Some(DocumentFamily::WordProcessor),
            FileKind::Pdf => None,
        }
    }
}

impl fmt::Display for DocumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFamily::Presentation => f.write_str("presentation"),
            DocumentFamily::WordProcessor => f.write_str("word processor"),
        }
    }
}

/// How a document is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Text extraction only.
    ReadOnly,
    /// The document will be saved to another format.
    ForExport,
}

/// PDF export format, one per document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    PresentationPdf,
    WordPdf,
}

impl ExportFormat {
    pub fn for_family(family: DocumentFamily) -> Self {
        match family {
            DocumentFamily::Presentation => ExportFormat::PresentationPdf,
            DocumentFamily::WordProcessor => ExportFormat::WordPdf,
        }
    }

    /// Engine export filter name.
    pub fn filter_name(&self) -> &'static str {
        match self {
            ExportFormat::PresentationPdf => "impress_pdf_Export",
            ExportFormat::WordPdf => "writer_pdf_Export",
        }
    }
}

/// Factory for application instances.
pub trait AutomationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Start a fresh application instance for `family`.
    ///
    /// Fails with [`ConvertError::AutomationUnavailable`] when the engine
    /// cannot be instantiated at all.
    fn launch(&self, family: DocumentFamily) -> Result<Box<dyn OfficeApplication>, ConvertError>;
}

/// One running application instance.
pub trait OfficeApplication {
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<Box<dyn OfficeDocument>, ConvertError>;

    /// Terminate the instance. Called exactly once, after the document closes.
    fn quit(&mut self) -> Result<(), ConvertError>;
}

/// A document open inside an application instance.
pub trait OfficeDocument {
    fn save_as(&mut self, dest: &Path, format: ExportFormat) -> Result<(), ConvertError>;

    fn read_text(&mut self) -> Result<String, ConvertError>;

    /// Called exactly once, before the application quits.
    fn close(&mut self) -> Result<(), ConvertError>;
}

// ── Per-thread exclusivity ───────────────────────────────────────────────

thread_local! {
    static HANDLE_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as holding a handle until dropped.
struct ThreadSlot;

impl ThreadSlot {
    fn claim(document: &Path) -> Result<Self, ConvertError> {
        HANDLE_ACTIVE.with(|active| {
            if active.get() {
                return Err(ConvertError::ConversionFailed {
                    document: document.display().to_string(),
                    reason: "another automation handle is already active on this thread".into(),
                });
            }
            active.set(true);
            Ok(ThreadSlot)
        })
    }
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        HANDLE_ACTIVE.with(|active| active.set(false));
    }
}

// ── Handle ───────────────────────────────────────────────────────────────

/// Application instance plus open document, released on drop.
pub struct AutomationHandle {
    engine: String,
    path: PathBuf,
    family: DocumentFamily,
    document: Option<Box<dyn OfficeDocument>>,
    application: Option<Box<dyn OfficeApplication>>,
    // Declared last: the slot is freed only after both releases ran.
    _slot: ThreadSlot,
}

impl AutomationHandle {
    pub fn family(&self) -> DocumentFamily {
        self.family
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document(&mut self) -> Result<&mut Box<dyn OfficeDocument>, ConvertError> {
        let path = self.path.display().to_string();
        self.document
            .as_mut()
            .ok_or_else(|| ConvertError::ConversionFailed {
                document: path,
                reason: "document is not open".into(),
            })
    }

    /// Export the open document as PDF using the family's export format.
    pub fn save_as_pdf(&mut self, dest: &Path) -> Result<(), ConvertError> {
        let format = ExportFormat::for_family(self.family);
        let path = self.path.clone();
        self.document()?
            .save_as(dest, format)
            .map_err(|e| wrap_engine_error(&path, e))?;
        info!("Exported {} → {}", path.display(), dest.display());
        Ok(())
    }

    /// Whole-document plain text.
    pub fn read_text(&mut self) -> Result<String, ConvertError> {
        let path = self.path.clone();
        self.document()?
            .read_text()
            .map_err(|e| wrap_engine_error(&path, e))
    }

    fn release(&mut self) {
        if let Some(mut document) = self.document.take() {
            if let Err(e) = document.close() {
                warn!("{}: closing {} failed: {}", self.engine, self.path.display(), e);
            }
        }
        if let Some(mut application) = self.application.take() {
            if let Err(e) = application.quit() {
                warn!("{}: quitting application failed: {}", self.engine, e);
            }
        }
        debug!("{}: released {}", self.engine, self.path.display());
    }
}

impl Drop for AutomationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AutomationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationHandle")
            .field("engine", &self.engine)
            .field("path", &self.path)
            .field("family", &self.family)
            .field("document_open", &self.document.is_some())
            .field("application_running", &self.application.is_some())
            .finish()
    }
}

/// Open/save errors surface as `ConversionFailed`; an unavailable engine
/// keeps its own kind.
fn wrap_engine_error(path: &Path, err: ConvertError) -> ConvertError {
    match err {
        e @ (ConvertError::ConversionFailed { .. } | ConvertError::AutomationUnavailable { .. }) => e,
        other => ConvertError::ConversionFailed {
            document: path.display().to_string(),
            reason: other.to_string(),
        },
    }
}

// ── Manager ──────────────────────────────────────────────────────────────

/// Hands out scoped [`AutomationHandle`]s over one engine.
#[derive(Clone)]
pub struct AutomationManager {
    engine: Arc<dyn AutomationEngine>,
}

impl AutomationManager {
    pub fn new(engine: Arc<dyn AutomationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Launch an application for `path`'s family and open the document.
    pub fn open_document(&self, path: &Path, mode: OpenMode) -> Result<AutomationHandle, ConvertError> {
        let family = FileKind::from_path(path)
            .and_then(DocumentFamily::of)
            .ok_or_else(|| ConvertError::ConversionFailed {
                document: path.display().to_string(),
                reason: "not an office document".into(),
            })?;

        let slot = ThreadSlot::claim(path)?;
        let application = self.engine.launch(family)?;
        info!("{}: acquired {} instance for {}", self.engine.name(), family, path.display());

        let mut handle = AutomationHandle {
            engine: self.engine.name().to_string(),
            path: path.to_path_buf(),
            family,
            document: None,
            application: Some(application),
            _slot: slot,
        };

        // The application is already owned by the handle, so a failed open
        // still quits it when `handle` drops.
        let document = match handle.application.as_mut() {
            Some(app) => app.open(path, mode).map_err(|e| wrap_engine_error(path, e))?,
            None => return Err(ConvertError::Internal("application vanished before open".into())),
        };
        handle.document = Some(document);
        Ok(handle)
    }

    /// Run `f` against an open document; the handle is released when `f`
    /// returns or unwinds.
    pub fn with_document<T>(
        &self,
        path: &Path,
        mode: OpenMode,
        f: impl FnOnce(&mut AutomationHandle) -> Result<T, ConvertError>,
    ) -> Result<T, ConvertError> {
        let mut handle = self.open_document(path, mode)?;
        f(&mut handle)
    }

    pub fn convert_to_pdf(&self, src: &Path, dest: &Path) -> Result<(), ConvertError> {
        self.with_document(src, OpenMode::ForExport, |h| h.save_as_pdf(dest))
    }

    pub fn read_text(&self, src: &Path) -> Result<String, ConvertError> {
        self.with_document(src, OpenMode::ReadOnly, |h| h.read_text())
    }
}

impl fmt::Debug for AutomationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationManager")
            .field("engine", &self.engine.name())
            .finish()
    }
}
