//! PDF access through pdfium: the page-text walk (tier 1) and page
//! rasterisation for OCR (tier 2).
//!
//! Both calls are blocking. pdfium keeps thread-local state and must not run
//! on a Tokio worker thread; callers wrap them in `spawn_blocking`.

use crate::error::{ConvertError, PageError};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Source of PDF page text and page bitmaps.
pub trait PdfBackend: Send + Sync {
    /// Text layer of every page, in page order. A page whose text layer
    /// cannot be read contributes an empty string.
    ///
    /// Fails with [`ConvertError::UnreadableDocument`] only when the document
    /// cannot be opened at all.
    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ConvertError>;

    /// Render every page to a PNG under `dir` at `dpi`, in page order.
    ///
    /// The outer error is reserved for a document that cannot be opened; a
    /// page that fails to render is reported in its slot and the rest carry on.
    fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        dir: &Path,
    ) -> Result<Vec<Result<PathBuf, PageError>>, ConvertError>;
}

/// [`PdfBackend`] backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    /// `library_path` is a directory holding the platform pdfium library;
    /// `None` tries the system library, then the working directory.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, ConvertError> {
        let bindings = match &self.library_path {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library().or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            }),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| ConvertError::Internal(format!("pdfium library could not be loaded: {e:?}")))
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ConvertError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ConvertError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

impl PdfBackend for PdfiumBackend {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ConvertError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, path)?;
        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let texts = pages
            .iter()
            .enumerate()
            .map(|(idx, page)| match page.text() {
                Ok(text) => text.all(),
                Err(e) => {
                    let err = PageError::TextFailed {
                        page: idx + 1,
                        detail: format!("{e:?}"),
                    };
                    warn!("{err}");
                    String::new()
                }
            })
            .collect();
        Ok(texts)
    }

    fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        dir: &Path,
    ) -> Result<Vec<Result<PathBuf, PageError>>, ConvertError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, path)?;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        let rendered = document
            .pages()
            .iter()
            .enumerate()
            .map(|(idx, page)| -> Result<PathBuf, PageError> {
                let page_num = idx + 1;
                let render_failed = |detail: String| PageError::RenderFailed {
                    page: page_num,
                    detail,
                };
                let bitmap = page
                    .render_with_config(&render_config)
                    .map_err(|e| render_failed(format!("{e:?}")))?;
                let image = bitmap.as_image();
                let target = dir.join(format!("page_{page_num:04}.png"));
                image
                    .save_with_format(&target, ImageFormat::Png)
                    .map_err(|e| render_failed(e.to_string()))?;
                debug!(
                    "Rendered page {} → {}x{} px at {} DPI",
                    page_num,
                    image.width(),
                    image.height(),
                    dpi
                );
                Ok(target)
            })
            .collect();
        Ok(rendered)
    }
}
