//! Optical character recognition over rendered page images.

use crate::error::PageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Recognises the text on one rendered page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// `page` is 1-based and only used for error reporting.
    async fn recognize(&self, page: usize, image: &Path) -> Result<String, PageError>;
}

/// [`OcrEngine`] that shells out to the `tesseract` CLI, one process per page.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, page: usize, image: &Path) -> Result<String, PageError> {
        let failed = |detail: String| PageError::OcrFailed { page, detail };

        // `stdout` as the output base makes tesseract print instead of writing
        // a sidecar .txt file.
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| failed(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| failed(format!("failed to run {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR page {}: {} chars", page, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_a_page_error() {
        let ocr = TesseractOcr::new(
            "/nonexistent/tesseract-binary",
            "eng",
            Duration::from_secs(5),
        );
        let err = ocr
            .recognize(3, Path::new("/tmp/page.png"))
            .await
            .unwrap_err();
        match err {
            PageError::OcrFailed { page, detail } => {
                assert_eq!(page, 3);
                assert!(detail.contains("failed to run"), "{detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
