//! Task types and the extension table that gates them.
//!
//! The table here is the single source of truth for which uploads a task
//! accepts. The dispatcher consults it before anything touches the disk.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A recognised conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Presentation → PDF through the office engine.
    PptToPdf,
    /// Word/PDF → structured Markdown through an AI backend.
    DocToMarkdown,
    DocxToMarkdown,
    PdfToMarkdown,
    /// Word → Markdown from paragraph styles alone, no AI involved.
    DocToMarkdownSimple,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::PptToPdf,
        TaskType::DocToMarkdown,
        TaskType::DocxToMarkdown,
        TaskType::PdfToMarkdown,
        TaskType::DocToMarkdownSimple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PptToPdf => "ppt_to_pdf",
            TaskType::DocToMarkdown => "doc_to_markdown",
            TaskType::DocxToMarkdown => "docx_to_markdown",
            TaskType::PdfToMarkdown => "pdf_to_markdown",
            TaskType::DocToMarkdownSimple => "doc_to_markdown_simple",
        }
    }

    /// File kinds this task accepts.
    pub fn accepted_kinds(&self) -> &'static [FileKind] {
        match self {
            TaskType::PptToPdf => &[FileKind::Ppt, FileKind::Pptx],
            TaskType::DocToMarkdown | TaskType::DocxToMarkdown | TaskType::PdfToMarkdown => {
                &[FileKind::Doc, FileKind::Docx, FileKind::Pdf]
            }
            TaskType::DocToMarkdownSimple => &[FileKind::Doc, FileKind::Docx],
        }
    }

    /// Whether the task needs an AI backend.
    pub fn uses_ai(&self) -> bool {
        matches!(
            self,
            TaskType::DocToMarkdown | TaskType::DocxToMarkdown | TaskType::PdfToMarkdown
        )
    }

    /// Extension of the produced artifact, including the dot.
    pub fn output_extension(&self) -> &'static str {
        match self {
            TaskType::PptToPdf => ".pdf",
            _ => ".md",
        }
    }

    /// Resolve the file kind of `file_name` and check it against this task.
    pub fn validate_file(&self, file_name: &str) -> Result<FileKind, ConvertError> {
        let extension = extension_of(file_name);
        FileKind::from_extension(&extension)
            .filter(|kind| self.accepted_kinds().contains(kind))
            .ok_or_else(|| ConvertError::UnsupportedFileType {
                task: self.as_str().to_string(),
                extension: if extension.is_empty() {
                    "<none>".to_string()
                } else {
                    extension
                },
            })
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| ConvertError::UnsupportedTask {
                task: s.to_string(),
            })
    }
}

/// Source document formats the pipeline knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Doc,
    Docx,
    Ppt,
    Pptx,
}

impl FileKind {
    /// Map a lower-cased, dotted extension (".docx") to a kind.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            ".pdf" => Some(FileKind::Pdf),
            ".doc" => Some(FileKind::Doc),
            ".docx" => Some(FileKind::Docx),
            ".ppt" => Some(FileKind::Ppt),
            ".pptx" => Some(FileKind::Pptx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(&extension_of(&path.to_string_lossy()))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Pdf => ".pdf",
            FileKind::Doc => ".doc",
            FileKind::Docx => ".docx",
            FileKind::Ppt => ".ppt",
            FileKind::Pptx => ".pptx",
        }
    }
}

/// Lower-cased extension of a file name, with its leading dot ("" if none).
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}
